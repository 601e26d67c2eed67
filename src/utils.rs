use rand::distributions::Alphanumeric;
use rand::Rng;

/// longest name (in bytes) we hand to the filesystem for a single component.
/// leaves room for the chunk suffix and part-file decorations under the usual 255 limit
pub const MAX_NAME_LEN: usize = 200;

/// used when sanitizing strips everything away
pub const FALLBACK_NAME: &str = "unnamed";

/// make a client supplied string safe to use as a single path component.
///
/// keeps alphanumerics, `-`, `_` and `.`, drops everything else (separators,
/// control chars, whitespace...) and strips leading/trailing dots so the result
/// can never be `.`, `..` or a hidden file. same input always gives same output,
/// which is what keeps repeated chunk requests landing in the same staging dir.
pub fn sanitize_filename(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();

    let trimmed = kept.trim_matches('.');

    let mut safe = String::with_capacity(trimmed.len().min(MAX_NAME_LEN));
    for c in trimmed.chars() {
        if safe.len() + c.len_utf8() > MAX_NAME_LEN {
            break;
        }
        safe.push(c);
    }

    // truncation can expose a trailing dot again
    let safe = safe.trim_end_matches('.');

    if safe.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        safe.to_string()
    }
}

/// random string over [0-9A-Za-z]
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// extension of the last path component, without the dot.
/// `None` for names without a dot
pub fn find_extension(filename: &str) -> Option<&str> {
    let base = base_name(filename);
    base.rsplit_once('.').map(|(_, ext)| ext)
}

/// strip the extension (if any) from the last path component
pub fn remove_extension(filename: &str) -> &str {
    let base = base_name(filename);
    match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    }
}

fn base_name(filename: &str) -> &str {
    filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename)
}

/// resolves once ctrl-c or sigterm is received
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
