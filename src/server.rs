use axum::{extract::DefaultBodyLimit, http::HeaderValue, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::handlers::{
    health_check, probe_chunk, probe_instance_chunk, upload_chunk, upload_instance_chunk,
};
use crate::middleware::add_security_headers;
use crate::state::AppState;
use crate::utils::shutdown_signal;

/// build the upload router
pub fn build_router(state: Arc<AppState>) -> Router {
    let config = &state.config;
    tracing::debug!(
        "Building upload router with max chunk size: {} bytes",
        config.max_chunk_size
    );

    // configure cors from the configured origins
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_origin(AllowOrigin::list(origins))
        .allow_headers(tower_http::cors::Any);

    let max_body = config.max_chunk_size;

    Router::new()
        .route("/upload", get(probe_chunk).post(upload_chunk))
        .route(
            "/upload/:instance",
            get(probe_instance_chunk).post(upload_instance_chunk),
        )
        .route("/health", get(health_check))
        .layer(axum::middleware::from_fn(add_security_headers))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(RequestBodyLimitLayer::new(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// serve until a shutdown signal arrives
pub async fn start_server(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    tracing::info!("Starting server...");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::debug!("Listener bound to {}", addr);

    tracing::info!("Server running and ready to accept connections");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .tcp_nodelay(true)
    .await
}

/// print startup banner with server info
pub fn print_startup_banner(config: &Config) {
    tracing::info!("Juicebox-resumable starting...");
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("📡 UPLOAD API: http://{}:{}/upload", config.host, config.port);
    tracing::info!(
        "🧩 Staging chunks in: {:?}",
        config.staging_dir.canonicalize().unwrap_or(config.staging_dir.clone())
    );
    tracing::info!(
        "📁 Writing uploads to: {:?}",
        config.upload_dir.canonicalize().unwrap_or(config.upload_dir.clone())
    );
    if let Some(instance) = &config.instance_id {
        tracing::info!("🏷️  Instance namespace: {}", instance);
    }
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}
