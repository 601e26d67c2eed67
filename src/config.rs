use std::path::PathBuf;
use std::time::Duration;

/// logical parameter names understood by the upload protocol
pub const PARAM_IDENTIFIER: &str = "identifier";
pub const PARAM_FILENAME: &str = "filename";
pub const PARAM_CHUNK_NUMBER: &str = "chunkNumber";
pub const PARAM_CHUNK_SIZE: &str = "chunkSize";
pub const PARAM_TOTAL_SIZE: &str = "totalSize";
pub const PARAM_TOTAL_CHUNKS: &str = "totalChunks";

/// mapping from logical parameter names to what the client library actually sends.
///
/// wire key is `prefix + UcFirst(name)`, so the defaults give
/// `resumableIdentifier`, `resumableChunkNumber` and friends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamNames {
    pub prefix: String,
    pub identifier: String,
    pub filename: String,
    pub chunk_number: String,
    pub chunk_size: String,
    pub total_size: String,
    pub total_chunks: String,
}

impl Default for ParamNames {
    fn default() -> Self {
        Self {
            prefix: "resumable".to_string(),
            identifier: PARAM_IDENTIFIER.to_string(),
            filename: PARAM_FILENAME.to_string(),
            chunk_number: PARAM_CHUNK_NUMBER.to_string(),
            chunk_size: PARAM_CHUNK_SIZE.to_string(),
            total_size: PARAM_TOTAL_SIZE.to_string(),
            total_chunks: PARAM_TOTAL_CHUNKS.to_string(),
        }
    }
}

impl ParamNames {
    /// merge overrides on top of the current mapping.
    /// unknown logical names are ignored (and logged)
    pub fn merge<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, wire) in overrides {
            let slot = match name.as_ref() {
                PARAM_IDENTIFIER => &mut self.identifier,
                PARAM_FILENAME => &mut self.filename,
                PARAM_CHUNK_NUMBER => &mut self.chunk_number,
                PARAM_CHUNK_SIZE => &mut self.chunk_size,
                PARAM_TOTAL_SIZE => &mut self.total_size,
                PARAM_TOTAL_CHUNKS => &mut self.total_chunks,
                other => {
                    tracing::warn!("Ignoring unknown resumable parameter mapping: {}", other);
                    continue;
                }
            };
            *slot = wire.into();
        }
        self
    }

    /// parse `name=wire,name=wire` as used by RESUMABLE_PARAM_MAP
    pub fn parse_overrides(raw: &str) -> Vec<(String, String)> {
        raw.split(',')
            .filter_map(|pair| {
                let (name, wire) = pair.split_once('=')?;
                let (name, wire) = (name.trim(), wire.trim());
                if name.is_empty() || wire.is_empty() {
                    return None;
                }
                Some((name.to_string(), wire.to_string()))
            })
            .collect()
    }

    /// full wire key for a mapped short name
    pub fn key(&self, short_name: &str) -> String {
        if self.prefix.is_empty() {
            return short_name.to_string();
        }
        let mut chars = short_name.chars();
        match chars.next() {
            Some(first) => format!("{}{}{}", self.prefix, first.to_uppercase(), chars.as_str()),
            None => self.prefix.clone(),
        }
    }
}

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// where chunks are staged until the upload completes
    pub staging_dir: PathBuf,
    /// where assembled files end up
    pub upload_dir: PathBuf,
    /// permission bits applied to chunks and final files (unix only)
    pub file_mode: u32,
    /// remove the staging dir after a successful assembly. turn off only for debugging
    pub delete_staging_dir: bool,
    /// optional namespace inserted below both roots
    pub instance_id: Option<String>,
    /// verbose engine logging
    pub debug: bool,
    /// length of the collision suffix added to final names
    pub random_suffix_len: usize,
    /// assembly markers older than this are treated as abandoned. zero disables reclaiming
    pub assembly_lock_ttl: Duration,
    /// client parameter names
    pub params: ParamNames,
    /// server bind address
    pub host: String,
    /// server port
    pub port: u16,
    /// maximum request body (one chunk plus form fields) in bytes
    pub max_chunk_size: usize,
    /// number of tokio worker threads
    pub worker_threads: usize,
    /// cors allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    pub const DEFAULT_FILE_MODE: u32 = 0o664;
    pub const DEFAULT_SUFFIX_LEN: usize = 5;
    pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

    /// defaults rooted at the given directories, for embedding and tests
    pub fn new(staging_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            upload_dir: upload_dir.into(),
            file_mode: Self::DEFAULT_FILE_MODE,
            delete_staging_dir: true,
            instance_id: None,
            debug: false,
            random_suffix_len: Self::DEFAULT_SUFFIX_LEN,
            assembly_lock_ttl: Self::DEFAULT_LOCK_TTL,
            params: ParamNames::default(),
            host: "127.0.0.1".to_string(),
            port: 4850,
            max_chunk_size: 64 * 1024 * 1024,
            worker_threads: 8,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }

    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::new(
            std::env::var("STAGING_DIR").unwrap_or_else(|_| "./tmp".to_string()),
            std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
        );

        let mut params = ParamNames::default();
        if let Ok(prefix) = std::env::var("RESUMABLE_PARAM_PREFIX") {
            params.prefix = prefix.trim().to_string();
        }
        if let Ok(map) = std::env::var("RESUMABLE_PARAM_MAP") {
            params = params.merge(ParamNames::parse_overrides(&map));
        }

        let cors_origins = match std::env::var("CORS_ORIGINS") {
            Ok(origins) => origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.cors_origins.clone(),
        };

        Self {
            file_mode: std::env::var("FILE_MODE")
                .ok()
                .and_then(|m| Self::parse_mode(&m))
                .unwrap_or(defaults.file_mode),
            delete_staging_dir: std::env::var("DELETE_STAGING_DIR")
                .ok()
                .and_then(|v| Self::parse_bool(&v))
                .unwrap_or(defaults.delete_staging_dir),
            instance_id: std::env::var("INSTANCE_ID")
                .ok()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty()),
            debug: std::env::var("DEBUG")
                .ok()
                .and_then(|v| Self::parse_bool(&v))
                .unwrap_or(defaults.debug),
            random_suffix_len: std::env::var("RANDOM_SUFFIX_LEN")
                .ok()
                .and_then(|l| l.parse().ok())
                .filter(|l| *l > 0)
                .unwrap_or(defaults.random_suffix_len),
            assembly_lock_ttl: std::env::var("ASSEMBLY_LOCK_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.assembly_lock_ttl),
            params,
            host: std::env::var("HOST").unwrap_or_else(|_| defaults.host.clone()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            max_chunk_size: std::env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_chunk_size),
            worker_threads: std::env::var("WORKER_THREADS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.worker_threads),
            cors_origins,
            ..defaults
        }
    }

    /// octal mode string, with or without a leading `0` / `0o`
    pub fn parse_mode(raw: &str) -> Option<u32> {
        let raw = raw.trim();
        let digits = raw.strip_prefix("0o").unwrap_or(raw);
        u32::from_str_radix(digits, 8).ok().filter(|m| *m <= 0o7777)
    }

    fn parse_bool(raw: &str) -> Option<bool> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}
