use crate::config::Config;

/// shared application state.
///
/// deliberately holds no upload bookkeeping: progress lives on disk only,
/// so any worker or process can serve any chunk
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}
