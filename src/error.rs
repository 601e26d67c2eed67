use std::path::PathBuf;

/// failures that abort a single upload call.
///
/// lost races and failed assemblies are not errors, they surface as
/// `UploadStatus::Accepted` and the client retry drives the next attempt
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// directory could not be created for a reason other than already existing
    #[error("could not create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// chunk payload could not be persisted into the staging directory
    #[error("could not store chunk at {path:?}: {source}")]
    WriteChunk {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// instance namespace given but nothing usable is left after sanitizing
    #[error("invalid instance id: {0:?}")]
    InvalidInstance(String),
}

pub type Result<T> = std::result::Result<T, UploadError>;
