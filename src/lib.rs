//! server side of the resumable chunked upload protocol.
//!
//! chunks are staged on disk per upload identifier; once every chunk is there
//! the first request to notice claims the upload and concatenates the chunks
//! into the final file. the filesystem is the only state, so any number of
//! workers or processes can serve the same upload.

pub mod assembler;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod final_path;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod server;
pub mod staging;
pub mod state;
pub mod utils;

pub use coordinator::{UploadCoordinator, UploadStatus};
pub use error::UploadError;
