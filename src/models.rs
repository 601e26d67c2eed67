use std::collections::HashMap;

use axum::body::Bytes;
use serde::Serialize;

use crate::config::ParamNames;

/// one chunk request worth of protocol parameters.
/// rebuilt from the request every time, nothing about it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub identifier: String,
    pub filename: String,
    pub chunk_number: u64,
    /// declared bytes per chunk, informational
    pub chunk_size: u64,
    pub total_chunks: u64,
    /// declared bytes of the whole file, informational
    pub total_size: u64,
}

impl UploadSession {
    /// pull the session out of a parameter map.
    ///
    /// `None` means this is not an upload request: required fields missing,
    /// numbers unparsable, or chunk number outside `1..=total_chunks`
    pub fn from_params(params: &HashMap<String, String>, names: &ParamNames) -> Option<Self> {
        let get = |short: &str| {
            params
                .get(&names.key(short))
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        };
        let number = |short: &str| get(short).and_then(|v| v.parse::<u64>().ok());

        let session = Self {
            identifier: get(&names.identifier)?.to_string(),
            filename: get(&names.filename)?.to_string(),
            chunk_number: number(&names.chunk_number)?,
            chunk_size: number(&names.chunk_size).unwrap_or(0),
            total_chunks: number(&names.total_chunks)?,
            total_size: number(&names.total_size).unwrap_or(0),
        };

        if session.chunk_number == 0 || session.total_chunks == 0 {
            return None;
        }
        if session.chunk_number > session.total_chunks {
            return None;
        }
        Some(session)
    }
}

/// what the host hands the coordinator: the parameter set it found
/// (query string or form body) and the chunk bytes if one was attached
#[derive(Debug, Clone, Default)]
pub struct ChunkRequest {
    pub params: HashMap<String, String>,
    pub payload: Option<Bytes>,
}

impl ChunkRequest {
    /// metadata only request, asks whether a chunk is needed
    pub fn probe(params: HashMap<String, String>) -> Self {
        Self { params, payload: None }
    }

    /// request carrying chunk bytes
    pub fn chunk(params: HashMap<String, String>, payload: impl Into<Bytes>) -> Self {
        Self {
            params,
            payload: Some(payload.into()),
        }
    }
}

// response body for 200 / 201
#[derive(Serialize, Debug)]
pub struct UploadStatusResponse {
    pub status: &'static str,
    pub complete: bool,
    pub filename: Option<String>,
    pub extension: Option<String>,
}

// generic error response
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}
