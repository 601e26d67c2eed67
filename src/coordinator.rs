use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::Instrument;

use crate::assembler::Assembler;
use crate::completion::is_complete;
use crate::config::{Config, ParamNames};
use crate::error::{Result, UploadError};
use crate::final_path::FinalPathResolver;
use crate::models::{ChunkRequest, UploadSession};
use crate::staging::StagingStore;
use crate::utils::{find_extension, remove_extension, sanitize_filename};

/// outcome of one chunk or probe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// chunk not staged yet, client should send it (204)
    NotFound,
    /// chunk is staged, upload not finished (200)
    Accepted,
    /// this call assembled the final file (201)
    Created,
}

impl UploadStatus {
    pub fn code(self) -> u16 {
        match self {
            UploadStatus::NotFound => 204,
            UploadStatus::Accepted => 200,
            UploadStatus::Created => 201,
        }
    }
}

/// drives one request through staging, completion check and assembly.
///
/// build a fresh one per request; the result accessors describe what that
/// single call did
#[derive(Debug)]
pub struct UploadCoordinator {
    staging: StagingStore,
    resolver: FinalPathResolver,
    assembler: Assembler,
    params: ParamNames,
    delete_staging_dir: bool,
    lock_ttl: Duration,
    instance_id: Option<String>,
    filename_override: Option<String>,
    original_filename: Option<String>,
    filepath: Option<PathBuf>,
    extension: Option<String>,
    is_upload_complete: bool,
}

impl UploadCoordinator {
    /// coordinator rooted at the configured directories.
    ///
    /// `instance_id` overrides the configured namespace; it has to be a
    /// plain path component already, it is never rewritten
    pub fn new(config: &Config, instance_id: Option<&str>) -> Result<Self> {
        let instance_id = match instance_id.or(config.instance_id.as_deref()) {
            Some(raw) if !raw.trim().is_empty() => {
                if sanitize_filename(raw) != raw {
                    return Err(UploadError::InvalidInstance(raw.to_string()));
                }
                Some(raw.to_string())
            }
            _ => None,
        };

        let (staging_root, upload_root) = match &instance_id {
            Some(id) => (config.staging_dir.join(id), config.upload_dir.join(id)),
            None => (config.staging_dir.clone(), config.upload_dir.clone()),
        };

        Ok(Self {
            staging: StagingStore::new(staging_root, config.file_mode),
            resolver: FinalPathResolver::new(upload_root, config.random_suffix_len),
            assembler: Assembler::new(config.file_mode),
            params: config.params.clone(),
            delete_staging_dir: config.delete_staging_dir,
            lock_ttl: config.assembly_lock_ttl,
            instance_id,
            filename_override: None,
            original_filename: None,
            filepath: None,
            extension: None,
            is_upload_complete: false,
        })
    }

    /// handle one request.
    ///
    /// `Ok(None)` when the request carries no usable upload parameters, the
    /// host decides what that means. with a payload this stores the chunk,
    /// without one it is a probe
    pub async fn process(&mut self, request: &ChunkRequest) -> Result<Option<UploadStatus>> {
        let Some(session) = UploadSession::from_params(&request.params, &self.params) else {
            tracing::debug!("Request has no usable resumable parameters");
            return Ok(None);
        };

        self.original_filename = Some(session.filename.clone());
        self.extension = find_extension(&session.filename).map(str::to_string);

        let span = tracing::debug_span!(
            "upload",
            identifier = %session.identifier,
            chunk = session.chunk_number,
            total = session.total_chunks,
            instance = self.instance_id.as_deref().unwrap_or("-"),
        );

        let status = match &request.payload {
            Some(data) => self.handle_chunk(&session, data).instrument(span).await?,
            None => self.handle_test_chunk(&session).instrument(span).await?,
        };
        Ok(Some(status))
    }

    /// payload-bearing request: stage the chunk if new, then try to finish
    pub async fn handle_chunk(&mut self, session: &UploadSession, data: &[u8]) -> Result<UploadStatus> {
        let (id, name, number) = (&session.identifier, &session.filename, session.chunk_number);

        if !self.staging.chunk_exists(id, name, number).await {
            self.staging.write_chunk(id, name, number, data).await?;
        } else {
            tracing::debug!("Chunk {} already staged, skipping write", number);
        }

        if is_complete(&self.staging, id, name, session.total_chunks).await
            && self.complete_upload(session).await?
        {
            return Ok(UploadStatus::Created);
        }
        Ok(UploadStatus::Accepted)
    }

    /// probe: does the client still need to send this chunk?
    pub async fn handle_test_chunk(&mut self, session: &UploadSession) -> Result<UploadStatus> {
        let (id, name, number) = (&session.identifier, &session.filename, session.chunk_number);

        if !self.staging.chunk_exists(id, name, number).await {
            return Ok(UploadStatus::NotFound);
        }

        if is_complete(&self.staging, id, name, session.total_chunks).await
            && self.complete_upload(session).await?
        {
            return Ok(UploadStatus::Created);
        }
        Ok(UploadStatus::Accepted)
    }

    // true only if this call produced the final file
    async fn complete_upload(&mut self, session: &UploadSession) -> Result<bool> {
        let id = &session.identifier;

        let Some(claim) = self.staging.claim_assembly(id, self.lock_ttl).await else {
            return Ok(false);
        };

        // the staging dir may have been finished and recreated since the completeness check
        let chunks = match self
            .staging
            .list_chunks(id, &session.filename, session.total_chunks)
            .await
        {
            Ok(chunks) if chunks.len() as u64 == session.total_chunks => chunks,
            Ok(chunks) => {
                tracing::debug!(
                    "Only {}/{} chunks present at assembly time",
                    chunks.len(),
                    session.total_chunks
                );
                claim.release().await;
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!("Failed to list chunks for {}: {}", id, e);
                claim.release().await;
                return Ok(false);
            }
        };

        let candidate =
            sanitize_filename(self.filename_override.as_deref().unwrap_or(&session.filename));
        let dest = self.resolver.resolve(&candidate).await;
        self.extension = dest
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(find_extension)
            .map(str::to_string);
        self.filepath = Some(dest.clone());

        match self.assembler.assemble_claimed(&chunks, &dest, &claim).await {
            Ok(true) => {
                self.is_upload_complete = true;
                if self.delete_staging_dir {
                    self.staging.delete_staging_dir(id).await;
                } else {
                    tracing::debug!("Keeping staging directory for {}", id);
                }
                Ok(true)
            }
            Ok(false) => {
                claim.release().await;
                Ok(false)
            }
            Err(e) => {
                claim.release().await;
                Err(e)
            }
        }
    }

    /// use this name (sanitized) for the final file instead of the declared one
    pub fn set_filename(&mut self, filename: impl Into<String>) -> &mut Self {
        self.filename_override = Some(filename.into());
        self
    }

    /// the override set with `set_filename`
    pub fn filename(&self) -> Option<&str> {
        self.filename_override.as_deref()
    }

    /// declared filename of the last processed request
    pub fn original_filename(&self, without_extension: bool) -> Option<&str> {
        let name = self.original_filename.as_deref()?;
        if without_extension {
            Some(remove_extension(name))
        } else {
            Some(name)
        }
    }

    /// where the final file was (or would have been) written
    pub fn filepath(&self) -> Option<&Path> {
        self.filepath.as_deref()
    }

    /// base name of the final file, including any collision suffix
    pub fn stored_file_name(&self) -> Option<String> {
        self.filepath
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn is_upload_complete(&self) -> bool {
        self.is_upload_complete
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn upload_dir(&self) -> &Path {
        self.resolver.dir()
    }
}
