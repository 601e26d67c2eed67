use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::Result;
use crate::staging::{apply_mode, ensure_dir_exists, AssemblyClaim, ChunkFile};

/// concatenates staged chunks into the final file
#[derive(Debug, Clone)]
pub struct Assembler {
    file_mode: u32,
}

impl Assembler {
    pub fn new(file_mode: u32) -> Self {
        Self { file_mode }
    }

    /// build `dest` from `chunks`, ordered by chunk number.
    ///
    /// `Ok(false)` when `dest` already exists (someone else won) or a chunk
    /// could not be copied; in the latter case nothing is left at `dest`.
    /// only a failure to create the destination directory is an error
    pub async fn assemble(&self, chunks: &[ChunkFile], dest: &Path) -> Result<bool> {
        self.run(chunks, dest, None).await
    }

    /// like `assemble`, keeping `claim` fresh after every chunk so a slow
    /// assembly never looks abandoned to other requests
    pub async fn assemble_claimed(&self, chunks: &[ChunkFile], dest: &Path, claim: &AssemblyClaim) -> Result<bool> {
        self.run(chunks, dest, Some(claim)).await
    }

    async fn run(&self, chunks: &[ChunkFile], dest: &Path, claim: Option<&AssemblyClaim>) -> Result<bool> {
        tracing::debug!("Assembling {} chunks into {:?}", chunks.len(), dest);

        let mut ordered: Vec<&ChunkFile> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.number);

        if let Some(parent) = dest.parent() {
            ensure_dir_exists(parent).await?;
        }

        // the exclusive create is what decides the winner between racing assemblers
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!("Final file {:?} already exists, not assembling", dest);
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!("Could not claim final file {:?}: {}", dest, e);
                return Ok(false);
            }
        }

        let part = part_path(dest);
        match self.write_and_swap(&ordered, &part, dest, claim).await {
            Ok(size) => {
                tracing::info!("✅ Assembled {:?} ({} bytes)", dest, size);
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Assembly of {:?} failed: {}", dest, e);
                let _ = fs::remove_file(&part).await;
                let _ = fs::remove_file(dest).await;
                Ok(false)
            }
        }
    }

    async fn write_and_swap(
        &self,
        chunks: &[&ChunkFile],
        part: &Path,
        dest: &Path,
        claim: Option<&AssemblyClaim>,
    ) -> std::io::Result<u64> {
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(part)
            .await?;

        let mut size = 0u64;
        for chunk in chunks {
            tracing::trace!("Appending chunk {} from {:?}", chunk.number, chunk.path);
            let mut input = fs::File::open(&chunk.path).await?;
            size += tokio::io::copy(&mut input, &mut out).await?;
            if let Some(claim) = claim {
                claim.refresh().await;
            }
        }
        out.flush().await?;
        out.sync_all().await?;
        drop(out);

        apply_mode(part, self.file_mode).await?;
        fs::rename(part, dest).await?;
        Ok(size)
    }
}

// hidden sibling of the destination, same directory so the rename stays atomic
fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4()))
}
