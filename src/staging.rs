use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{Result, UploadError};
use crate::utils::sanitize_filename;

/// mode for every directory we create
pub const DIR_MODE: u32 = 0o775;

/// marker taken inside a staging dir by whoever assembles it
pub const ASSEMBLY_LOCK_NAME: &str = ".assembly.lock";

// prefix for in-flight chunk writes. leading dot keeps them out of chunk listings
const PART_PREFIX: &str = ".part-";

/// a staged chunk on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub number: u64,
    pub path: PathBuf,
}

/// canonical staged name for a chunk, e.g. `report.pdf.0007`
pub fn chunk_file_name(filename: &str, chunk_number: u64) -> String {
    format!("{}.{:04}", sanitize_filename(filename), chunk_number)
}

/// create `path` (and parents) unless it is already there.
///
/// losing the creation race to another request is fine, anything else is not
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);

    match builder.create(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && is_dir(path).await => Ok(()),
        Err(source) => {
            tracing::error!("Failed to create directory {:?}: {}", path, source);
            Err(UploadError::CreateDir {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

/// apply the configured permission bits
pub async fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
        Ok(())
    }
}

/// owns `staging_root/[instance/]` and the per-upload directories below it
#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
    file_mode: u32,
}

impl StagingStore {
    /// `root` already includes the instance namespace, if any
    pub fn new(root: impl Into<PathBuf>, file_mode: u32) -> Self {
        Self {
            root: root.into(),
            file_mode,
        }
    }

    /// staging directory for an identifier. pure path computation
    pub fn upload_dir(&self, identifier: &str) -> PathBuf {
        self.root.join(sanitize_filename(identifier))
    }

    pub fn chunk_path(&self, identifier: &str, filename: &str, chunk_number: u64) -> PathBuf {
        self.upload_dir(identifier)
            .join(chunk_file_name(filename, chunk_number))
    }

    /// whether chunk `chunk_number` has been staged. never creates anything
    pub async fn chunk_exists(&self, identifier: &str, filename: &str, chunk_number: u64) -> bool {
        let path = self.chunk_path(identifier, filename, chunk_number);
        fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// stage a chunk.
    ///
    /// bytes go to a private part file first and are renamed onto the
    /// canonical name, so the chunk path never exists half written.
    /// writing the same chunk again replaces it
    pub async fn write_chunk(
        &self,
        identifier: &str,
        filename: &str,
        chunk_number: u64,
        data: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.upload_dir(identifier);
        let name = chunk_file_name(filename, chunk_number);
        let chunk_path = dir.join(&name);

        // the dir can vanish under us when another request just finished
        // this upload and cleaned up, so recreate it once and start over
        let mut attempt = 0;
        loop {
            attempt += 1;
            ensure_dir_exists(&dir).await?;

            let part_path = dir.join(format!("{}{}-{}", PART_PREFIX, name, Uuid::new_v4()));
            tracing::trace!("Staging chunk {} via {:?}", chunk_number, part_path);

            match self.write_part(&part_path, &chunk_path, data).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::NotFound && attempt < 2 => {
                    tracing::debug!("Staging directory {:?} vanished, retrying chunk {}", dir, chunk_number);
                    let _ = fs::remove_file(&part_path).await;
                }
                Err(source) => {
                    tracing::error!("Failed to stage chunk {:?}: {}", chunk_path, source);
                    let _ = fs::remove_file(&part_path).await;
                    return Err(UploadError::WriteChunk {
                        path: chunk_path,
                        source,
                    });
                }
            }
        }

        tracing::debug!(
            "Stored chunk {} for {} ({} bytes)",
            chunk_number,
            identifier,
            data.len()
        );
        Ok(chunk_path)
    }

    async fn write_part(&self, part_path: &Path, chunk_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(part_path)
            .await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        apply_mode(part_path, self.file_mode).await?;
        fs::rename(part_path, chunk_path).await
    }

    /// staged chunks `1..=total_chunks` for this filename, ordered by chunk number.
    /// part files, markers and strays are skipped
    pub async fn list_chunks(
        &self,
        identifier: &str,
        filename: &str,
        total_chunks: u64,
    ) -> std::io::Result<Vec<ChunkFile>> {
        let dir = self.upload_dir(identifier);
        let prefix = format!("{}.", sanitize_filename(filename));

        let mut chunks = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(number) = parse_chunk_number(name, &prefix) else {
                continue;
            };
            if number == 0 || number > total_chunks {
                tracing::trace!("Skipping out of range chunk file {}", name);
                continue;
            }
            chunks.push(ChunkFile {
                number,
                path: entry.path(),
            });
        }

        chunks.sort_by_key(|c| c.number);
        Ok(chunks)
    }

    /// take the assembly marker for an upload.
    ///
    /// `None` if someone else holds it, or the staging dir is already gone
    /// (another request finished the job). markers older than `ttl` are left
    /// over from a crashed assembler and get reclaimed; a zero `ttl` never
    /// reclaims anything
    pub async fn claim_assembly(&self, identifier: &str, ttl: Duration) -> Option<AssemblyClaim> {
        let path = self.upload_dir(identifier).join(ASSEMBLY_LOCK_NAME);

        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Some(AssemblyClaim { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if ttl.is_zero() || !is_stale(&path, ttl).await {
                        tracing::debug!("Assembly of {} already claimed", identifier);
                        return None;
                    }
                    if !take_over_stale(&path, ttl).await {
                        return None;
                    }
                }
                Err(e) => {
                    tracing::debug!("Could not claim assembly of {}: {}", identifier, e);
                    return None;
                }
            }
        }
        None
    }

    /// best effort, only called once the final file is in place
    pub async fn delete_staging_dir(&self, identifier: &str) {
        let dir = self.upload_dir(identifier);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => tracing::debug!("Removed staging directory {:?}", dir),
            Err(e) => tracing::warn!("Failed to remove staging directory {:?}: {}", dir, e),
        }
    }
}

/// proof of holding the assembly marker for one upload
#[derive(Debug)]
pub struct AssemblyClaim {
    path: PathBuf,
}

impl AssemblyClaim {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// bump the marker's mtime so a long running assembly is not mistaken
    /// for an abandoned one. never recreates a marker that is gone
    pub async fn refresh(&self) {
        let touched = async {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)
                .await?;
            file.write_all(chrono::Utc::now().to_rfc3339().as_bytes())
                .await?;
            file.flush().await
        };
        if let Err(e) = touched.await {
            tracing::warn!("Failed to refresh assembly marker {:?}: {}", self.path, e);
        }
    }

    /// give the marker back so a later request can try again
    pub async fn release(self) {
        if let Err(e) = fs::remove_file(&self.path).await {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("Failed to release assembly marker {:?}: {}", self.path, e);
            }
        }
    }
}

async fn is_stale(path: &Path, ttl: Duration) -> bool {
    let Ok(modified) = fs::metadata(path).await.and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > ttl)
        .unwrap_or(false)
}

// remove a stale marker so the caller can create a fresh one.
// reclaimers serialize on a guard file, so a marker that was reclaimed and
// recreated a moment ago is seen as fresh and left alone
async fn take_over_stale(path: &Path, ttl: Duration) -> bool {
    let guard = path.with_file_name(format!("{}.reclaim", ASSEMBLY_LOCK_NAME));
    match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&guard)
        .await
    {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            // only a crash mid-reclaim leaves an old guard behind
            if is_stale(&guard, ttl).await {
                tracing::warn!("Removing abandoned reclaim guard {:?}", guard);
                let _ = fs::remove_file(&guard).await;
            }
            return false;
        }
        Err(e) => {
            tracing::debug!("Could not take reclaim guard {:?}: {}", guard, e);
            return false;
        }
    }

    let reclaimed = is_stale(path, ttl).await && fs::remove_file(path).await.is_ok();
    if reclaimed {
        tracing::warn!("Reclaimed stale assembly marker {:?}", path);
    }
    let _ = fs::remove_file(&guard).await;
    reclaimed
}

fn parse_chunk_number(name: &str, prefix: &str) -> Option<u64> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
