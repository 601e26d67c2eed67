use std::path::{Path, PathBuf};

use tokio::fs;

use crate::utils::random_string;

/// works out where an assembled file goes, `upload_root/[instance/]name`
#[derive(Debug, Clone)]
pub struct FinalPathResolver {
    dir: PathBuf,
    suffix_len: usize,
}

impl FinalPathResolver {
    /// `dir` already includes the instance namespace, if any
    pub fn new(dir: impl Into<PathBuf>, suffix_len: usize) -> Self {
        Self {
            dir: dir.into(),
            suffix_len,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// path for `candidate` (already sanitized).
    ///
    /// when that name is taken, one `_XXXXX` suffix goes in front of the extension.
    /// the new name is not checked again, the exclusive create in the assembler
    /// refuses to clobber anything if it collides too
    pub async fn resolve(&self, candidate: &str) -> PathBuf {
        let path = self.dir.join(candidate);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return path;
        }

        let renamed = suffixed_name(candidate, &random_string(self.suffix_len));
        tracing::debug!("{} already exists, using {}", candidate, renamed);
        self.dir.join(renamed)
    }
}

/// `report.pdf` + `aB3x9` -> `report_aB3x9.pdf`
pub fn suffixed_name(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, suffix, ext),
        _ => format!("{}_{}", name, suffix),
    }
}
