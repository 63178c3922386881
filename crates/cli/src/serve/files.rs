//! On-disk store for uploaded letter PDFs.
//!
//! Stored names are content-addressed: `<sha256-prefix>-<uuid>.pdf`. The
//! name recorded on a letter is the only handle clients get back, and
//! lookups sanitize it so the public download route cannot escape the
//! store directory.

use std::path::{Path, PathBuf};

use paraf_core::EngineError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Largest accepted upload: 5 MB.
pub(crate) const MAX_FILE_SIZE: usize = 5 * 1024 * 1024;

const SHA_PREFIX_LEN: usize = 16;

#[derive(Debug, Clone)]
pub(crate) struct LetterFileStore {
    dir: PathBuf,
}

impl LetterFileStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub(crate) async fn init(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    /// Validate and persist an uploaded letter file, returning the stored
    /// name. PDF only, size-capped.
    pub(crate) async fn store(&self, bytes: &[u8]) -> Result<String, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::validation("letterFile", "must not be empty"));
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(EngineError::validation(
                "letterFile",
                format!("must be at most {} bytes", MAX_FILE_SIZE),
            ));
        }
        if !bytes.starts_with(b"%PDF-") {
            return Err(EngineError::validation("letterFile", "must be a PDF file"));
        }

        let digest = Sha256::digest(bytes);
        let mut prefix = String::with_capacity(SHA_PREFIX_LEN);
        for byte in digest.iter().take(SHA_PREFIX_LEN / 2) {
            prefix.push_str(&format!("{:02x}", byte));
        }
        let name = format!("{}-{}.pdf", prefix, Uuid::new_v4());

        tokio::fs::write(self.dir.join(&name), bytes)
            .await
            .map_err(|e| EngineError::Storage(format!("writing letter file: {}", e)))?;
        Ok(name)
    }

    /// Read a stored letter file by name. `Ok(None)` when absent or when
    /// the name fails sanitization.
    pub(crate) async fn open(&self, name: &str) -> Result<Option<Vec<u8>>, EngineError> {
        if !is_safe_name(name) {
            return Ok(None);
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Storage(format!("reading letter file: {}", e))),
        }
    }

    /// Best-effort removal of a stored file whose letter never committed.
    pub(crate) async fn discard(&self, name: &str) {
        if !is_safe_name(name) {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(self.dir.join(name)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(file = name, error = %e, "failed to remove orphaned letter file");
            }
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Reject path separators and parent-directory references.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && name.ends_with(".pdf")
}
