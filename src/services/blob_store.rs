use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Opaque artifact storage. The lifecycle core only ever stores a new
/// artifact, resolves one for streaming, or deletes one during expiry; how
/// bytes are kept is the store's business.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist artifact bytes for a job, returning the opaque reference
    /// recorded on the job row.
    async fn put(&self, job_id: &str, bytes: &[u8]) -> AppResult<String>;

    /// Remove an artifact. Deleting a reference that no longer exists is not
    /// an error: purge must be idempotent across sweep cycles.
    async fn delete(&self, artifact_ref: &str) -> AppResult<()>;

    /// Local path for streaming the artifact to a client.
    fn resolve(&self, artifact_ref: &str) -> PathBuf;
}

/// Filesystem-backed store: one file per artifact under a root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| AppError::Store(format!("Failed to create artifact directory: {e}")))?;
        Ok(Self { root })
    }

    fn path_for(&self, artifact_ref: &str) -> PathBuf {
        // Refs are generated internally as bare file names; strip any path
        // components regardless.
        let name = Path::new(artifact_ref)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| artifact_ref.to_string());
        self.root.join(name)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, job_id: &str, bytes: &[u8]) -> AppResult<String> {
        let artifact_ref = format!("{job_id}.json");
        let path = self.path_for(&artifact_ref);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Store(format!("Failed to write artifact: {e}")))?;
        info!("Stored artifact {} ({} bytes)", artifact_ref, bytes.len());
        Ok(artifact_ref)
    }

    async fn delete(&self, artifact_ref: &str) -> AppResult<()> {
        let path = self.path_for(artifact_ref);
        match tokio::fs::remove_file(&path).await {
            Ok(_) => {
                info!("Purged artifact {}", artifact_ref);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Store(format!(
                "Failed to purge artifact {artifact_ref}: {e}"
            ))),
        }
    }

    fn resolve(&self, artifact_ref: &str) -> PathBuf {
        self.path_for(artifact_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();

        let artifact_ref = store.put("EXP_001", b"{}").await.unwrap();
        assert!(store.resolve(&artifact_ref).exists());

        store.delete(&artifact_ref).await.unwrap();
        assert!(!store.resolve(&artifact_ref).exists());

        // Idempotent purge.
        store.delete(&artifact_ref).await.unwrap();
    }

    #[tokio::test]
    async fn refs_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).await.unwrap();
        let resolved = store.resolve("../../etc/passwd");
        assert!(resolved.starts_with(dir.path()));
    }
}
