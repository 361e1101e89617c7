use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Result, TransferError};
use crate::types::TransferId;

/// A reassembled artifact as reported by the staging backend.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub checksum: String,
}

#[async_trait]
pub trait StagingBackend: Send + Sync {
    /// Persist one chunk keyed by (transfer, file, index). Writing the
    /// same key twice overwrites harmlessly.
    async fn stage_chunk(
        &self,
        transfer: &TransferId,
        file_id: &str,
        index: usize,
        payload: &[u8],
    ) -> Result<()>;

    /// Concatenate the staged chunks `0..chunk_count` in ascending index
    /// order into one artifact, then release the staging directory.
    async fn assemble(
        &self,
        transfer: &TransferId,
        file_id: &str,
        chunk_count: usize,
        artifact_name: &str,
    ) -> Result<Artifact>;

    /// Reclaim every byte staged or assembled for a transfer. Absent
    /// state is not an error.
    async fn remove_transfer(&self, transfer: &TransferId) -> Result<()>;
}

/// On-disk staging rooted at one base directory:
/// `<base>/<transfer>/staging/<file_id>/<index>.chunk` while a file is
/// uploading, `<base>/<transfer>/artifacts/<name>` once reassembled.
pub struct DiskStaging {
    base_path: PathBuf,
}

impl DiskStaging {
    pub async fn new<P: AsRef<Path>>(base_path: P) -> Result<Self> {
        let base_path = base_path.as_ref().to_owned();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    fn transfer_dir(&self, transfer: &TransferId) -> PathBuf {
        self.base_path.join(transfer.to_string())
    }

    fn staging_dir(&self, transfer: &TransferId, file_id: &str) -> PathBuf {
        self.transfer_dir(transfer).join("staging").join(file_id)
    }

    fn chunk_path(&self, transfer: &TransferId, file_id: &str, index: usize) -> PathBuf {
        self.staging_dir(transfer, file_id)
            .join(format!("{index}.chunk"))
    }
}

#[async_trait]
impl StagingBackend for DiskStaging {
    async fn stage_chunk(
        &self,
        transfer: &TransferId,
        file_id: &str,
        index: usize,
        payload: &[u8],
    ) -> Result<()> {
        let dir = self.staging_dir(transfer, file_id);
        fs::create_dir_all(&dir).await?;
        fs::write(self.chunk_path(transfer, file_id, index), payload).await?;
        Ok(())
    }

    async fn assemble(
        &self,
        transfer: &TransferId,
        file_id: &str,
        chunk_count: usize,
        artifact_name: &str,
    ) -> Result<Artifact> {
        let artifact_dir = self.transfer_dir(transfer).join("artifacts");
        fs::create_dir_all(&artifact_dir).await?;
        let path = artifact_dir.join(artifact_name);

        let mut out = fs::File::create(&path).await?;
        let mut hasher = Sha256::new();
        let mut bytes_written = 0u64;
        for index in 0..chunk_count {
            let chunk_path = self.chunk_path(transfer, file_id, index);
            let data = fs::read(&chunk_path).await.map_err(|e| {
                TransferError::Storage(format!(
                    "staged chunk {index} of file {file_id} unreadable: {e}"
                ))
            })?;
            hasher.update(&data);
            bytes_written += data.len() as u64;
            out.write_all(&data).await?;
        }
        out.flush().await?;

        let staging = self.staging_dir(transfer, file_id);
        if let Err(e) = fs::remove_dir_all(&staging).await {
            tracing::warn!(transfer = %transfer, file_id, "failed to release staging dir: {e}");
        }

        Ok(Artifact {
            path,
            bytes_written,
            checksum: format!("{:x}", hasher.finalize()),
        })
    }

    async fn remove_transfer(&self, transfer: &TransferId) -> Result<()> {
        match fs::remove_dir_all(self.transfer_dir(transfer)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
