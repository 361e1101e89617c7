use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::archive::{self, Archive};
use crate::error::{Result, TransferError};
use crate::staging::StagingBackend;
use crate::types::{
    ChunkOutcome, ChunkUpload, FileRecord, Transfer, TransferId, TransferListing, UploadProgress,
};

/// Tunables for a registry instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Hard lifetime of a transfer from creation. Fires regardless of
    /// download state or in-flight uploads.
    pub ttl: Duration,
    /// When true (the default), the first successful download consumes
    /// the transfer.
    pub single_shot: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            single_shot: true,
        }
    }
}

/// Central map of live transfers.
///
/// The outer lock only guards the map structure and is held briefly; each
/// transfer carries its own lock, so chunk traffic for unrelated
/// transfers never serializes. Owned explicitly by the caller (no
/// globals) so independent registries can coexist in one process.
pub struct TransferRegistry {
    transfers: RwLock<HashMap<TransferId, Arc<Mutex<Transfer>>>>,
    staging: Arc<dyn StagingBackend>,
    config: RegistryConfig,
}

impl TransferRegistry {
    pub fn new(staging: Arc<dyn StagingBackend>, config: RegistryConfig) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            staging,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register an empty transfer and hand back its fresh id.
    pub async fn create_transfer(
        &self,
        declared_file_count: u32,
        declared_total_size: u64,
    ) -> Result<TransferId> {
        if declared_file_count == 0 {
            return Err(TransferError::InvalidInput(
                "transfer must declare at least one file".into(),
            ));
        }

        let id = TransferId::random();
        let transfer = Transfer::new(id, declared_file_count, declared_total_size);
        self.transfers
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(transfer)));
        info!(transfer = %id, files = declared_file_count, bytes = declared_total_size, "transfer created");
        Ok(id)
    }

    /// True iff the transfer is present and, in the single-shot variant,
    /// not yet consumed.
    pub async fn exists(&self, id: &TransferId) -> bool {
        let transfers = self.transfers.read().await;
        match transfers.get(id) {
            Some(entry) => {
                let transfer = entry.lock().await;
                !(self.config.single_shot && transfer.downloaded)
            }
            None => false,
        }
    }

    /// Snapshot of the completed files plus the declared total size.
    /// Still answers after a single-shot download, as long as the record
    /// has not expired.
    pub async fn list_files(&self, id: &TransferId) -> Result<TransferListing> {
        let entry = self.get(id).await?;
        let transfer = entry.lock().await;
        if transfer.removed {
            return Err(TransferError::NotFound(*id));
        }
        Ok(TransferListing {
            files: transfer.files.clone(),
            declared_total_size: transfer.declared_total_size,
        })
    }

    /// Stage one chunk, finalizing the file when its last distinct index
    /// arrives. Idempotent per (file id, chunk index): a re-sent chunk
    /// overwrites its staged bytes and leaves the received count alone.
    pub async fn record_chunk(
        &self,
        id: &TransferId,
        upload: ChunkUpload,
        payload: &[u8],
    ) -> Result<ChunkOutcome> {
        let entry = self.get(id).await?;
        let mut transfer = entry.lock().await;

        if transfer.removed {
            return Err(TransferError::NotFound(*id));
        }
        if self.config.single_shot && transfer.downloaded {
            return Err(TransferError::NotFound(*id));
        }

        if transfer.completed.contains(&upload.file_id) {
            debug!(transfer = %id, file_id = %upload.file_id, chunk = upload.chunk_index, "chunk for finalized file ignored");
            return Ok(ChunkOutcome::AlreadyComplete);
        }

        let progress = transfer
            .pending
            .entry(upload.file_id.clone())
            .or_insert_with(|| UploadProgress::new(&upload));
        if progress.expected_chunks != upload.total_chunks {
            return Err(TransferError::InvalidInput(format!(
                "file {} declared {} chunks, got a chunk claiming {}",
                upload.file_id, progress.expected_chunks, upload.total_chunks
            )));
        }

        // Stage to disk before counting, so a failed write never bumps
        // the received count.
        self.staging
            .stage_chunk(id, &upload.file_id, upload.chunk_index, payload)
            .await?;
        let progress = transfer
            .pending
            .get_mut(&upload.file_id)
            .ok_or_else(|| TransferError::Storage(format!("pending upload {} vanished", upload.file_id)))?;
        progress.staged.insert(upload.chunk_index);

        let received = progress.staged.len();
        let expected = progress.expected_chunks;
        debug!(transfer = %id, file_id = %upload.file_id, received, expected, "chunk staged");

        if !progress.is_complete() {
            return Ok(ChunkOutcome::Staged { received, expected });
        }

        self.finalize(&mut transfer, &upload.file_id).await?;
        Ok(ChunkOutcome::Completed)
    }

    /// Reassemble a fully-staged file into its artifact. Caller holds the
    /// transfer lock and has verified every index is staged. Transfer
    /// state is only touched once the artifact exists on disk, so a
    /// failed assemble leaves the upload pending and retryable.
    async fn finalize(&self, transfer: &mut Transfer, file_id: &str) -> Result<()> {
        let Some(progress) = transfer.pending.get(file_id) else {
            return Err(TransferError::Storage(format!(
                "no pending upload for file {file_id}"
            )));
        };
        let artifact_name = progress.original_index.to_string();
        let chunk_count = progress.expected_chunks;

        let artifact = self
            .staging
            .assemble(&transfer.id, file_id, chunk_count, &artifact_name)
            .await?;

        if let Some(progress) = transfer.pending.remove(file_id) {
            info!(
                transfer = %transfer.id,
                file = %progress.file_name,
                bytes = artifact.bytes_written,
                "file reassembled"
            );
            let record = FileRecord {
                name: progress.file_name,
                size: progress.declared_size,
                checksum: artifact.checksum,
                original_index: progress.original_index,
                artifact_path: artifact.path,
            };
            transfer.completed.insert(progress.file_id);
            transfer.files.push(record);
        }
        Ok(())
    }

    /// Build the archive of everything completed so far. In the
    /// single-shot variant the transfer lock is held across the build and
    /// the `downloaded` flip, so exactly one concurrent caller can win;
    /// the rest see `AlreadyDownloaded`.
    pub async fn download_archive(&self, id: &TransferId) -> Result<Archive> {
        let entry = self.get(id).await?;
        let mut transfer = entry.lock().await;

        if transfer.removed {
            return Err(TransferError::NotFound(*id));
        }
        if self.config.single_shot && transfer.downloaded {
            return Err(TransferError::AlreadyDownloaded(*id));
        }

        let archive = archive::build_archive(id, &transfer.files).await?;
        if self.config.single_shot {
            transfer.downloaded = true;
        }
        info!(transfer = %id, files = transfer.files.len(), bytes = archive.bytes.len(), "archive served");
        Ok(archive)
    }

    /// Delete the transfer and reclaim its disk subtree. Idempotent:
    /// removing an absent id is a no-op. Reclamation failures are logged
    /// and swallowed; cleanup never propagates.
    ///
    /// The tombstone is set and the subtree deleted while holding the
    /// transfer's own lock, so a chunk write that fetched the entry
    /// before it left the map can never land after reclamation and
    /// resurrect the directory.
    pub async fn remove(&self, id: &TransferId) {
        let Some(entry) = self.transfers.write().await.remove(id) else {
            return;
        };
        let mut transfer = entry.lock().await;
        transfer.removed = true;
        if let Err(e) = self.staging.remove_transfer(id).await {
            warn!(transfer = %id, "failed to reclaim transfer storage: {e}");
        }
        info!(transfer = %id, "transfer removed");
    }

    /// Ids whose TTL has elapsed as of `now`.
    pub(crate) async fn expired_ids(&self, now: DateTime<Utc>) -> Vec<TransferId> {
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let transfers = self.transfers.read().await;
        let mut expired = Vec::new();
        for (id, entry) in transfers.iter() {
            let transfer = entry.lock().await;
            if transfer.created_at + ttl <= now {
                expired.push(*id);
            }
        }
        expired
    }

    async fn get(&self, id: &TransferId) -> Result<Arc<Mutex<Transfer>>> {
        let transfers = self.transfers.read().await;
        transfers
            .get(id)
            .cloned()
            .ok_or(TransferError::NotFound(*id))
    }
}
