#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use quickdrop::registry::{RegistryConfig, TransferRegistry};
    use quickdrop::staging::{Artifact, DiskStaging, StagingBackend};
    use quickdrop::{ChunkOutcome, ChunkUpload, TransferError, TransferId};
    use tempfile::TempDir;

    /// Helper to initialize a registry over a temporary staging directory
    async fn create_registry(config: RegistryConfig) -> (Arc<TransferRegistry>, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let staging = Arc::new(
            DiskStaging::new(temp_dir.path())
                .await
                .expect("can't create disk staging"),
        );
        (Arc::new(TransferRegistry::new(staging, config)), temp_dir)
    }

    fn chunk_meta(
        file_id: &str,
        name: &str,
        file_index: u32,
        size: u64,
        chunk_index: usize,
        total_chunks: usize,
    ) -> ChunkUpload {
        ChunkUpload::new(
            file_id.to_string(),
            name.to_string(),
            file_index,
            size,
            chunk_index,
            total_chunks,
        )
        .expect("valid chunk metadata")
    }

    #[tokio::test]
    async fn test_create_and_exists() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;

        let id = registry
            .create_transfer(2, 1500)
            .await
            .expect("Failed to create transfer");
        assert!(registry.exists(&id).await);
        assert!(!registry.exists(&TransferId::random()).await);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_files() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;

        let result = registry.create_transfer(0, 100).await;
        assert!(matches!(result, Err(TransferError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_list_files_unknown_transfer() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;

        let result = registry.list_files(&TransferId::random()).await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_single_chunk_file_completes() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 5).await.expect("create");

        let outcome = registry
            .record_chunk(&id, chunk_meta("f1", "hello.txt", 1, 5, 0, 1), b"hello")
            .await
            .expect("Failed to record chunk");
        assert_eq!(outcome, ChunkOutcome::Completed);

        let listing = registry.list_files(&id).await.expect("Failed to list files");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "hello.txt");
        assert_eq!(listing.files[0].size, 5);
        assert_eq!(listing.declared_total_size, 5);

        let artifact = std::fs::read(&listing.files[0].artifact_path)
            .expect("Failed to read artifact");
        assert_eq!(artifact, b"hello");
    }

    #[tokio::test]
    async fn test_out_of_order_reassembly() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 16).await.expect("create");

        let reference: Vec<u8> = (0u8..16).collect();
        let chunks: Vec<&[u8]> = reference.chunks(4).collect();

        // Deliver in scrambled order; only the 4th distinct index finalizes.
        for (n, index) in [2usize, 0, 3, 1].into_iter().enumerate() {
            let outcome = registry
                .record_chunk(
                    &id,
                    chunk_meta("f1", "data.bin", 1, 16, index, 4),
                    chunks[index],
                )
                .await
                .expect("Failed to record chunk");
            if n < 3 {
                assert_eq!(
                    outcome,
                    ChunkOutcome::Staged {
                        received: n + 1,
                        expected: 4
                    }
                );
            } else {
                assert_eq!(outcome, ChunkOutcome::Completed);
            }
        }

        let listing = registry.list_files(&id).await.expect("list");
        let artifact = std::fs::read(&listing.files[0].artifact_path).expect("read artifact");
        assert_eq!(artifact, reference);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_is_idempotent() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 8).await.expect("create");

        let first = registry
            .record_chunk(&id, chunk_meta("f1", "a.bin", 1, 8, 0, 2), b"asdf")
            .await
            .expect("record");
        assert_eq!(
            first,
            ChunkOutcome::Staged {
                received: 1,
                expected: 2
            }
        );

        // Retry of the same index must not advance the count.
        let retry = registry
            .record_chunk(&id, chunk_meta("f1", "a.bin", 1, 8, 0, 2), b"asdf")
            .await
            .expect("record retry");
        assert_eq!(
            retry,
            ChunkOutcome::Staged {
                received: 1,
                expected: 2
            }
        );

        let done = registry
            .record_chunk(&id, chunk_meta("f1", "a.bin", 1, 8, 1, 2), b"qwer")
            .await
            .expect("record last");
        assert_eq!(done, ChunkOutcome::Completed);

        let listing = registry.list_files(&id).await.expect("list");
        let artifact = std::fs::read(&listing.files[0].artifact_path).expect("read artifact");
        assert_eq!(artifact, b"asdfqwer");
    }

    #[tokio::test]
    async fn test_finalize_fires_exactly_once() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 4).await.expect("create");

        let done = registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"once")
            .await
            .expect("record");
        assert_eq!(done, ChunkOutcome::Completed);

        // A late retry of the final chunk is ignored, not re-finalized.
        let late = registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"once")
            .await
            .expect("late retry");
        assert_eq!(late, ChunkOutcome::AlreadyComplete);

        let listing = registry.list_files(&id).await.expect("list");
        assert_eq!(listing.files.len(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_chunk_count_rejected() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 10).await.expect("create");

        registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 10, 0, 3), b"abc")
            .await
            .expect("record");

        let result = registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 10, 1, 5), b"def")
            .await;
        assert!(matches!(result, Err(TransferError::InvalidInput(_))));

        // No partial mutation: progress for the file is unchanged.
        let ok = registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 10, 1, 3), b"def")
            .await
            .expect("record valid");
        assert_eq!(
            ok,
            ChunkOutcome::Staged {
                received: 2,
                expected: 3
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_chunk_metadata() {
        assert!(ChunkUpload::new("f1".into(), "a.txt".into(), 1, 4, 3, 3).is_err());
        assert!(ChunkUpload::new("f1".into(), "a.txt".into(), 1, 4, 0, 0).is_err());
        assert!(ChunkUpload::new("".into(), "a.txt".into(), 1, 4, 0, 1).is_err());
        assert!(ChunkUpload::new("f1".into(), "".into(), 1, 4, 0, 1).is_err());
        assert!(ChunkUpload::new("../f1".into(), "a.txt".into(), 1, 4, 0, 1).is_err());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (registry, temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(1, 4).await.expect("create");
        registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"data")
            .await
            .expect("record");

        let transfer_dir = temp_dir.path().join(id.to_string());
        assert!(transfer_dir.exists());

        registry.remove(&id).await;
        assert!(!registry.exists(&id).await);
        assert!(!transfer_dir.exists());

        // Second removal of the same id is a no-op.
        registry.remove(&id).await;
        assert!(!registry.exists(&id).await);
    }

    /// End-to-end: declare 2 files / 1500 bytes, upload a.txt as two
    /// 250-byte chunks and b.txt as one 1000-byte chunk, list, download,
    /// then verify the single-shot consumption.
    #[tokio::test]
    async fn test_full_transfer_scenario() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(2, 1500).await.expect("create");

        let a_bytes = vec![b'a'; 500];
        registry
            .record_chunk(&id, chunk_meta("fa", "a.txt", 1, 500, 0, 2), &a_bytes[..250])
            .await
            .expect("a chunk 0");
        registry
            .record_chunk(&id, chunk_meta("fa", "a.txt", 1, 500, 1, 2), &a_bytes[250..])
            .await
            .expect("a chunk 1");

        let b_bytes = vec![b'b'; 1000];
        registry
            .record_chunk(&id, chunk_meta("fb", "b.txt", 2, 1000, 0, 1), &b_bytes)
            .await
            .expect("b chunk 0");

        let listing = registry.list_files(&id).await.expect("list");
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.files[0].name, "a.txt");
        assert_eq!(listing.files[0].size, 500);
        assert_eq!(listing.files[1].name, "b.txt");
        assert_eq!(listing.files[1].size, 1000);
        assert_eq!(listing.declared_total_size, 1500);

        let archive = registry.download_archive(&id).await.expect("download");
        assert_eq!(archive.file_name, format!("quickdrop-{id}.zip"));

        let cursor = std::io::Cursor::new(archive.bytes);
        let mut zip = zip::ZipArchive::new(cursor).expect("open archive");
        {
            use std::io::Read;
            let mut entry = zip.by_name("a.txt").expect("a.txt entry");
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).expect("read a.txt");
            assert_eq!(contents, a_bytes);
        }
        {
            use std::io::Read;
            let mut entry = zip.by_name("b.txt").expect("b.txt entry");
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).expect("read b.txt");
            assert_eq!(contents, b_bytes);
        }

        // Single-shot: the transfer is consumed by the first download.
        assert!(!registry.exists(&id).await);
        let second = registry.download_archive(&id).await;
        assert!(matches!(second, Err(TransferError::AlreadyDownloaded(_))));
    }

    /// DiskStaging that dawdles inside chunk writes, widening the window
    /// between fetching a transfer and touching its disk state.
    struct SlowStaging {
        inner: DiskStaging,
        delay: Duration,
    }

    #[async_trait]
    impl StagingBackend for SlowStaging {
        async fn stage_chunk(
            &self,
            transfer: &TransferId,
            file_id: &str,
            index: usize,
            payload: &[u8],
        ) -> quickdrop::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.stage_chunk(transfer, file_id, index, payload).await
        }

        async fn assemble(
            &self,
            transfer: &TransferId,
            file_id: &str,
            chunk_count: usize,
            artifact_name: &str,
        ) -> quickdrop::Result<Artifact> {
            self.inner
                .assemble(transfer, file_id, chunk_count, artifact_name)
                .await
        }

        async fn remove_transfer(&self, transfer: &TransferId) -> quickdrop::Result<()> {
            self.inner.remove_transfer(transfer).await
        }
    }

    #[tokio::test]
    async fn test_remove_during_chunk_write_leaves_no_disk_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let staging = Arc::new(SlowStaging {
            inner: DiskStaging::new(temp_dir.path())
                .await
                .expect("can't create disk staging"),
            delay: Duration::from_millis(400),
        });
        let registry = Arc::new(TransferRegistry::new(staging, RegistryConfig::default()));
        let id = registry.create_transfer(1, 4).await.expect("create");

        let r = Arc::clone(&registry);
        let upload = tokio::spawn(async move {
            r.record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"data")
                .await
        });
        // Let the upload take the transfer lock, then remove mid-write.
        tokio::time::sleep(Duration::from_millis(100)).await;
        registry.remove(&id).await;

        // Whichever side the removal linearized on, nothing may survive:
        // either the chunk landed first and removal reclaimed it, or the
        // tombstone turned the upload away before it touched disk.
        let result = upload.await.expect("task panicked");
        assert!(matches!(
            result,
            Ok(ChunkOutcome::Completed) | Err(TransferError::NotFound(_))
        ));
        assert!(!registry.exists(&id).await);
        assert!(!temp_dir.path().join(id.to_string()).exists());

        // A chunk arriving after removal is turned away at the map.
        let late = registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"data")
            .await;
        assert!(matches!(late, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_chunks_rejected_after_download() {
        let (registry, _temp_dir) = create_registry(RegistryConfig::default()).await;
        let id = registry.create_transfer(2, 8).await.expect("create");

        registry
            .record_chunk(&id, chunk_meta("f1", "a.txt", 1, 4, 0, 1), b"data")
            .await
            .expect("record");
        registry.download_archive(&id).await.expect("download");

        let result = registry
            .record_chunk(&id, chunk_meta("f2", "b.txt", 2, 4, 0, 1), b"more")
            .await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }
}
