use std::collections::BTreeSet;

use crate::error::{Result, TransferError};

/// Metadata accompanying one uploaded chunk, validated on construction so
/// malformed requests are rejected before any shared state is touched.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_id: String,
    pub file_name: String,
    pub file_index: u32,
    pub declared_size: u64,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl ChunkUpload {
    pub fn new(
        file_id: String,
        file_name: String,
        file_index: u32,
        declared_size: u64,
        chunk_index: usize,
        total_chunks: usize,
    ) -> Result<Self> {
        if file_id.is_empty() {
            return Err(TransferError::InvalidInput("file id must not be empty".into()));
        }
        // The file id names a staging directory, so it must stay a single
        // path component.
        if file_id.contains('/') || file_id.contains('\\') || file_id.contains("..") {
            return Err(TransferError::InvalidInput(format!(
                "file id is not a valid path component: {file_id}"
            )));
        }
        if file_name.is_empty() {
            return Err(TransferError::InvalidInput("file name must not be empty".into()));
        }
        if total_chunks == 0 {
            return Err(TransferError::InvalidInput(
                "total chunk count must be positive".into(),
            ));
        }
        if chunk_index >= total_chunks {
            return Err(TransferError::InvalidInput(format!(
                "chunk index {chunk_index} out of range for {total_chunks} chunks"
            )));
        }

        Ok(Self {
            file_id,
            file_name,
            file_index,
            declared_size,
            chunk_index,
            total_chunks,
        })
    }
}

/// Result of recording one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk staged; more are still expected for this file.
    Staged { received: usize, expected: usize },
    /// This was the last missing chunk; the file has been reassembled.
    Completed,
    /// The file was already finalized; the chunk was ignored.
    AlreadyComplete,
}

/// Per-file bookkeeping while chunks are arriving. Dropped from the
/// transfer's pending map once the file is finalized.
#[derive(Debug)]
pub struct UploadProgress {
    pub file_id: String,
    pub file_name: String,
    pub declared_size: u64,
    pub original_index: u32,
    pub expected_chunks: usize,
    /// Distinct chunk indices staged so far. The received count is this
    /// set's length, so a re-sent chunk can never skew it.
    pub staged: BTreeSet<usize>,
}

impl UploadProgress {
    pub fn new(upload: &ChunkUpload) -> Self {
        Self {
            file_id: upload.file_id.clone(),
            file_name: upload.file_name.clone(),
            declared_size: upload.declared_size,
            original_index: upload.file_index,
            expected_chunks: upload.total_chunks,
            staged: BTreeSet::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.staged.len() == self.expected_chunks
    }
}
