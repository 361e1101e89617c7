use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A fully reassembled file belonging to a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    /// Sender-supplied display name. Not sanitized; two files in one
    /// transfer may carry the same name.
    pub name: String,
    /// Size the sender declared at upload start, not the reassembled
    /// byte count.
    pub size: u64,
    /// Sha256 hex digest of the reassembled bytes.
    pub checksum: String,
    /// The sender's declared position among the transfer's files. Used
    /// for on-disk artifact naming and archive name disambiguation.
    pub original_index: u32,
    /// Artifact on disk, exclusively owned by the transfer and deleted
    /// with it.
    pub artifact_path: PathBuf,
}
