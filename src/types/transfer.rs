use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FileRecord, UploadProgress};

/// Opaque lookup key for one sharing session. Random 128 bits, so a live
/// or evicted id is never handed out twice within a process lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One sharing session. Mutated only behind the registry's per-transfer lock.
#[derive(Debug)]
pub struct Transfer {
    pub id: TransferId,
    pub created_at: DateTime<Utc>,
    /// Sender-declared totals, for display only. Never checked against
    /// the bytes actually received.
    pub declared_file_count: u32,
    pub declared_total_size: u64,
    /// Completed files, in completion order.
    pub files: Vec<FileRecord>,
    /// In-flight uploads keyed by the caller-chosen file id.
    pub pending: HashMap<String, UploadProgress>,
    /// File ids that have already been finalized. Tracked separately
    /// because the staging state a finalize derives from is deleted
    /// once the artifact exists.
    pub completed: HashSet<String>,
    /// Single-shot consumption flag; terminal once set.
    pub downloaded: bool,
    /// Tombstone set by removal while holding this transfer's lock. A
    /// mutating caller that fetched the entry before it left the map
    /// must observe this and back off instead of writing to a reclaimed
    /// subtree.
    pub removed: bool,
}

impl Transfer {
    pub fn new(id: TransferId, declared_file_count: u32, declared_total_size: u64) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            declared_file_count,
            declared_total_size,
            files: Vec::new(),
            pending: HashMap::new(),
            completed: HashSet::new(),
            downloaded: false,
            removed: false,
        }
    }
}

/// Read-only snapshot returned by `list_files`. May be partial while the
/// sender is still uploading.
#[derive(Debug, Clone, Serialize)]
pub struct TransferListing {
    pub files: Vec<FileRecord>,
    pub declared_total_size: u64,
}
