mod file;
mod transfer;
mod upload;

pub use file::FileRecord;
pub use transfer::{Transfer, TransferId, TransferListing};
pub use upload::{ChunkOutcome, ChunkUpload, UploadProgress};
