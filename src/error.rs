use thiserror::Error;

use crate::types::TransferId;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transfer not found: {0}")]
    NotFound(TransferId),
    #[error("transfer already downloaded: {0}")]
    AlreadyDownloaded(TransferId),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, TransferError>;
