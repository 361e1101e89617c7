pub mod archive;
pub mod error;
pub mod expiry;
pub mod registry;
pub mod staging;

mod types;

pub use error::{Result, TransferError};
pub use types::*;
