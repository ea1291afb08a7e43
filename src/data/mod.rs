//! Data container import and export

pub mod archive;
pub mod transfer;

pub use transfer::DataTransfer;
