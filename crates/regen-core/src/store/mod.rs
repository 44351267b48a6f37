//! Storage seams: key/blob storage for the ledger and live page content.

pub mod blob;
pub mod content;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use content::{ContentStore, FsContentStore, MemoryContentStore};
