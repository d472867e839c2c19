mod error;
mod hash;
mod key;
mod traits;

pub mod filesystem;
#[cfg(feature = "object-storage")]
pub mod object;

pub use error::StorageError;
pub use hash::ContentHash;
pub use key::{prefixed_key, validate_key};
pub use traits::{BlobRef, BlobStore, BoxReader, StorageBackend};
