use std::fmt;

/// Errors that can occur during blob storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// No blob is stored under the requested key.
    NotFound(String),
    /// An I/O error occurred.
    Io(std::io::Error),
    /// The key is empty or would escape the store's namespace.
    InvalidKey(String),
    /// The remote store rejected the request or could not be reached.
    Backend(String),
    /// The store did not answer within the configured timeout.
    Timeout { operation: &'static str, secs: u64 },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "blob not found: {key}"),
            Self::Io(err) => write!(f, "storage IO error: {err}"),
            Self::InvalidKey(msg) => write!(f, "invalid blob key: {msg}"),
            Self::Backend(msg) => write!(f, "storage backend error: {msg}"),
            Self::Timeout { operation, secs } => {
                write!(f, "storage {operation} timed out after {secs}s")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
