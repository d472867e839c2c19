use thiserror::Error;

/// Errors produced while normalizing audio to the canonical format.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("input is empty")]
    EmptyInput,

    #[error("unsupported or corrupt audio: {0}")]
    UnsupportedFormat(String),

    #[error("decoder toolchain unavailable: {0}")]
    DecoderUnavailable(String),

    #[error("transcoding timed out after {0}s")]
    Timeout(u64),

    #[error("transcoder IO error: {0}")]
    Io(#[from] std::io::Error),
}
