//! Audio normalization to the canonical lossless format.
//!
//! Every upload is decoded and re-encoded to FLAC before it is stored. The
//! [`Transcoder`] trait is the seam the ingestion pipeline depends on;
//! [`FfmpegTranscoder`] is the production implementation.

mod error;
mod ffmpeg;
mod pcm;
mod verify;

use async_trait::async_trait;

pub use error::TranscodeError;
pub use ffmpeg::{FfmpegTranscoder, ToolchainInfo};
pub use verify::{AudioInfo, inspect_flac};

/// The single encoding every stored payload uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalFormat {
    Flac,
}

impl CanonicalFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Flac => "flac",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Flac => "audio/flac",
        }
    }
}

/// Result of a successful transcode.
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub bytes: Vec<u8>,
    pub format: CanonicalFormat,
    /// Stream properties read back from the encoded output.
    pub audio: AudioInfo,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Decode `input` and re-encode it to the canonical format.
    ///
    /// `declared_extension` is a lowercase hint taken from the original
    /// filename. It may be empty or wrong; implementations fall back to
    /// content sniffing.
    async fn transcode(
        &self,
        input: &[u8],
        declared_extension: &str,
    ) -> Result<TranscodeOutput, TranscodeError>;
}

/// Lowercased extension of `filename`, or an empty string.
pub fn extension_hint(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}
