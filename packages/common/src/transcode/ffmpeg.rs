use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

use super::error::TranscodeError;
use super::pcm::decode_to_pcm;
use super::verify::inspect_flac;
use super::{CanonicalFormat, TranscodeOutput, Transcoder};

/// Version line reported by the toolchain at startup.
#[derive(Debug, Clone)]
pub struct ToolchainInfo {
    pub version: String,
}

/// Transcoder that drives an ffmpeg binary over stdin/stdout pipes.
///
/// Nothing touches the filesystem: the upload is written to the child's
/// stdin and the FLAC stream is read from its stdout.
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

/// Why a single ffmpeg run did not produce output.
enum RunError {
    /// ffmpeg ran and rejected the input; another strategy may still work.
    Rejected(String),
    /// The toolchain itself failed; stop trying.
    Fatal(TranscodeError),
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    /// Check the binary runs and ships a FLAC encoder.
    pub async fn probe(&self) -> Result<ToolchainInfo, TranscodeError> {
        let version = self.query(&["-hide_banner", "-version"]).await?;
        let version = version
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        let encoders = self.query(&["-hide_banner", "-encoders"]).await?;
        let has_flac = encoders
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some("flac"));
        if !has_flac {
            return Err(TranscodeError::DecoderUnavailable(format!(
                "{} has no FLAC encoder",
                self.ffmpeg_path.display()
            )));
        }

        info!(
            ffmpeg = %self.ffmpeg_path.display(),
            version = %version,
            "Transcoder toolchain ready"
        );
        Ok(ToolchainInfo { version })
    }

    /// Run ffmpeg with `args` and return its stdout.
    async fn query(&self, args: &[&str]) -> Result<String, TranscodeError> {
        let run = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| TranscodeError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| self.unavailable(e))?;

        if !output.status.success() {
            return Err(TranscodeError::DecoderUnavailable(format!(
                "{} {} exited with {}",
                self.ffmpeg_path.display(),
                args.join(" "),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn timed_out(&self) -> TranscodeError {
        TranscodeError::Timeout(self.timeout.as_secs())
    }

    fn unavailable(&self, err: std::io::Error) -> TranscodeError {
        TranscodeError::DecoderUnavailable(format!("{}: {err}", self.ffmpeg_path.display()))
    }

    /// Pipe `data` through ffmpeg and collect the FLAC stream.
    ///
    /// `input_args` go before `-i` (demuxer selection, raw PCM layout). The
    /// child is killed once `deadline` passes.
    async fn encode(
        &self,
        input_args: &[String],
        data: Vec<u8>,
        deadline: Instant,
    ) -> Result<Vec<u8>, RunError> {
        if Instant::now() >= deadline {
            return Err(RunError::Fatal(self.timed_out()));
        }

        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(input_args)
            .args([
                "-i", "pipe:0", "-map", "0:a:0", "-vn", "-c:a", "flac", "-f", "flac", "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RunError::Fatal(self.unavailable(e)))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            RunError::Fatal(TranscodeError::Io(std::io::Error::other(
                "ffmpeg stdin was not captured",
            )))
        })?;

        // Feed stdin concurrently so a full stdout pipe cannot deadlock us.
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&data).await;
            drop(stdin);
            result
        });

        let output = match tokio::time::timeout_at(deadline, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| RunError::Fatal(TranscodeError::Io(e)))?,
            Err(_) => {
                writer.abort();
                return Err(RunError::Fatal(self.timed_out()));
            }
        };

        // ffmpeg closes stdin early when it gives up on the input.
        if let Ok(Err(e)) = writer.await
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            debug!(error = %e, "Failed to write full input to ffmpeg");
        }

        if !output.status.success() {
            return Err(RunError::Rejected(stderr_summary(&output.stderr)));
        }
        if output.stdout.is_empty() {
            return Err(RunError::Rejected("ffmpeg produced no output".into()));
        }
        Ok(output.stdout)
    }

    async fn finish(
        &self,
        bytes: Vec<u8>,
        deadline: Instant,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let verify = tokio::task::spawn_blocking(move || {
            let audio = inspect_flac(&bytes)?;
            Ok::<_, TranscodeError>((bytes, audio))
        });
        let (bytes, audio) = tokio::time::timeout_at(deadline, verify)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| TranscodeError::Io(std::io::Error::other(e)))??;

        Ok(TranscodeOutput {
            bytes,
            format: CanonicalFormat::Flac,
            audio,
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &[u8],
        declared_extension: &str,
    ) -> Result<TranscodeOutput, TranscodeError> {
        if input.is_empty() {
            return Err(TranscodeError::EmptyInput);
        }
        // One budget covers every attempt below.
        let deadline = Instant::now() + self.timeout;

        let mut rejection = String::from("input could not be decoded");

        // Hinted demuxer first, then let ffmpeg sniff the content.
        let mut attempts: Vec<Vec<String>> = Vec::with_capacity(2);
        if let Some(demuxer) = demuxer_for(declared_extension) {
            attempts.push(vec!["-f".into(), demuxer.into()]);
        }
        attempts.push(Vec::new());

        for args in attempts {
            match self.encode(&args, input.to_vec(), deadline).await {
                Ok(bytes) => return self.finish(bytes, deadline).await,
                Err(RunError::Rejected(msg)) => {
                    debug!(args = ?args, reason = %msg, "ffmpeg rejected input");
                    rejection = msg;
                }
                Err(RunError::Fatal(e)) => return Err(e),
            }
        }

        // Last resort: decode in-process from a seekable buffer and hand
        // ffmpeg raw PCM to encode.
        let data = input.to_vec();
        let hint = declared_extension.to_string();
        let decode = tokio::task::spawn_blocking(move || decode_to_pcm(&data, &hint));
        let pcm = tokio::time::timeout_at(deadline, decode)
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| TranscodeError::Io(std::io::Error::other(e)))?;
        let pcm = match pcm {
            Ok(pcm) => pcm,
            Err(e) => {
                debug!(error = %e, "In-process decode rejected input");
                return Err(TranscodeError::UnsupportedFormat(rejection));
            }
        };

        let args = vec![
            "-f".to_string(),
            pcm.layout.ffmpeg_format().to_string(),
            "-ar".to_string(),
            pcm.sample_rate.to_string(),
            "-ac".to_string(),
            pcm.channels.to_string(),
        ];
        match self.encode(&args, pcm.data, deadline).await {
            Ok(bytes) => self.finish(bytes, deadline).await,
            Err(RunError::Rejected(msg)) => Err(TranscodeError::UnsupportedFormat(msg)),
            Err(RunError::Fatal(e)) => Err(e),
        }
    }
}

/// ffmpeg demuxer for a filename extension, when one is known.
fn demuxer_for(extension: &str) -> Option<&'static str> {
    let demuxer = match extension {
        "wav" | "wave" => "wav",
        "mp3" => "mp3",
        "flac" => "flac",
        "ogg" | "oga" | "opus" => "ogg",
        "aac" => "aac",
        "m4a" | "mp4" | "mov" | "3gp" | "3g2" => "mov",
        "webm" | "mka" | "mkv" => "matroska",
        "aif" | "aiff" | "aifc" => "aiff",
        "wma" | "asf" => "asf",
        "amr" => "amr",
        "caf" => "caf",
        "au" | "snd" => "au",
        _ => return None,
    };
    Some(demuxer)
}

/// Last non-empty stderr line, which is where ffmpeg puts the actual reason.
fn stderr_summary(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ffmpeg exited without a message")
        .to_string()
}
