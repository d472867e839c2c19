use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Args;
use common::transcode::{CanonicalFormat, FfmpegTranscoder, Transcoder, extension_hint};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Args)]
pub struct ConvertCli {
    /// Audio file to convert.
    pub input: PathBuf,

    /// Output path. Defaults to the input with a `.flac` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl ConvertCli {
    pub async fn handle(&self, transcoder: &FfmpegTranscoder) -> Result<()> {
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| output_path_for(&self.input));
        if output == self.input {
            bail!("output would overwrite the input {}", self.input.display());
        }

        let duration_ms = convert_file(transcoder, &self.input, &output).await?;
        println!(
            "{} -> {} ({} ms)",
            self.input.display(),
            output.display(),
            duration_ms
        );
        Ok(())
    }
}

#[derive(Args)]
pub struct ConvertDirCli {
    /// Folder to scan. Not recursive.
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Extension of the files to convert, without the dot.
    #[arg(long, default_value = "wav")]
    pub ext: String,

    /// Replace existing `.flac` files.
    #[arg(long)]
    pub overwrite: bool,
}

impl ConvertDirCli {
    pub async fn handle(&self, transcoder: &FfmpegTranscoder) -> Result<()> {
        let inputs = collect_inputs(&self.dir, &self.ext).await?;
        if inputs.is_empty() {
            println!("no .{} files in {}", self.ext, self.dir.display());
            return Ok(());
        }

        let mut converted = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for input in &inputs {
            let output = output_path_for(input);
            if output == *input {
                skipped += 1;
                continue;
            }
            if !self.overwrite && fs::try_exists(&output).await.unwrap_or(false) {
                debug!(output = %output.display(), "Skipping existing output");
                println!("skip   {} (exists)", output.display());
                skipped += 1;
                continue;
            }

            match convert_file(transcoder, input, &output).await {
                Ok(duration_ms) => {
                    println!("ok     {} ({} ms)", input.display(), duration_ms);
                    converted += 1;
                }
                Err(e) => {
                    warn!(input = %input.display(), error = %e, "Conversion failed");
                    println!("FAILED {}: {:#}", input.display(), e);
                    failed += 1;
                }
            }
        }

        println!("converted {converted}, skipped {skipped}, failed {failed}");
        if failed > 0 {
            bail!("{failed} of {} files failed to convert", inputs.len());
        }
        Ok(())
    }
}

/// Transcode `input` into `output` and return the decoded duration.
async fn convert_file(
    transcoder: &FfmpegTranscoder,
    input: &Path,
    output: &Path,
) -> Result<u64> {
    let data = fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))?;
    let hint = input
        .file_name()
        .and_then(|name| name.to_str())
        .map(extension_hint)
        .unwrap_or_default();

    let encoded = transcoder
        .transcode(&data, &hint)
        .await
        .with_context(|| format!("failed to transcode {}", input.display()))?;
    fs::write(output, &encoded.bytes)
        .await
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(encoded.audio.duration_ms)
}

fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension(CanonicalFormat::Flac.extension())
}

/// Regular files in `dir` whose extension matches `ext` case-insensitively, sorted by name.
async fn collect_inputs(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let wanted = ext.trim_start_matches('.').to_ascii_lowercase();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {}", dir.display()))?;

    let mut inputs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.to_ascii_lowercase() == wanted);
        if matches {
            inputs.push(path);
        }
    }
    inputs.sort();
    Ok(inputs)
}
