mod check;
mod convert;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::transcode::FfmpegTranscoder;

#[derive(Parser)]
#[command(name = "audiovault")]
#[command(
    about = "Convert audio to FLAC with the same toolchain the server uses",
    long_about = None
)]
pub struct Cli {
    /// ffmpeg binary path or name on PATH.
    #[arg(long, global = true, env = "AUDIOVAULT_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Max seconds per file.
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub async fn handle(&self) -> Result<()> {
        let transcoder =
            FfmpegTranscoder::new(&self.ffmpeg, Duration::from_secs(self.timeout_secs));
        match &self.command {
            Commands::Convert(cli) => cli.handle(&transcoder).await,
            Commands::ConvertDir(cli) => cli.handle(&transcoder).await,
            Commands::Check(cli) => cli.handle(&transcoder).await,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode one file to FLAC.
    Convert(convert::ConvertCli),
    /// Transcode every matching file in a folder.
    #[command(name = "convert-dir")]
    ConvertDir(convert::ConvertDirCli),
    /// Verify ffmpeg is runnable and has a FLAC encoder.
    Check(check::CheckCli),
}
