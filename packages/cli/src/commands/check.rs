use anyhow::{Context, Result};
use clap::Args;
use common::transcode::FfmpegTranscoder;

#[derive(Args)]
pub struct CheckCli {}

impl CheckCli {
    pub async fn handle(&self, transcoder: &FfmpegTranscoder) -> Result<()> {
        let info = transcoder.probe().await.with_context(|| {
            format!("ffmpeg at {} is not usable", transcoder.ffmpeg_path().display())
        })?;
        println!("ok: {}", info.version);
        Ok(())
    }
}
