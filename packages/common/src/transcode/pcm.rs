use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::TranscodeError;

/// Interleaved PCM decoded in-process, ready to be piped to an encoder.
pub(crate) struct RawPcm {
    pub sample_rate: u32,
    pub channels: u32,
    pub layout: PcmLayout,
    /// Little-endian interleaved samples.
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PcmLayout {
    S16,
    S32,
}

impl PcmLayout {
    /// ffmpeg raw demuxer name for this layout.
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            Self::S16 => "s16le",
            Self::S32 => "s32le",
        }
    }
}

/// Decode a buffer to PCM with symphonia.
///
/// Used when the external decoder cannot demux the input from a pipe (for
/// example MP4 files whose index sits after the media data). The buffer is
/// fully seekable here. Sources deeper than 16 bits are kept at 32 bits so the
/// re-encode stays lossless. CPU-bound; call from a blocking context.
pub(crate) fn decode_to_pcm(data: &[u8], extension: &str) -> Result<RawPcm, TranscodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data.to_vec())), Default::default());

    let mut hint = Hint::new();
    if !extension.is_empty() {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| TranscodeError::UnsupportedFormat(format!("probe: {e}")))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| TranscodeError::UnsupportedFormat("no audio track found".into()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let sample_rate = params
        .sample_rate
        .ok_or_else(|| TranscodeError::UnsupportedFormat("unknown sample rate".into()))?;
    let layout = match params.bits_per_sample {
        Some(bits) if bits > 16 => PcmLayout::S32,
        _ => PcmLayout::S16,
    };

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| TranscodeError::UnsupportedFormat(format!("codec: {e}")))?;

    let mut channels = params.channels.map(|c| c.count() as u32).unwrap_or(0);
    let mut out: Vec<u8> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(TranscodeError::UnsupportedFormat(format!("packet: {e}")));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => {
                return Err(TranscodeError::UnsupportedFormat(format!("decode: {e}")));
            }
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();
        if num_frames == 0 {
            continue;
        }
        channels = spec.channels.count() as u32;

        match layout {
            PcmLayout::S16 => {
                let mut buf = SampleBuffer::<i16>::new(num_frames as u64, spec);
                buf.copy_interleaved_ref(decoded);
                for sample in buf.samples() {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
            PcmLayout::S32 => {
                let mut buf = SampleBuffer::<i32>::new(num_frames as u64, spec);
                buf.copy_interleaved_ref(decoded);
                for sample in buf.samples() {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }
    }

    if out.is_empty() || channels == 0 {
        return Err(TranscodeError::UnsupportedFormat(
            "no audio samples decoded".into(),
        ));
    }

    Ok(RawPcm {
        sample_rate,
        channels,
        layout,
        data: out,
    })
}
