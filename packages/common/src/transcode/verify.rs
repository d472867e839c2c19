use std::io::Cursor;

use symphonia::core::codecs::{CODEC_TYPE_FLAC, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::TranscodeError;

const FLAC_MAGIC: &[u8; 4] = b"fLaC";

/// Stream properties of an encoded FLAC payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u32,
    pub bits_per_sample: Option<u32>,
    /// Decoded frames (samples per channel).
    pub frames: u64,
    pub duration_ms: u64,
}

/// Fully decode a FLAC payload and report its stream properties.
///
/// Fails with [`TranscodeError::UnsupportedFormat`] unless `bytes` is a
/// complete, independently decodable FLAC stream with at least one frame.
/// CPU-bound; call from a blocking context.
pub fn inspect_flac(bytes: &[u8]) -> Result<AudioInfo, TranscodeError> {
    if bytes.is_empty() {
        return Err(TranscodeError::EmptyInput);
    }
    if !bytes.starts_with(FLAC_MAGIC) {
        return Err(TranscodeError::UnsupportedFormat(
            "output is missing the FLAC stream marker".into(),
        ));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    hint.with_extension("flac");

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
        .ok_or_else(|| TranscodeError::UnsupportedFormat("no audio track in output".into()))?;
    if track.codec_params.codec != CODEC_TYPE_FLAC {
        return Err(TranscodeError::UnsupportedFormat(
            "output track is not FLAC".into(),
        ));
    }

    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| TranscodeError::UnsupportedFormat("output has no sample rate".into()))?;
    let channels = params.channels.map(|c| c.count() as u32).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| TranscodeError::UnsupportedFormat(format!("codec: {e}")))?;

    let mut frames: u64 = 0;
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

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| TranscodeError::UnsupportedFormat(format!("decode: {e}")))?;
        frames += decoded.frames() as u64;
    }

    if frames == 0 {
        return Err(TranscodeError::UnsupportedFormat(
            "output contains no audio frames".into(),
        ));
    }

    Ok(AudioInfo {
        sample_rate,
        channels,
        bits_per_sample: params.bits_per_sample,
        frames,
        duration_ms: frames * 1000 / u64::from(sample_rate),
    })
}
