// src/audio_loader.rs

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::audio::PcmBuffer;
use crate::error::{Error, Result};

/// Decodes the first audio track of a file into interleaved PCM at its native rate.
/// Downmixing and resampling are left to the fingerprinter.
pub fn load_audio_file(file_path: &Path) -> Result<PcmBuffer> {
    let src = File::open(file_path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|s| s.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("unsupported container: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
        .ok_or_else(|| Error::Decode("no decodable audio track".into()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("no decoder for track: {}", e)))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut stream_format: Option<(u32, usize)> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(Error::Decode("stream parameters changed mid-file".into()));
            }
            Err(err) => return Err(Error::Decode(err.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(err)) => {
                // corrupt frames are dropped, the rest of the stream is still usable
                warn!(error = %err, "skipping undecodable packet");
                continue;
            }
            Err(err) => return Err(Error::Decode(err.to_string())),
        };

        let spec = *decoded.spec();
        let current = (spec.rate, spec.channels.count());
        match stream_format {
            None => stream_format = Some(current),
            Some(first) if first != current => {
                return Err(Error::Decode(format!(
                    "stream format changed from {:?} to {:?}",
                    first, current
                )));
            }
            Some(_) => {}
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let (sample_rate, channels) =
        stream_format.ok_or_else(|| Error::Decode("file contains no audio".into()))?;
    let channels = u16::try_from(channels)
        .map_err(|_| Error::UnsupportedFormat(format!("{} channels", channels)))?;
    debug!(samples = samples.len(), sample_rate, channels, "decoded audio");

    let pcm = PcmBuffer::new(samples, sample_rate, channels)?;
    info!(
        path = %file_path.display(),
        duration_secs = pcm.duration_secs(),
        sample_rate,
        channels,
        "loaded audio file"
    );
    Ok(pcm)
}
