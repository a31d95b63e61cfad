use crate::error::{AppError, Result};
use rubato::{FftFixedInOut, Resampler};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info};

/// Resample mono audio from `source_rate` to `target_rate`
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == target_rate {
        return Ok(samples.to_vec());
    }
    if source_rate == 0 || target_rate == 0 {
        return Err(AppError::Audio(format!(
            "Cannot resample between {}Hz and {}Hz",
            source_rate, target_rate
        )));
    }

    debug!("Resampling {} samples from {}Hz to {}Hz", samples.len(), source_rate, target_rate);

    let mut resampler =
        FftFixedInOut::<f32>::new(source_rate as usize, target_rate as usize, 1024, 1)
            .map_err(|e| AppError::Audio(format!("Failed to create resampler: {}", e)))?;

    let chunk_size = resampler.input_frames_next();
    let mut output = Vec::new();

    for chunk in samples.chunks(chunk_size) {
        let mut input_chunk = chunk.to_vec();

        // Pad last chunk if needed
        if input_chunk.len() < chunk_size {
            input_chunk.resize(chunk_size, 0.0);
        }

        let result = resampler
            .process(&[input_chunk], None)
            .map_err(|e| AppError::Audio(format!("Resampling failed: {}", e)))?;

        if !result.is_empty() {
            output.extend(&result[0]);
        }
    }

    Ok(output)
}

/// Load audio from file as mono f32 at its native sample rate
pub fn load_audio_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wav" => load_wav(path),
        "mp3" | "m4a" | "ogg" | "flac" => load_compressed(path),
        _ => Err(AppError::Audio(format!("Unknown audio format: {}", extension))),
    }
}

fn load_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path).map_err(|e| AppError::Audio(e.to_string()))?;

    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels as usize;

    info!(
        "Loading WAV: {}Hz, {} channels, {:?}",
        sample_rate, channels, spec.sample_format
    );

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| AppError::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| AppError::Audio(e.to_string()))?
        }
    };

    Ok((downmix(samples, channels), sample_rate))
}

/// Decode FLAC/MP3/OGG/M4A through symphonia
fn load_compressed(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AppError::Audio(format!("Failed to probe {:?}: {}", path, e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AppError::Audio(format!("No audio track found in {:?}", path)))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AppError::Audio("Sample rate unknown".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .ok_or_else(|| AppError::Audio("Channel layout unknown".to_string()))?;

    info!("Loading {:?}: {}Hz, {} channels", path, sample_rate, channels);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AppError::Audio(format!("Failed to create decoder: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AppError::Audio(format!("Error reading packet: {}", e))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| AppError::Audio(format!("Failed to decode packet: {}", e)))?;

        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    debug!("Decoded {} interleaved samples", interleaved.len());
    Ok((downmix(interleaved, channels), sample_rate))
}

/// Convert interleaved audio to mono by averaging channels
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        samples
    }
}

/// Calculate the duration in milliseconds
pub fn duration_ms(samples: &[f32], sample_rate: u32) -> i64 {
    ((samples.len() as f64 / sample_rate as f64) * 1000.0) as i64
}
