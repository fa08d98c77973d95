//! WAV file loading for one-shot transcription mode.

use crate::audio::{downmix_to_mono, resample};
use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, WhisperAloudError};
use std::io::Read;
use std::path::Path;

/// Read a WAV file into f32 mono samples at the engine rate.
///
/// # Arguments
/// * `path` - WAV file to read; arbitrary sample rates and channel counts
///   are accepted, integer and float sample formats alike
///
/// # Returns
/// Mono f32 samples resampled to 16kHz.
///
/// # Errors
/// Returns `AudioFormat` if the data cannot be parsed as WAV.
pub fn read_wav_file(path: &Path) -> Result<Vec<f32>> {
    let file = std::fs::File::open(path)?;
    read_wav(Box::new(std::io::BufReader::new(file)))
}

/// Read WAV data from any reader (for testing/flexibility).
pub fn read_wav(reader: Box<dyn Read + Send>) -> Result<Vec<f32>> {
    let mut wav_reader =
        hound::WavReader::new(reader).map_err(|e| WhisperAloudError::AudioFormat {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

    let spec = wav_reader.spec();
    let source_rate = spec.sample_rate;
    let source_channels = spec.channels as usize;

    let raw_samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| WhisperAloudError::AudioFormat {
                    message: format!("Failed to read WAV samples: {}", e),
                })?
        }
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WhisperAloudError::AudioFormat {
                message: format!("Failed to read WAV samples: {}", e),
            })?,
    };

    let mono = downmix_to_mono(&raw_samples, source_channels);
    Ok(resample(&mono, source_rate, SAMPLE_RATE))
}
