//! Audio capture, conversion and level metering.

pub mod capture;
pub mod level_meter;
pub mod wav;

use crate::defaults;

/// Mix multi-channel audio to mono by averaging channels.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio to the target rate using linear interpolation.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as f32
            }
        })
        .collect()
}

/// Peak-normalize audio to the target level. Silence passes through.
pub fn normalize(samples: &mut [f32], target_level: f32) {
    let peak = samples.iter().fold(0.0_f32, |max, &s| max.max(s.abs()));
    if peak > 0.0 {
        let scale = target_level / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    }
}

/// Trim leading and trailing silence using windowed RMS voice detection.
///
/// Keeps 100ms of padding around the detected speech. Audio with no
/// detected voice activity is returned unchanged.
pub fn trim_silence(samples: &[f32], sample_rate: u32, threshold: f32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let window = (sample_rate as usize / 40).max(1); // ~25ms
    let hop = (sample_rate as usize / 100).max(1); // ~10ms

    let mut first_active: Option<usize> = None;
    let mut last_active: Option<usize> = None;

    let mut i = 0;
    while i + window <= samples.len() {
        let rms = rms(&samples[i..i + window]);
        if rms > threshold {
            if first_active.is_none() {
                first_active = Some(i);
            }
            last_active = Some(i + window);
        }
        i += hop;
    }

    let (Some(first), Some(last)) = (first_active, last_active) else {
        return samples.to_vec();
    };

    let padding = sample_rate as usize / 10; // 100ms
    let start = first.saturating_sub(padding);
    let end = (last + padding).min(samples.len());
    samples[start..end].to_vec()
}

/// Root-mean-square amplitude of a sample slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Generate a sine test tone (used by tests and the benchmark path).
pub fn sine(freq_hz: f32, amplitude: f32, duration_secs: f32) -> Vec<f32> {
    let rate = defaults::SAMPLE_RATE as f32;
    let n = (rate * duration_secs) as usize;
    (0..n)
        .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq_hz * i as f32 / rate).sin())
        .collect()
}
