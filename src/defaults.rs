//! Default configuration constants for whisper-aloud.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Engine sample rate in Hz.
///
/// 16kHz is the Whisper native rate. All internal audio is mono at this
/// rate; other device formats are converted at the capture boundary.
pub const SAMPLE_RATE: u32 = 16000;

/// Capture chunk duration in seconds.
///
/// 100ms chunks (1600 samples at 16kHz) are small enough for responsive
/// level metering and large enough to keep per-chunk overhead negligible.
pub const CHUNK_DURATION: f64 = 0.1;

/// Samples per capture chunk at the engine sample rate.
pub const CHUNK_SAMPLES: usize = (SAMPLE_RATE as f64 * CHUNK_DURATION) as usize;

/// Maximum recording duration in seconds before an implicit stop.
pub const MAX_RECORDING_DURATION: f64 = 300.0;

/// Default Whisper model name.
///
/// "base" (multilingual) supports auto-detection of any language.
/// Use "base.en" explicitly for English-only optimized transcription.
pub const DEFAULT_MODEL: &str = "base";

/// Default language code for transcription.
///
/// "auto" lets Whisper detect the spoken language automatically.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Noise gate open threshold in dBFS.
pub const GATE_THRESHOLD_DB: f32 = -40.0;

/// Noise gate attack time in milliseconds.
pub const GATE_ATTACK_MS: f32 = 5.0;

/// Noise gate release time in milliseconds.
pub const GATE_RELEASE_MS: f32 = 50.0;

/// AGC target output level in dBFS.
pub const AGC_TARGET_DB: f32 = -18.0;

/// AGC maximum gain boost in dB.
pub const AGC_MAX_GAIN_DB: f32 = 30.0;

/// AGC minimum gain (attenuation) in dB.
pub const AGC_MIN_GAIN_DB: f32 = -10.0;

/// AGC attack time constant in milliseconds (gain reduction).
pub const AGC_ATTACK_MS: f32 = 10.0;

/// AGC release time constant in milliseconds (gain increase).
pub const AGC_RELEASE_MS: f32 = 100.0;

/// AGC RMS measurement window in milliseconds.
pub const AGC_WINDOW_MS: f32 = 300.0;

/// Denoiser strength in [0, 1].
pub const DENOISE_STRENGTH: f32 = 0.5;

/// Peak limiter ceiling in dBFS.
pub const LIMITER_CEILING_DB: f32 = -1.0;

/// Level meter smoothing factor (one-pole filter coefficient).
pub const LEVEL_SMOOTHING: f32 = 0.3;

/// Minimum interval between LevelUpdate emissions in milliseconds (10 Hz).
pub const LEVEL_EMIT_INTERVAL_MS: u64 = 100;

/// Convert a dBFS value to linear amplitude.
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
