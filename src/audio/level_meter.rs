//! Real-time audio level metering.

use crate::defaults;

/// Audio level measurements for one chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioLevel {
    /// RMS level in [0, 1]
    pub rms: f32,
    /// Peak level in [0, 1]
    pub peak: f32,
    /// Decibel level (negative values, -100 floor)
    pub db: f32,
}

impl AudioLevel {
    /// Level of pure silence.
    pub fn silent() -> Self {
        Self {
            rms: 0.0,
            peak: 0.0,
            db: -100.0,
        }
    }
}

/// Calculates and smooths audio levels in real time.
///
/// Smoothing is a one-pole filter: `y = a*y_prev + (1-a)*y_new`.
pub struct LevelMeter {
    smoothing: f32,
    last_rms: Option<f32>,
    last_peak: Option<f32>,
}

impl LevelMeter {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            last_rms: None,
            last_peak: None,
        }
    }

    /// Calculate smoothed levels for a chunk of f32 samples in [-1, 1].
    pub fn calculate(&mut self, chunk: &[f32]) -> AudioLevel {
        if chunk.is_empty() {
            return AudioLevel::silent();
        }

        let mut rms = super::rms(chunk);
        let mut peak = chunk.iter().fold(0.0_f32, |max, &s| max.max(s.abs()));

        if let Some(last) = self.last_rms {
            rms = self.smoothing * last + (1.0 - self.smoothing) * rms;
        }
        if let Some(last) = self.last_peak {
            peak = self.smoothing * last + (1.0 - self.smoothing) * peak;
        }

        self.last_rms = Some(rms);
        self.last_peak = Some(peak);

        let db = 20.0 * rms.max(1e-10).log10();

        AudioLevel {
            rms: rms.clamp(0.0, 1.0),
            peak: peak.clamp(0.0, 1.0),
            db,
        }
    }

    /// Reset smoothing history (new session).
    pub fn reset(&mut self) {
        self.last_rms = None;
        self.last_peak = None;
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(defaults::LEVEL_SMOOTHING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunk_is_silent() {
        let mut meter = LevelMeter::default();
        let level = meter.calculate(&[]);
        assert_eq!(level, AudioLevel::silent());
    }

    #[test]
    fn silence_reports_floor_db() {
        let mut meter = LevelMeter::default();
        let level = meter.calculate(&[0.0; 1600]);
        assert_eq!(level.rms, 0.0);
        assert_eq!(level.peak, 0.0);
        assert!(level.db <= -100.0 + 1e-3);
    }

    #[test]
    fn full_scale_signal_reports_unity() {
        let mut meter = LevelMeter::new(0.0); // no smoothing
        let level = meter.calculate(&[1.0; 1600]);
        assert!((level.rms - 1.0).abs() < 1e-6);
        assert!((level.peak - 1.0).abs() < 1e-6);
        assert!(level.db.abs() < 0.1);
    }

    #[test]
    fn levels_are_clamped_to_unit_range() {
        let mut meter = LevelMeter::new(0.0);
        let level = meter.calculate(&[2.0; 100]);
        assert_eq!(level.rms, 1.0);
        assert_eq!(level.peak, 1.0);
    }

    #[test]
    fn smoothing_blends_with_previous() {
        let mut meter = LevelMeter::new(0.5);
        meter.calculate(&[1.0; 100]);
        let level = meter.calculate(&[0.0; 100]);
        // y = 0.5 * 1.0 + 0.5 * 0.0
        assert!((level.rms - 0.5).abs() < 1e-6);
        assert!((level.peak - 0.5).abs() < 1e-6);
    }

    #[test]
    fn first_chunk_is_not_smoothed() {
        let mut meter = LevelMeter::new(0.9);
        let level = meter.calculate(&[0.5; 100]);
        assert!((level.rms - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reset_clears_history() {
        let mut meter = LevelMeter::new(0.5);
        meter.calculate(&[1.0; 100]);
        meter.reset();
        let level = meter.calculate(&[0.2; 100]);
        assert!((level.rms - 0.2).abs() < 1e-6);
    }

    #[test]
    fn db_scales_with_level() {
        let mut meter = LevelMeter::new(0.0);
        let loud = meter.calculate(&[0.5; 1600]).db;
        meter.reset();
        let quiet = meter.calculate(&[0.05; 1600]).db;
        // 20 dB apart for a 10x amplitude ratio
        assert!((loud - quiet - 20.0).abs() < 0.1);
    }
}
