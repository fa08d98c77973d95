//! Real-time audio conditioning chain: gate -> AGC -> denoise -> limiter.
//!
//! Each stage is stateful across chunks within one session. The pipeline is
//! owned by exactly one session; a new session builds a fresh pipeline (or
//! calls [`DspPipeline::reset`]).

pub mod agc;
pub mod denoise;
pub mod gate;
pub mod limiter;

pub use agc::Agc;
pub use denoise::Denoiser;
pub use gate::NoiseGate;
pub use limiter::PeakLimiter;

use crate::config::AudioProcessingConfig;

/// Full processing pipeline with per-stage toggles.
///
/// A fully disabled pipeline is an identity function on chunks.
pub struct DspPipeline {
    gate: Option<NoiseGate>,
    agc: Option<Agc>,
    denoiser: Option<Denoiser>,
    limiter: Option<PeakLimiter>,
}

impl DspPipeline {
    pub fn new(config: &AudioProcessingConfig, sample_rate: u32) -> Self {
        let gate = config.noise_gate_enabled.then(|| {
            NoiseGate::new(
                config.noise_gate_threshold_db,
                config.noise_gate_attack_ms,
                config.noise_gate_release_ms,
                sample_rate,
            )
        });
        let agc = config.agc_enabled.then(|| {
            Agc::new(
                config.agc_target_db,
                config.agc_max_gain_db,
                config.agc_min_gain_db,
                config.agc_attack_ms,
                config.agc_release_ms,
                config.agc_window_ms,
                sample_rate,
            )
        });
        let denoiser = config
            .denoising_enabled
            .then(|| Denoiser::new(config.denoising_strength, sample_rate));
        let limiter = config
            .limiter_enabled
            .then(|| PeakLimiter::new(config.limiter_ceiling_db));

        Self {
            gate,
            agc,
            denoiser,
            limiter,
        }
    }

    /// Process one chunk in place through all enabled stages.
    pub fn process(&mut self, chunk: &mut [f32]) {
        if let Some(gate) = &mut self.gate {
            gate.process(chunk);
        }
        if let Some(agc) = &mut self.agc {
            agc.process(chunk);
        }
        if let Some(denoiser) = &mut self.denoiser {
            denoiser.process(chunk);
        }
        if let Some(limiter) = &self.limiter {
            limiter.process(chunk);
        }
    }

    /// Reset all stage state for a new session.
    pub fn reset(&mut self) {
        if let Some(gate) = &mut self.gate {
            gate.reset();
        }
        if let Some(agc) = &mut self.agc {
            agc.reset();
        }
        if let Some(denoiser) = &mut self.denoiser {
            denoiser.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sine;
    use crate::defaults::db_to_linear;

    fn enabled_pipeline() -> DspPipeline {
        DspPipeline::new(&AudioProcessingConfig::default(), 16000)
    }

    fn disabled_config() -> AudioProcessingConfig {
        AudioProcessingConfig {
            noise_gate_enabled: false,
            agc_enabled: false,
            denoising_enabled: false,
            limiter_enabled: false,
            ..AudioProcessingConfig::default()
        }
    }

    #[test]
    fn silence_in_silence_out() {
        // All stages enabled over exact zeros: output stays below 1e-6
        let mut pipeline = enabled_pipeline();
        for _ in 0..20 {
            let mut chunk = vec![0.0_f32; 1600];
            pipeline.process(&mut chunk);
            let max = chunk.iter().fold(0.0_f32, |m, &s| m.max(s.abs()));
            assert!(max <= 1e-6, "silence amplified to {}", max);
        }
    }

    #[test]
    fn empty_chunk_is_valid() {
        let mut pipeline = enabled_pipeline();
        let mut chunk: Vec<f32> = Vec::new();
        pipeline.process(&mut chunk);
        assert!(chunk.is_empty());
    }

    #[test]
    fn limiter_ceiling_holds_for_hot_input() {
        let mut pipeline = enabled_pipeline();
        let ceiling = db_to_linear(-1.0);

        // Input beyond full scale, fed for several chunks
        for _ in 0..10 {
            let mut chunk = vec![2.0_f32; 1600];
            chunk[3] = -3.0;
            pipeline.process(&mut chunk);
            for s in &chunk {
                assert!(s.abs() <= ceiling + 1e-6, "sample {} above ceiling", s);
            }
        }
    }

    #[test]
    fn limiter_ceiling_holds_with_agc_boost() {
        // A quiet signal the AGC will push up hard must still respect the
        // ceiling
        let mut pipeline = enabled_pipeline();
        let ceiling = db_to_linear(-1.0);
        let tone = sine(440.0, 0.05, 2.0);
        for chunk in tone.chunks(1600) {
            let mut chunk = chunk.to_vec();
            pipeline.process(&mut chunk);
            for s in &chunk {
                assert!(s.abs() <= ceiling + 1e-6);
            }
        }
    }

    #[test]
    fn disabled_pipeline_is_identity() {
        let mut pipeline = DspPipeline::new(&disabled_config(), 16000);
        let original = sine(440.0, 0.3, 0.1);
        let mut chunk = original.clone();
        pipeline.process(&mut chunk);
        assert_eq!(chunk, original);
    }

    #[test]
    fn gate_output_is_clickless_through_chain() {
        let mut pipeline = DspPipeline::new(
            &AudioProcessingConfig {
                agc_enabled: false,
                denoising_enabled: false,
                ..AudioProcessingConfig::default()
            },
            16000,
        );

        // Amplitude-modulated tone crossing the gate threshold at a zero
        // crossing, so any larger step comes from the gate itself
        let mut samples = sine(440.0, 0.5, 0.15);
        for s in samples.iter_mut().skip(800).take(800) {
            *s *= 0.01;
        }
        pipeline.process(&mut samples);

        let max_step = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f32, f32::max);
        assert!(max_step < 0.15);
    }

    #[test]
    fn reset_gives_fresh_state() {
        let mut pipeline = enabled_pipeline();
        let tone = sine(440.0, 0.3, 1.0);
        for chunk in tone.chunks(1600) {
            let mut chunk = chunk.to_vec();
            pipeline.process(&mut chunk);
        }
        pipeline.reset();

        // After reset, silence still stays silent (no leftover gain/envelope)
        let mut chunk = vec![0.0_f32; 1600];
        pipeline.process(&mut chunk);
        assert!(chunk.iter().all(|&s| s.abs() <= 1e-6));
    }
}
