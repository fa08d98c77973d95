//! Stationary spectral-subtraction denoiser.
//!
//! Adapts to a noise profile taken from the start of each session, then
//! subtracts the estimated noise power from the magnitude spectrum of every
//! chunk. Degenerate input (empty chunks, FFT failures) passes through
//! unchanged, so the stage is always safe to keep in the chain.

use realfft::RealFftPlanner;

/// Seconds of leading audio used to estimate the session noise floor.
const PROFILE_SECONDS: f64 = 0.5;

pub struct Denoiser {
    strength: f32,
    planner: RealFftPlanner<f32>,
    noise_power: f64,
    profile_samples: usize,
    profile_target: usize,
}

impl Denoiser {
    pub fn new(strength: f32, sample_rate: u32) -> Self {
        Self {
            strength: strength.clamp(0.0, 1.0),
            planner: RealFftPlanner::new(),
            noise_power: 0.0,
            profile_samples: 0,
            profile_target: (sample_rate as f64 * PROFILE_SECONDS) as usize,
        }
    }

    /// Process a chunk in place.
    ///
    /// Chunks arriving while the noise profile is still accumulating pass
    /// through unchanged.
    pub fn process(&mut self, samples: &mut [f32]) {
        if samples.is_empty() || self.strength <= 0.0 {
            return;
        }

        if self.profile_samples < self.profile_target {
            self.accumulate_profile(samples);
            return;
        }

        self.subtract(samples);
    }

    /// Fold a chunk into the running mean-power noise estimate.
    fn accumulate_profile(&mut self, samples: &[f32]) {
        let chunk_power: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let total = self.profile_samples + samples.len();
        self.noise_power =
            (self.noise_power * self.profile_samples as f64 + chunk_power) / total as f64;
        self.profile_samples = total;
    }

    fn subtract(&mut self, samples: &mut [f32]) {
        let n = samples.len();
        let r2c = self.planner.plan_fft_forward(n);
        let c2r = self.planner.plan_fft_inverse(n);

        let mut spectrum = r2c.make_output_vec();
        let mut indata = samples.to_vec();
        if r2c.process(&mut indata, &mut spectrum).is_err() {
            return;
        }

        // Expected per-bin noise power of an unnormalized N-point FFT over a
        // signal with mean sample power `noise_power` is N * noise_power.
        let noise_bin = self.noise_power * n as f64 * self.strength as f64;

        for bin in spectrum.iter_mut() {
            let mag2 = bin.norm_sqr() as f64;
            let gain = if mag2 > 1e-12 {
                let div = 1.0 - noise_bin / mag2;
                if div > 0.0 { div.sqrt() as f32 } else { 0.0 }
            } else {
                0.0
            };
            *bin *= gain;
        }

        let mut outdata = c2r.make_output_vec();
        if c2r.process(&mut spectrum, &mut outdata).is_err() {
            return;
        }

        // realfft's inverse is unnormalized
        let scale = 1.0 / n as f32;
        for (out, sample) in outdata.iter().zip(samples.iter_mut()) {
            *sample = out * scale;
        }
    }

    /// Reset the noise profile (new session).
    pub fn reset(&mut self) {
        self.noise_power = 0.0;
        self.profile_samples = 0;
    }
}
