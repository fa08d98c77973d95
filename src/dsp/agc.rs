//! Automatic Gain Control using sliding-window RMS.

use crate::defaults::db_to_linear;
use std::collections::VecDeque;

/// AGC with a trailing RMS window and asymmetric gain smoothing.
///
/// Attack (gain decrease) is faster than release (gain increase) to prevent
/// clipping on transients. Digital silence is never amplified.
pub struct Agc {
    target: f32,
    max_gain: f32,
    min_gain: f32,
    attack_coeff: f64,
    release_coeff: f64,
    window_samples: usize,
    gain: f64,
    window: VecDeque<f64>,
    window_sum: f64,
}

fn coeff(time_ms: f32, sample_rate: u32) -> f64 {
    let samples = (time_ms as f64 * sample_rate as f64 / 1000.0).max(1.0);
    (-1.0 / samples).exp()
}

impl Agc {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target_db: f32,
        max_gain_db: f32,
        min_gain_db: f32,
        attack_ms: f32,
        release_ms: f32,
        window_ms: f32,
        sample_rate: u32,
    ) -> Self {
        let window_samples = ((window_ms * sample_rate as f32 / 1000.0) as usize).max(1);
        Self {
            target: db_to_linear(target_db),
            max_gain: db_to_linear(max_gain_db),
            min_gain: db_to_linear(min_gain_db),
            attack_coeff: coeff(attack_ms, sample_rate),
            release_coeff: coeff(release_ms, sample_rate),
            window_samples,
            gain: 1.0,
            window: VecDeque::with_capacity(window_samples),
            window_sum: 0.0,
        }
    }

    /// Apply gain control to a chunk in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let sq = (*sample as f64) * (*sample as f64);
            self.window.push_back(sq);
            self.window_sum += sq;
            if self.window.len() > self.window_samples {
                // window_sum drifts slightly from repeated subtraction; the
                // error is bounded by f64 precision over one session
                self.window_sum -= self.window.pop_front().unwrap_or(0.0);
            }
            let rms = (self.window_sum.max(0.0) / self.window.len() as f64).sqrt();

            let desired = if rms < 1e-8 {
                1.0
            } else {
                ((self.target as f64) / rms).clamp(self.min_gain as f64, self.max_gain as f64)
            };

            let c = if desired < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = (c * self.gain + (1.0 - c) * desired)
                .clamp(self.min_gain as f64, self.max_gain as f64);

            *sample = (*sample as f64 * self.gain) as f32;
        }
    }

    /// Current smoothed gain (linear).
    pub fn current_gain(&self) -> f32 {
        self.gain as f32
    }

    /// Reset gain and window state (new session).
    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.window.clear();
        self.window_sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agc() -> Agc {
        Agc::new(-18.0, 30.0, -10.0, 10.0, 100.0, 300.0, 16000)
    }

    #[test]
    fn silence_is_not_amplified() {
        let mut a = agc();
        let mut samples = vec![0.0_f32; 4800];
        a.process(&mut samples);
        assert!(samples.iter().all(|&s| s == 0.0));
        assert!((a.current_gain() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn quiet_signal_is_boosted_toward_target() {
        let mut a = agc();
        // -46 dB input, target -18 dB: wants ~28 dB of boost
        let mut samples = vec![0.005_f32; 16000];
        a.process(&mut samples);
        let tail_rms = crate::audio::rms(&samples[8000..]);
        let target = db_to_linear(-18.0);
        assert!(
            tail_rms > target * 0.5,
            "tail rms {} well below target {}",
            tail_rms,
            target
        );
    }

    #[test]
    fn loud_signal_is_attenuated() {
        let mut a = agc();
        let mut samples = vec![0.9_f32; 16000];
        a.process(&mut samples);
        let tail_rms = crate::audio::rms(&samples[8000..]);
        assert!(tail_rms < 0.9);
    }

    #[test]
    fn applied_gain_stays_within_bounds() {
        let min_gain = db_to_linear(-10.0);
        let max_gain = db_to_linear(30.0);
        let mut a = agc();

        // Pathological input: alternating near-silence and loud bursts
        let mut input = Vec::new();
        for i in 0..10 {
            let level = if i % 2 == 0 { 0.0005 } else { 0.95 };
            input.extend(vec![level as f32; 1600]);
        }
        let mut output = input.clone();
        a.process(&mut output);

        for (x, y) in input.iter().zip(output.iter()) {
            if x.abs() > 1e-6 {
                let applied = (y / x).abs();
                assert!(
                    applied >= min_gain - 1e-3 && applied <= max_gain + 1e-3,
                    "gain {} outside [{}, {}]",
                    applied,
                    min_gain,
                    max_gain
                );
            }
        }
    }

    #[test]
    fn gain_state_carries_across_chunks() {
        let mut a = agc();
        let mut first = vec![0.005_f32; 16000];
        a.process(&mut first);
        let gain_after_first = a.current_gain();

        let mut second = vec![0.005_f32; 16];
        a.process(&mut second);
        // Second chunk starts where the first left off
        assert!((second[0] / 0.005 - gain_after_first).abs() / gain_after_first < 0.05);
    }

    #[test]
    fn reset_returns_to_unity() {
        let mut a = agc();
        let mut samples = vec![0.005_f32; 16000];
        a.process(&mut samples);
        assert!(a.current_gain() > 1.5);
        a.reset();
        assert!((a.current_gain() - 1.0).abs() < f32::EPSILON);
    }
}
