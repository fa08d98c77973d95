//! Noise gate with smooth per-sample attack/release envelope.

use crate::defaults::db_to_linear;

/// Gate with an envelope in [0, 1] applied multiplicatively.
///
/// Samples above the linear threshold pull the envelope toward 1 with the
/// attack coefficient; samples below pull it toward 0 with the release
/// coefficient. The bounded per-sample envelope step is what makes the gate
/// clickless.
pub struct NoiseGate {
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

/// One-pole coefficient for a time constant in milliseconds.
fn coeff(time_ms: f32, sample_rate: u32) -> f32 {
    let samples = (time_ms * sample_rate as f32 / 1000.0).max(1.0);
    (-1.0 / samples).exp()
}

impl NoiseGate {
    pub fn new(threshold_db: f32, attack_ms: f32, release_ms: f32, sample_rate: u32) -> Self {
        Self {
            threshold: db_to_linear(threshold_db),
            attack_coeff: coeff(attack_ms, sample_rate),
            release_coeff: coeff(release_ms, sample_rate),
            envelope: 0.0,
        }
    }

    /// Apply the gate to a chunk in place.
    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let (target, c) = if sample.abs() > self.threshold {
                (1.0, self.attack_coeff)
            } else {
                (0.0, self.release_coeff)
            };
            self.envelope = c * self.envelope + (1.0 - c) * target;
            *sample *= self.envelope;
        }
    }

    /// Reset envelope state (new session).
    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
