//! Module implementing the sampling of synthetic recordings with a block design.
//!
//! Every trial adds a smooth hemodynamic bump to the oxygenated signal (and a smaller, inverted one to the
//! deoxygenated signal) on top of a linear drift and white Gaussian noise.
//!
//! # Examples
//!
//! ```rust
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use fnirs_roi::synth::{block_design, SyntheticRecording};
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let onsets = block_design(5, 10, 20, 15);
//! let sampler = SyntheticRecording::new(200, 6, vec![onsets], 20).unwrap();
//! let recording = sampler.sample("s01", &mut rng).unwrap();
//!
//! assert_eq!(recording.signal.num_samples(), 200);
//! assert_eq!(recording.markers.count(0), 10);
//! ```
use std::f64::consts::PI;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::FnirsError;
use crate::signal::{HemoKind, MarkerSequence, Recording, Sex, Signal};

/// Ratio between the deoxygenated and oxygenated responses.
const DEOXY_RATIO: f64 = -0.3;

/// Onsets of `num_trials` trials of `trial_length` samples separated by `rest_length` samples, starting at `first_onset`.
pub fn block_design(
    num_trials: usize,
    first_onset: usize,
    trial_length: usize,
    rest_length: usize,
) -> Vec<usize> {
    (0..num_trials)
        .map(|i| first_onset + i * (trial_length + rest_length))
        .collect()
}

/// A sampler of synthetic recordings, one condition column per list of onsets.
#[derive(Debug, PartialEq, Clone)]
pub struct SyntheticRecording {
    num_samples: usize,
    num_channels: usize,
    /// the trial onsets, one list per condition
    onsets: Vec<Vec<usize>>,
    /// the number of samples of every trial
    trial_length: usize,
    /// whether the markers include the trial ends
    paired: bool,
    /// the response amplitude of the first channel
    amplitude: f64,
    /// the slope of the linear drift, per sample
    drift: f64,
    /// the standard deviation of the additive noise
    noise_std: f64,
    sex: Sex,
}

impl SyntheticRecording {
    /// Create a sampler of paired recordings, with unit amplitude, no drift and a noise standard deviation of 0.1.
    /// Returns an error if some trial does not fit in the recording.
    pub fn new(
        num_samples: usize,
        num_channels: usize,
        onsets: Vec<Vec<usize>>,
        trial_length: usize,
    ) -> Result<Self, FnirsError> {
        if num_channels == 0 {
            return Err(FnirsError::InvalidParameter(
                "A recording needs at least one channel".to_string(),
            ));
        }
        if trial_length == 0 {
            return Err(FnirsError::InvalidParameter(
                "The trial length must be positive".to_string(),
            ));
        }
        if let Some(&onset) = onsets.iter().flatten().find(|&&onset| onset + trial_length >= num_samples) {
            return Err(FnirsError::InvalidParameter(format!(
                "The trial starting at sample {} does not fit in {} samples",
                onset, num_samples
            )));
        }

        Ok(SyntheticRecording {
            num_samples,
            num_channels,
            onsets,
            trial_length,
            paired: true,
            amplitude: 1.0,
            drift: 0.0,
            noise_std: 0.1,
            sex: Sex::Unknown,
        })
    }

    /// Only mark the trial onsets.
    pub fn unpaired(self) -> Self {
        SyntheticRecording {
            paired: false,
            ..self
        }
    }

    pub fn with_amplitude(self, amplitude: f64) -> Self {
        SyntheticRecording { amplitude, ..self }
    }

    pub fn with_drift(self, drift: f64) -> Self {
        SyntheticRecording { drift, ..self }
    }

    /// Set the noise standard deviation. Returns an error if it is negative or not finite.
    pub fn with_noise(self, noise_std: f64) -> Result<Self, FnirsError> {
        if !(noise_std.is_finite() && noise_std >= 0.0) {
            return Err(FnirsError::InvalidParameter(format!(
                "The noise standard deviation must be non-negative, got {}",
                noise_std
            )));
        }
        Ok(SyntheticRecording { noise_std, ..self })
    }

    pub fn with_sex(self, sex: Sex) -> Self {
        SyntheticRecording { sex, ..self }
    }

    /// The noise-free oxygenated response of the first channel at sample `t`.
    fn response(&self, t: usize) -> f64 {
        self.onsets
            .iter()
            .flatten()
            .filter(|&&onset| onset <= t && t < onset + self.trial_length)
            .map(|&onset| {
                let phase = (t - onset) as f64 / self.trial_length as f64;
                self.amplitude * (PI * phase).sin()
            })
            .sum()
    }

    fn markers(&self) -> Result<MarkerSequence, FnirsError> {
        let positions: Vec<Vec<usize>> = self
            .onsets
            .iter()
            .map(|onsets| {
                if self.paired {
                    onsets
                        .iter()
                        .flat_map(|&onset| [onset, onset + self.trial_length])
                        .collect()
                } else {
                    onsets.clone()
                }
            })
            .collect();
        MarkerSequence::from_positions(self.num_samples, &positions)
    }

    /// Sample a recording.
    pub fn sample<R: Rng>(&self, subject: &str, rng: &mut R) -> Result<Recording, FnirsError> {
        let noise = Normal::new(0.0, self.noise_std)
            .map_err(|e| FnirsError::InvalidParameter(e.to_string()))?;

        // channel gains decrease along the probe, so that channels are distinguishable
        let gains: Vec<f64> = (0..self.num_channels)
            .map(|c| 1.0 / (1.0 + 0.25 * c as f64))
            .collect();
        let responses: Vec<f64> = (0..self.num_samples).map(|t| self.response(t)).collect();

        let oxy = Signal::from_fn(self.num_samples, self.num_channels, |t, kind, c| match kind {
            HemoKind::Oxy => gains[c] * responses[t] + self.drift * t as f64,
            HemoKind::Deoxy => DEOXY_RATIO * gains[c] * responses[t],
            HemoKind::Total => 0.0,
        });
        let signal = Signal::from_fn(self.num_samples, self.num_channels, |t, kind, c| {
            let value = match kind {
                HemoKind::Total => {
                    oxy.kind(HemoKind::Oxy)[(t, c)] + oxy.kind(HemoKind::Deoxy)[(t, c)]
                }
                _ => oxy.kind(kind)[(t, c)],
            };
            value + noise.sample(rng)
        });

        Recording::build(subject, self.sex, signal, self.markers()?)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_block_design() {
        assert_eq!(block_design(3, 5, 10, 4), vec![5, 19, 33]);
        assert!(block_design(0, 5, 10, 4).is_empty());
    }

    #[test]
    fn test_new_errors() {
        assert!(SyntheticRecording::new(100, 0, vec![vec![10]], 10).is_err());
        assert!(SyntheticRecording::new(100, 2, vec![vec![10]], 0).is_err());
        assert!(SyntheticRecording::new(100, 2, vec![vec![10, 90]], 10).is_err());
        assert!(SyntheticRecording::new(100, 2, vec![vec![10, 89]], 10).is_ok());

        let sampler = SyntheticRecording::new(100, 2, vec![vec![10]], 10).unwrap();
        assert!(sampler.clone().with_noise(-1.0).is_err());
        assert!(sampler.with_noise(0.0).is_ok());
    }

    #[test]
    fn test_sample_markers() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sampler =
            SyntheticRecording::new(100, 3, vec![vec![10, 40], vec![70]], 15).unwrap();

        let recording = sampler.sample("s01", &mut rng).unwrap();
        assert_eq!(recording.subject, "s01");
        assert_eq!(recording.signal.num_channels(), 3);
        assert_eq!(recording.markers.num_conditions(), 2);
        assert_eq!(recording.markers.positions(0), vec![10, 25, 40, 55]);
        assert_eq!(recording.markers.positions(1), vec![70, 85]);

        let recording = sampler.unpaired().sample("s01", &mut rng).unwrap();
        assert_eq!(recording.markers.positions(0), vec![10, 40]);
    }

    #[test]
    fn test_sample_noise_free() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let sampler = SyntheticRecording::new(60, 2, vec![vec![10]], 20)
            .unwrap()
            .with_amplitude(2.0)
            .with_noise(0.0)
            .unwrap()
            .with_sex(Sex::Male);
        let recording = sampler.sample("s01", &mut rng).unwrap();
        let oxy = recording.signal.kind(HemoKind::Oxy);
        let deoxy = recording.signal.kind(HemoKind::Deoxy);
        let total = recording.signal.kind(HemoKind::Total);

        assert_eq!(recording.sex, Sex::Male);
        assert_eq!(oxy[(5, 0)], 0.0);
        assert_eq!(oxy[(10, 0)], 0.0);
        assert_relative_eq!(oxy[(20, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(oxy[(20, 1)], 1.6, epsilon = 1e-12);
        assert_relative_eq!(deoxy[(20, 0)], -0.6, epsilon = 1e-12);
        assert_relative_eq!(total[(20, 0)], 1.4, epsilon = 1e-12);
        assert_eq!(oxy[(30, 0)], 0.0);
    }

    #[test]
    fn test_sample_is_seeded() {
        let sampler = SyntheticRecording::new(80, 2, vec![vec![10, 45]], 20)
            .unwrap()
            .with_drift(0.01);

        let first = sampler
            .sample("s01", &mut ChaCha8Rng::seed_from_u64(7))
            .unwrap();
        let second = sampler
            .sample("s01", &mut ChaCha8Rng::seed_from_u64(7))
            .unwrap();
        let third = sampler
            .sample("s01", &mut ChaCha8Rng::seed_from_u64(8))
            .unwrap();
        assert_eq!(first, second);
        assert_ne!(first, third);
    }
}
