//! Module implementing the stimulus track of a single condition: marker pairing,
//! trial-length equalization and validation.
use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::FnirsError;
use crate::signal::MarkerSequence;

/// The sample range `[start, end)` covered by one trial.
///
/// The start marker is part of the trial, the end marker is not, so the trial holds `end - start` samples.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct TrialBounds {
    pub start: usize,
    pub end: usize,
}

impl TrialBounds {
    /// The number of samples in the trial.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if the trial holds no sample.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Summary of the trials of a paired stimulus track.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TrialStats {
    /// The number of markers (twice the number of trials).
    pub num_markers: usize,
    /// The start sample of every trial.
    pub starts: Vec<usize>,
    /// The end sample of every trial.
    pub ends: Vec<usize>,
    /// The number of samples of every trial.
    pub durations: Vec<usize>,
    /// The mean number of samples per trial.
    pub mean_duration: f64,
}

/// The markers of a single condition, owned privately so that repairs never touch the source sequence.
#[derive(Debug, PartialEq, Clone)]
pub struct StimulusTrack {
    column: usize,
    markers: Vec<u8>,
}

impl StimulusTrack {
    /// Copy one condition column out of a marker sequence.
    /// Returns an error if the column does not exist, since the condition then has no stimulus at all.
    pub fn from_markers(markers: &MarkerSequence, column: usize) -> Result<Self, FnirsError> {
        let markers = markers
            .column(column)
            .ok_or(FnirsError::NoStimulusFound { column })?;
        Ok(StimulusTrack { column, markers })
    }

    /// Create a track of the given length with markers at the given positions.
    pub fn from_positions(
        column: usize,
        num_samples: usize,
        positions: &[usize],
    ) -> Result<Self, FnirsError> {
        let mut markers = vec![0; num_samples];
        for &pos in positions {
            if pos >= num_samples {
                return Err(FnirsError::MalformedStimulus(format!(
                    "Marker at sample {} is beyond the sequence length {}",
                    pos, num_samples
                )));
            }
            markers[pos] = 1;
        }
        Ok(StimulusTrack { column, markers })
    }

    /// The condition column the track was taken from.
    pub fn column(&self) -> usize {
        self.column
    }

    /// The number of samples along the time axis.
    pub fn num_samples(&self) -> usize {
        self.markers.len()
    }

    /// The number of markers in the track.
    pub fn num_markers(&self) -> usize {
        self.markers.iter().filter(|&&value| value != 0).count()
    }

    /// The sample indices of the markers, in time order.
    pub fn positions(&self) -> Vec<usize> {
        self.markers
            .iter()
            .positions(|&value| value != 0)
            .collect()
    }

    /// The raw binary markers.
    pub fn markers(&self) -> &[u8] {
        &self.markers
    }

    fn with_positions(&self, positions: impl IntoIterator<Item = usize>) -> Self {
        let mut markers = vec![0; self.markers.len()];
        for pos in positions {
            markers[pos] = 1;
        }
        StimulusTrack {
            column: self.column,
            markers,
        }
    }

    /// Synthesize an end marker for every start marker of an unpaired track.
    ///
    /// The i-th trial ends `round(trial_durations[i] * sampling_freq)` samples after its start, cycling
    /// through the durations if there are fewer durations than trials. Ends beyond the sequence are
    /// clamped to the last sample. Returns an error if some end does not fall strictly after its start
    /// and before the next start, since the paired markers would no longer match their trials.
    pub fn pair_markers(
        &self,
        trial_durations: &[f64],
        sampling_freq: f64,
    ) -> Result<Self, FnirsError> {
        if trial_durations.is_empty() {
            return Err(FnirsError::InvalidParameter(
                "At least one trial duration is required to pair markers".to_string(),
            ));
        }
        if !(sampling_freq.is_finite() && sampling_freq > 0.0) {
            return Err(FnirsError::InvalidParameter(format!(
                "The sampling frequency must be positive, got {}",
                sampling_freq
            )));
        }
        if let Some(duration) = trial_durations
            .iter()
            .find(|duration| !(duration.is_finite() && **duration >= 0.0))
        {
            return Err(FnirsError::InvalidParameter(format!(
                "Trial durations must be non-negative, got {}",
                duration
            )));
        }

        let starts = self.positions();
        if starts.is_empty() {
            return Err(FnirsError::MalformedStimulus(format!(
                "No start marker to pair in condition column {}",
                self.column
            )));
        }

        let last = self.markers.len() - 1;
        let ends = starts
            .iter()
            .zip(trial_durations.iter().cycle())
            .map(|(&start, &duration)| {
                let end = start + (duration * sampling_freq).round() as usize;
                end.min(last)
            })
            .collect::<Vec<usize>>();

        for (i, (&start, &end)) in starts.iter().zip(ends.iter()).enumerate() {
            let next_start = starts.get(i + 1).copied().unwrap_or(self.markers.len());
            if end <= start || end >= next_start {
                return Err(FnirsError::MalformedStimulus(format!(
                    "The trial starting at sample {} in condition column {} would end at sample {}, \
                     not strictly between its start and the next start ({})",
                    start, self.column, end, next_start
                )));
            }
        }

        debug!(
            "Paired {} start markers in column {}: ends at {:?}",
            starts.len(),
            self.column,
            ends
        );

        Ok(self.with_positions(starts.into_iter().chain(ends)))
    }

    /// Truncate every trial to the duration of the shortest one, keeping the start positions.
    pub fn equalize_trial_length(&self) -> Result<Self, FnirsError> {
        let trials = self.trials()?;
        let min_duration = trials
            .iter()
            .map(|trial| trial.len())
            .min()
            .unwrap_or_default();

        debug!(
            "Equalized {} trials in column {} to {} samples",
            trials.len(),
            self.column,
            min_duration
        );

        Ok(self.with_positions(
            trials
                .iter()
                .flat_map(|trial| [trial.start, trial.start + min_duration]),
        ))
    }

    /// Keep only the first `max_markers` markers.
    pub fn limit_markers(&self, max_markers: usize) -> Self {
        let positions = self.positions();
        if positions.len() > max_markers {
            info!(
                "Too many markers in column {} ({}), keeping the first {}",
                self.column,
                positions.len(),
                max_markers
            );
        }
        self.with_positions(positions.into_iter().take(max_markers))
    }

    /// Check that the track has at least one marker and an even number of them.
    pub fn validate(&self) -> Result<(), FnirsError> {
        let count = self.num_markers();
        if count == 0 {
            return Err(FnirsError::NoStimulusFound {
                column: self.column,
            });
        }
        if count % 2 != 0 {
            return Err(FnirsError::UnevenMarkerCount {
                column: self.column,
                count,
            });
        }
        Ok(())
    }

    /// The bounds of every trial, pairing consecutive markers as (start, end).
    pub fn trials(&self) -> Result<Vec<TrialBounds>, FnirsError> {
        self.validate()?;
        Ok(self
            .positions()
            .into_iter()
            .tuples()
            .map(|(start, end)| TrialBounds { start, end })
            .collect())
    }

    /// Summary of the trials of the track.
    pub fn stats(&self) -> Result<TrialStats, FnirsError> {
        let trials = self.trials()?;
        let durations: Vec<usize> = trials.iter().map(|trial| trial.len()).collect();
        let mean_duration = durations.iter().sum::<usize>() as f64 / durations.len() as f64;
        Ok(TrialStats {
            num_markers: 2 * trials.len(),
            starts: trials.iter().map(|trial| trial.start).collect(),
            ends: trials.iter().map(|trial| trial.end).collect(),
            durations,
            mean_duration,
        })
    }

    /// The in-trial mask: a running parity over the markers, i.e., the cumulative marker count modulo 2.
    ///
    /// A sample is selected from a start marker (included) up to the matching end marker (excluded).
    pub fn mask(&self) -> Vec<bool> {
        self.markers
            .iter()
            .scan(0usize, |count, &value| {
                *count += value as usize;
                Some(*count % 2 == 1)
            })
            .collect()
    }
}

/// The number of contiguous runs of selected samples in a mask.
pub fn count_islands(mask: &[bool]) -> usize {
    mask.iter()
        .tuple_windows()
        .filter(|(prev, next)| !**prev && **next)
        .count()
        + mask.first().map_or(0, |&first| first as usize)
}
