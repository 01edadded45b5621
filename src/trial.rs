//! Module implementing the extraction of the region of interest (ROI) of a condition, i.e., the in-trial samples.
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::FnirsError;
use crate::signal::{MarkerSequence, Signal};
use crate::stimulus::{StimulusTrack, TrialBounds};

/// How the trials of a condition are combined into one ROI.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// All in-trial samples, concatenated in time order.
    #[default]
    Concat,
    /// The elementwise mean over trials of equal length.
    Average,
}

impl FromStr for Aggregation {
    type Err = FnirsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "concat" => Ok(Aggregation::Concat),
            "average" | "mean" => Ok(Aggregation::Average),
            _ => Err(FnirsError::InvalidParameter(format!(
                "Unknown aggregation method '{}', expected 'concat' or 'average'",
                s
            ))),
        }
    }
}

/// The extracted region of interest of one condition.
#[derive(Debug, PartialEq, Clone)]
pub struct Roi {
    /// The in-trial signal: concatenated trials or the trial template.
    pub data: Signal,
    /// The number of trials the ROI was built from.
    pub num_trials: usize,
    /// The common trial length, if all trials have the same number of samples.
    pub trial_length: Option<usize>,
}

/// The contiguous runs of selected samples in a mask, detected as breaks in the selected-index sequence.
pub fn runs(mask: &[bool]) -> Vec<TrialBounds> {
    let mut runs: Vec<TrialBounds> = vec![];
    for (t, _) in mask.iter().enumerate().filter(|(_, &selected)| selected) {
        match runs.last_mut() {
            Some(run) if run.end == t => run.end += 1,
            _ => runs.push(TrialBounds { start: t, end: t + 1 }),
        }
    }
    runs
}

fn check_time_axis(signal: &Signal, track: &StimulusTrack) -> Result<(), FnirsError> {
    if signal.num_samples() != track.num_samples() {
        return Err(FnirsError::MalformedStimulus(format!(
            "Number of observations in markers ({}) and signal ({}) do not match",
            track.num_samples(),
            signal.num_samples()
        )));
    }
    Ok(())
}

/// Split the signal into one signal per trial of the track.
pub fn split_trials(signal: &Signal, track: &StimulusTrack) -> Result<Vec<Signal>, FnirsError> {
    check_time_axis(signal, track)?;
    track.validate()?;
    Ok(runs(&track.mask())
        .into_iter()
        .map(|run| signal.slice_samples(run.start, run.len()))
        .collect())
}

/// Extract the ROI of a paired stimulus track.
///
/// Structural problems (no marker, odd marker count, mismatched time axes) are errors.
/// If the ROI cannot be built from well-formed markers (no in-trial sample, or trials of different
/// lengths in [`Aggregation::Average`] mode), `Ok(None)` is returned so that batch callers can skip the file.
pub fn extract_track(
    signal: &Signal,
    track: &StimulusTrack,
    aggregation: Aggregation,
) -> Result<Option<Roi>, FnirsError> {
    check_time_axis(signal, track)?;
    track.validate()?;

    let mask = track.mask();
    let trials = runs(&mask);
    if trials.is_empty() {
        warn!("No in-trial sample in condition column {}", track.column());
        return Ok(None);
    }
    let num_trials = trials.len();
    let trial_length = trials
        .iter()
        .all(|trial| trial.len() == trials[0].len())
        .then(|| trials[0].len());

    let data = match aggregation {
        Aggregation::Concat => signal.select_mask(&mask),
        Aggregation::Average => {
            if trial_length.is_none() {
                warn!(
                    "Trials of condition column {} have different lengths {:?}, they must be equalized before averaging",
                    track.column(),
                    trials.iter().map(|trial| trial.len()).collect::<Vec<_>>()
                );
                return Ok(None);
            }
            let signals: Vec<Signal> = trials
                .iter()
                .map(|trial| signal.slice_samples(trial.start, trial.len()))
                .collect();
            match Signal::mean_of(&signals) {
                Some(mean) => mean,
                None => return Ok(None),
            }
        }
    };

    info!(
        "Number of observations in ROI: {} ({} trials)",
        data.num_samples(),
        num_trials
    );
    Ok(Some(Roi {
        data,
        num_trials,
        trial_length,
    }))
}

/// Extract the ROI of a condition column from the raw markers.
///
/// The markers are expected to be paired already; a missing column counts as no stimulus.
pub fn extract(
    signal: &Signal,
    markers: &MarkerSequence,
    column: usize,
    aggregation: Aggregation,
) -> Result<Option<Roi>, FnirsError> {
    let track = StimulusTrack::from_markers(markers, column)?;
    extract_track(signal, &track, aggregation)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::signal::HemoKind;

    fn ramp_signal(num_samples: usize) -> Signal {
        Signal::from_fn(num_samples, 2, |t, kind, c| {
            (t + 100 * c) as f64 + 1000.0 * kind.index() as f64
        })
    }

    #[test]
    fn test_aggregation_from_str() {
        assert_eq!("concat".parse::<Aggregation>(), Ok(Aggregation::Concat));
        assert_eq!("Mean".parse::<Aggregation>(), Ok(Aggregation::Average));
        assert!("median".parse::<Aggregation>().is_err());
    }

    #[test]
    fn test_runs() {
        let mask = [false, true, true, false, true, false, true, true, true];
        assert_eq!(
            runs(&mask),
            vec![
                TrialBounds { start: 1, end: 3 },
                TrialBounds { start: 4, end: 5 },
                TrialBounds { start: 6, end: 9 },
            ]
        );
        assert!(runs(&[false, false]).is_empty());
    }

    #[test]
    fn test_extract_concat() {
        let signal = ramp_signal(12);
        let markers = MarkerSequence::from_positions(12, &[vec![1, 4, 7, 9]]).unwrap();
        let roi = extract(&signal, &markers, 0, Aggregation::Concat)
            .unwrap()
            .unwrap();

        assert_eq!(roi.num_trials, 2);
        assert_eq!(roi.trial_length, None);
        assert_eq!(roi.data.num_samples(), 5);
        let times: Vec<f64> = roi.data.kind(HemoKind::Oxy).column(0).iter().copied().collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 7.0, 8.0]);
        assert_eq!(roi.data.kind(HemoKind::Total)[(3, 1)], 2107.0);
    }

    #[test]
    fn test_extract_average() {
        let signal = ramp_signal(12);
        let markers = MarkerSequence::from_positions(12, &[vec![1, 3, 6, 8]]).unwrap();
        let roi = extract(&signal, &markers, 0, Aggregation::Average)
            .unwrap()
            .unwrap();

        assert_eq!(roi.num_trials, 2);
        assert_eq!(roi.trial_length, Some(2));
        assert_eq!(roi.data.num_samples(), 2);
        // mean of samples (1, 6) and (2, 7)
        assert_eq!(roi.data.kind(HemoKind::Oxy)[(0, 0)], 3.5);
        assert_eq!(roi.data.kind(HemoKind::Oxy)[(1, 0)], 4.5);
        assert_eq!(roi.data.kind(HemoKind::Deoxy)[(1, 1)], 1104.5);
    }

    #[test]
    fn test_extract_average_after_equalization() {
        let signal = ramp_signal(30);
        let track = StimulusTrack::from_positions(0, 30, &[2, 9, 12, 16, 20, 29]).unwrap();

        // unequal trials cannot be averaged
        assert_eq!(extract_track(&signal, &track, Aggregation::Average), Ok(None));

        let equalized = track.equalize_trial_length().unwrap();
        let roi = extract_track(&signal, &equalized, Aggregation::Average)
            .unwrap()
            .unwrap();
        assert_eq!(roi.num_trials, 3);
        assert_eq!(roi.trial_length, Some(4));
        assert_eq!(roi.data.num_samples(), 4);
        assert_relative_eq!(roi.data.kind(HemoKind::Oxy)[(0, 0)], (2.0 + 12.0 + 20.0) / 3.0);
    }

    #[test]
    fn test_mask_count_is_mode_invariant() {
        let signal = ramp_signal(40);
        let track = StimulusTrack::from_positions(0, 40, &[3, 8, 15, 20, 30, 35]).unwrap();
        let selected = track.mask().iter().filter(|&&selected| selected).count();

        let concat = extract_track(&signal, &track, Aggregation::Concat)
            .unwrap()
            .unwrap();
        let average = extract_track(&signal, &track, Aggregation::Average)
            .unwrap()
            .unwrap();
        assert_eq!(concat.data.num_samples(), selected);
        assert_eq!(
            average.data.num_samples() * average.num_trials,
            selected
        );
    }

    #[test]
    fn test_extract_errors() {
        let signal = ramp_signal(12);

        let markers = MarkerSequence::from_positions(12, &[vec![1, 4, 7]]).unwrap();
        assert_eq!(
            extract(&signal, &markers, 0, Aggregation::Concat),
            Err(FnirsError::UnevenMarkerCount {
                column: 0,
                count: 3
            })
        );

        let markers = MarkerSequence::from_positions(12, &[vec![]]).unwrap();
        assert_eq!(
            extract(&signal, &markers, 0, Aggregation::Concat),
            Err(FnirsError::NoStimulusFound { column: 0 })
        );
        assert_eq!(
            extract(&signal, &markers, 3, Aggregation::Concat),
            Err(FnirsError::NoStimulusFound { column: 3 })
        );

        let markers = MarkerSequence::from_positions(10, &[vec![1, 4]]).unwrap();
        assert!(matches!(
            extract(&signal, &markers, 0, Aggregation::Concat),
            Err(FnirsError::MalformedStimulus(_))
        ));
    }

    #[test]
    fn test_split_trials() {
        let signal = ramp_signal(12);
        let track = StimulusTrack::from_positions(0, 12, &[0, 2, 5, 10]).unwrap();
        let trials = split_trials(&signal, &track).unwrap();
        assert_eq!(trials.len(), 2);
        assert_eq!(trials[0].num_samples(), 2);
        assert_eq!(trials[1].num_samples(), 5);
        assert_eq!(trials[1].kind(HemoKind::Oxy)[(0, 0)], 5.0);
    }
}
