//! Activation and connectivity metrics over (time × column) data, where columns are regions or channels.
use std::ops::Range;

use itertools::Itertools;
use log::warn;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::error::FnirsError;

/// Whether the peak window includes the sample `padding` steps after the peak.
///
/// With `true`, the window is `[max_idx - padding, max_idx + padding]` (both ends included, `2 * padding + 1` samples away from the borders).
pub const PEAK_WINDOW_INCLUSIVE: bool = true;

/// Mean of a series, shifted by its first value so that a constant series returns that constant exactly.
fn shifted_mean(values: &[f64]) -> f64 {
    match values.first() {
        Some(&first) => {
            first + values.iter().map(|value| value - first).sum::<f64>() / values.len() as f64
        }
        None => f64::NAN,
    }
}

/// Mean activation of every column over the time axis.
///
/// Returns NaN for every column if there is no sample.
pub fn mean_activation(data: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(
        data.ncols(),
        data.column_iter()
            .map(|column| shifted_mean(column.as_slice())),
    )
}

/// The sample range averaged around a peak at `max_idx` in a series of `len` samples.
///
/// The window never extends past the series: it is shrunk at the borders rather than padded.
pub fn peak_window(max_idx: usize, padding: usize, len: usize) -> Range<usize> {
    let start = max_idx.saturating_sub(padding);
    let end = max_idx
        .saturating_add(padding)
        .saturating_add(PEAK_WINDOW_INCLUSIVE as usize)
        .min(len);
    start..end
}

/// Index of the (first) maximum of a series, ignoring NaN values.
fn argmax(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &value)| match best {
            Some((_, max)) if max >= value => best,
            _ => Some((i, value)),
        })
        .map(|(i, _)| i)
}

/// Peak activation of every column: the mean over a window of half-width `padding` centered on the maximum.
///
/// If provided, the baseline (one value per column) is subtracted from the windowed means.
/// Returns an error if there is no sample or if the baseline does not have one value per column.
pub fn peak_activation(
    data: &DMatrix<f64>,
    padding: usize,
    baseline: Option<&DVector<f64>>,
) -> Result<DVector<f64>, FnirsError> {
    let len = data.nrows();
    if len == 0 {
        return Err(FnirsError::InvalidParameter(
            "Peak activation requires at least one sample".to_string(),
        ));
    }
    if let Some(baseline) = baseline {
        if baseline.len() != data.ncols() {
            return Err(FnirsError::InvalidParameter(format!(
                "The baseline has {} values for {} columns",
                baseline.len(),
                data.ncols()
            )));
        }
    }

    let mut peaks = DVector::<f64>::zeros(data.ncols());
    for (i, column) in data.column_iter().enumerate() {
        let values = column.as_slice();
        let max_idx = argmax(values).unwrap_or(0);

        if max_idx < padding {
            warn!("Peak activation padding overshoots data at start (column {})", i);
        } else if max_idx
            .saturating_add(padding)
            .saturating_add(PEAK_WINDOW_INCLUSIVE as usize)
            > len
        {
            warn!("Peak activation padding overshoots data at end (column {})", i);
        }

        peaks[i] = shifted_mean(&values[peak_window(max_idx, padding, len)]);
        if let Some(baseline) = baseline {
            peaks[i] -= baseline[i];
        }
    }
    Ok(peaks)
}

/// Peak activation computed trial by trial, each trial with its own baseline, then averaged over the trials.
pub fn peak_activation_trials(
    trials: &[DMatrix<f64>],
    padding: usize,
    baselines: Option<&[DVector<f64>]>,
) -> Result<DVector<f64>, FnirsError> {
    let first = trials.first().ok_or_else(|| {
        FnirsError::InvalidParameter("Peak activation requires at least one trial".to_string())
    })?;
    if let Some(baselines) = baselines {
        if baselines.len() != trials.len() {
            return Err(FnirsError::InvalidParameter(format!(
                "Got {} baselines for {} trials",
                baselines.len(),
                trials.len()
            )));
        }
    }

    let mut sum = DVector::<f64>::zeros(first.ncols());
    for (i, trial) in trials.iter().enumerate() {
        if trial.ncols() != first.ncols() {
            return Err(FnirsError::InvalidParameter(format!(
                "Trial {} has {} columns, expected {}",
                i,
                trial.ncols(),
                first.ncols()
            )));
        }
        let baseline = baselines.map(|baselines| &baselines[i]);
        sum += peak_activation(trial, padding, baseline)?;
    }
    Ok(sum / trials.len() as f64)
}

/// Divide the data by its global maximum.
pub fn normalize(data: &DMatrix<f64>) -> DMatrix<f64> {
    match data.iter().copied().filter(|value| !value.is_nan()).reduce(f64::max) {
        Some(max) => data / max,
        None => data.clone(),
    }
}

/// Pearson correlation between the rows of a (variable × observation) matrix, and its Fisher z-transform.
///
/// The diagonal of the correlation matrix is set to NaN; the z-matrix keeps the transform of the
/// self-correlation (infinite for non-constant rows). Constant rows correlate as NaN.
pub fn functional_connectivity(data: &DMatrix<f64>) -> (DMatrix<f64>, DMatrix<f64>) {
    let n = data.nrows();
    let means: Vec<f64> = data
        .row_iter()
        .map(|row| shifted_mean(&row.iter().copied().collect::<Vec<f64>>()))
        .collect();
    let centered = DMatrix::from_fn(n, data.ncols(), |i, j| data[(i, j)] - means[i]);
    let norms: Vec<f64> = centered.row_iter().map(|row| row.norm()).collect();

    let mut corr = DMatrix::from_element(n, n, f64::NAN);
    for (i, j) in (0..n).tuple_combinations() {
        let value = (centered.row(i).dot(&centered.row(j)) / (norms[i] * norms[j])).clamp(-1.0, 1.0);
        corr[(i, j)] = value;
        corr[(j, i)] = value;
    }
    for i in 0..n {
        if norms[i] > 0.0 {
            corr[(i, i)] = 1.0;
        }
    }

    let zscores = corr.map(f64::atanh);
    corr.fill_diagonal(f64::NAN);
    (corr, zscores)
}

/// Effective (directed) connectivity is not computed by this library.
///
/// Always returns [`FnirsError::NotImplemented`]; use a dedicated multivariate Granger causality toolbox.
pub fn effective_connectivity(_data: &DMatrix<f64>) -> Result<ConnectivityMatrix, FnirsError> {
    Err(FnirsError::NotImplemented(
        "effective connectivity (use a multivariate Granger causality toolbox)".to_string(),
    ))
}

/// A region-by-region connectivity matrix with its Fisher z-scores and region labels.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityMatrix {
    /// Pearson correlations, NaN on the diagonal.
    pub corr: DMatrix<f64>,
    /// Fisher z-transform of the correlations.
    pub zscores: DMatrix<f64>,
    /// Region labels, in row order.
    pub labels: Vec<String>,
}

impl ConnectivityMatrix {
    /// Functional connectivity of a (time × region) matrix, labelled with the region labels.
    pub fn from_data(data: &DMatrix<f64>, labels: Vec<String>) -> Result<Self, FnirsError> {
        if labels.len() != data.ncols() {
            return Err(FnirsError::InvalidParameter(format!(
                "Got {} labels for {} regions",
                labels.len(),
                data.ncols()
            )));
        }
        let (corr, zscores) = functional_connectivity(&data.transpose());
        Ok(ConnectivityMatrix {
            corr,
            zscores,
            labels,
        })
    }

    /// The number of regions.
    pub fn num_regions(&self) -> usize {
        self.labels.len()
    }

    /// Elementwise mean of several connectivity matrices over the same regions, e.g., over participants.
    pub fn average(matrices: &[ConnectivityMatrix]) -> Result<Self, FnirsError> {
        let first = matrices.first().ok_or_else(|| {
            FnirsError::InvalidParameter("Cannot average an empty set of matrices".to_string())
        })?;
        if let Some(other) = matrices.iter().find(|other| other.labels != first.labels) {
            return Err(FnirsError::InvalidParameter(format!(
                "Cannot average matrices over different regions: {:?} and {:?}",
                first.labels, other.labels
            )));
        }

        let n = first.num_regions();
        let scale = 1.0 / matrices.len() as f64;
        let (corr, zscores) = matrices.iter().fold(
            (DMatrix::zeros(n, n), DMatrix::zeros(n, n)),
            |(corr, zscores): (DMatrix<f64>, DMatrix<f64>), matrix| {
                (corr + &matrix.corr, zscores + &matrix.zscores)
            },
        );

        Ok(ConnectivityMatrix {
            corr: corr * scale,
            zscores: zscores * scale,
            labels: first.labels.clone(),
        })
    }

    /// Mask (set to NaN) every correlation whose z-score is below `z_min`.
    pub fn threshold(&self, z_min: f64) -> Self {
        let mut corr = self.corr.clone();
        corr.zip_apply(&self.zscores, |value, z| {
            if z < z_min {
                *value = f64::NAN;
            }
        });
        ConnectivityMatrix {
            corr,
            zscores: self.zscores.clone(),
            labels: self.labels.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    use super::*;

    /// Two regions over 13 samples: a ramp 1..=13 and a mostly flat series.
    fn two_regions() -> DMatrix<f64> {
        let mut flat = vec![2.0; 13];
        flat[0] = 3.0;
        flat[1] = 1.0;
        let ramp: Vec<f64> = (1..=13).map(|v| v as f64).collect();
        DMatrix::from_fn(13, 2, |t, c| if c == 0 { ramp[t] } else { flat[t] })
    }

    #[test]
    fn test_peak_window_convention() {
        assert!(PEAK_WINDOW_INCLUSIVE);
        assert_eq!(peak_window(5, 2, 20), 3..8);
        assert_eq!(peak_window(0, 4, 20), 0..5);
        assert_eq!(peak_window(1, 4, 20), 0..6);
        assert_eq!(peak_window(19, 4, 20), 15..20);
        assert_eq!(peak_window(17, 4, 20), 13..20);
        assert_eq!(peak_window(2, 0, 20), 2..3);
        assert_eq!(peak_window(3, 10, 5), 0..5);
    }

    #[test]
    fn test_mean_activation() {
        let data = two_regions();
        let means = mean_activation(&data);
        assert_eq!(means.len(), 2);
        assert_relative_eq!(means[0], 7.0);
        assert_relative_eq!(means[1], 26.0 / 13.0);
    }

    #[test]
    fn test_mean_activation_constant_is_exact() {
        for constant in [0.1, -7.3, 1e12 + 0.5, 2.5] {
            let data = DMatrix::from_element(17, 3, constant);
            assert!(mean_activation(&data).iter().all(|&mean| mean == constant));
        }
    }

    #[test]
    fn test_mean_activation_empty() {
        let means = mean_activation(&DMatrix::<f64>::zeros(0, 2));
        assert!(means.iter().all(|mean| mean.is_nan()));
    }

    #[test]
    fn test_peak_activation() {
        let data = two_regions();
        let peaks = peak_activation(&data, 1, None).unwrap();
        // ramp peaks at the last index (13), the window shrinks to [12, 13]
        assert_relative_eq!(peaks[0], 12.5);
        // flat series peaks at index 0 (3), the window shrinks to [3, 1]
        assert_relative_eq!(peaks[1], 2.0);

        let baseline = DVector::from_vec(vec![0.5, 1.0]);
        let peaks = peak_activation(&data, 1, Some(&baseline)).unwrap();
        assert_relative_eq!(peaks[0], 12.0);
        assert_relative_eq!(peaks[1], 1.0);
    }

    #[test]
    fn test_peak_activation_interior() {
        let data = DMatrix::from_column_slice(7, 1, &[0.0, 1.0, 4.0, 9.0, 4.0, 1.0, 0.0]);
        let peaks = peak_activation(&data, 2, None).unwrap();
        assert_relative_eq!(peaks[0], 19.0 / 5.0);
        let peaks = peak_activation(&data, 0, None).unwrap();
        assert_relative_eq!(peaks[0], 9.0);
    }

    #[test]
    fn test_peak_activation_huge_padding() {
        assert_eq!(peak_window(1, usize::MAX, 3), 0..3);
        assert_eq!(peak_window(usize::MAX - 1, 5, usize::MAX), usize::MAX - 6..usize::MAX);

        // the window shrinks to the whole series
        let data = DMatrix::from_column_slice(3, 1, &[1.0, 5.0, 3.0]);
        let peaks = peak_activation(&data, usize::MAX, None).unwrap();
        assert_relative_eq!(peaks[0], 3.0);
    }

    #[test]
    fn test_peak_activation_errors() {
        assert!(peak_activation(&DMatrix::<f64>::zeros(0, 2), 1, None).is_err());
        let baseline = DVector::from_vec(vec![0.0]);
        assert!(peak_activation(&two_regions(), 1, Some(&baseline)).is_err());
    }

    #[test]
    fn test_peak_activation_trials() {
        let trial_a = DMatrix::from_column_slice(3, 1, &[0.0, 6.0, 0.0]);
        let trial_b = DMatrix::from_column_slice(3, 1, &[2.0, 0.0, 0.0]);
        let peaks = peak_activation_trials(&[trial_a.clone(), trial_b.clone()], 0, None).unwrap();
        assert_relative_eq!(peaks[0], 4.0);

        let baselines = vec![DVector::from_vec(vec![1.0]), DVector::from_vec(vec![3.0])];
        let peaks = peak_activation_trials(&[trial_a, trial_b], 0, Some(&baselines)).unwrap();
        assert_relative_eq!(peaks[0], 2.0);

        assert!(peak_activation_trials(&[], 0, None).is_err());
    }

    #[test]
    fn test_normalize() {
        let data = DMatrix::from_row_slice(2, 2, &[1.0, -4.0, 2.0, 0.5]);
        let out = normalize(&data);
        assert_relative_eq!(out[(1, 0)], 1.0);
        assert_relative_eq!(out[(0, 1)], -2.0);
    }

    #[test]
    fn test_functional_connectivity() {
        // rows are variables, columns are observations
        let data = DMatrix::from_row_slice(
            3,
            5,
            &[
                1.0, 2.0, 3.0, 4.0, 5.0, //
                2.0, 4.0, 6.0, 8.0, 10.0, //
                5.0, 4.0, 3.0, 2.0, 1.0,
            ],
        );
        let (corr, zscores) = functional_connectivity(&data);

        assert_eq!(corr.shape(), (3, 3));
        assert_eq!(zscores.shape(), (3, 3));
        assert_relative_eq!(corr[(0, 1)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(corr[(0, 2)], -1.0, epsilon = 1e-12);
        assert!((0..3).all(|i| corr[(i, i)].is_nan()));
        assert!((0..3).all(|i| zscores[(i, i)] == f64::INFINITY));
        assert!(zscores[(0, 2)] < -10.0);
    }

    #[test]
    fn test_functional_connectivity_fisher() {
        let data = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, 1.0, 3.0, 2.0, 4.0]);
        let (corr, zscores) = functional_connectivity(&data);
        assert_relative_eq!(corr[(0, 1)], 0.8, epsilon = 1e-12);
        assert_relative_eq!(zscores[(0, 1)], 0.8_f64.atanh(), epsilon = 1e-12);
    }

    #[test]
    fn test_functional_connectivity_symmetry() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let data = DMatrix::from_fn(8, 50, |_, _| normal.sample(&mut rng));
        let (corr, zscores) = functional_connectivity(&data);

        for i in 0..8 {
            assert!(corr[(i, i)].is_nan());
            for j in 0..8 {
                if i != j {
                    assert_eq!(corr[(i, j)], corr[(j, i)]);
                    assert_eq!(zscores[(i, j)], zscores[(j, i)]);
                    assert!(corr[(i, j)].abs() <= 1.0);
                }
            }
        }
    }

    #[test]
    fn test_functional_connectivity_constant_row() {
        let data = DMatrix::from_row_slice(2, 3, &[1.0, 1.0, 1.0, 1.0, 2.0, 3.0]);
        let (corr, zscores) = functional_connectivity(&data);
        assert!(corr[(0, 1)].is_nan());
        assert!(zscores[(0, 0)].is_nan());
        assert_eq!(zscores[(1, 1)], f64::INFINITY);
    }

    #[test]
    fn test_effective_connectivity() {
        assert!(matches!(
            effective_connectivity(&two_regions()),
            Err(FnirsError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_connectivity_matrix() {
        let labels = vec!["APFC".to_string(), "MDPFC".to_string()];
        let matrix = ConnectivityMatrix::from_data(&two_regions(), labels.clone()).unwrap();
        assert_eq!(matrix.num_regions(), 2);
        assert!(matrix.corr[(0, 0)].is_nan());
        assert_eq!(matrix.corr[(0, 1)], matrix.corr[(1, 0)]);

        assert!(ConnectivityMatrix::from_data(&two_regions(), vec!["A".to_string()]).is_err());
    }

    #[test]
    fn test_connectivity_average_and_threshold() {
        let labels = vec!["A".to_string(), "B".to_string()];
        let make = |r: f64| ConnectivityMatrix {
            corr: DMatrix::from_row_slice(2, 2, &[f64::NAN, r, r, f64::NAN]),
            zscores: DMatrix::from_row_slice(2, 2, &[f64::INFINITY, r.atanh(), r.atanh(), f64::INFINITY]),
            labels: labels.clone(),
        };

        let avg = ConnectivityMatrix::average(&[make(0.2), make(0.6)]).unwrap();
        assert_relative_eq!(avg.corr[(0, 1)], 0.4, epsilon = 1e-12);
        assert_relative_eq!(
            avg.zscores[(1, 0)],
            (0.2_f64.atanh() + 0.6_f64.atanh()) / 2.0,
            epsilon = 1e-12
        );
        assert!(avg.corr[(0, 0)].is_nan());

        let masked = avg.threshold(1.0);
        assert!(masked.corr[(0, 1)].is_nan());
        let kept = avg.threshold(0.1);
        assert_relative_eq!(kept.corr[(0, 1)], 0.4, epsilon = 1e-12);

        assert!(ConnectivityMatrix::average(&[]).is_err());
        let other = ConnectivityMatrix {
            labels: vec!["A".to_string(), "C".to_string()],
            ..make(0.1)
        };
        assert!(ConnectivityMatrix::average(&[make(0.1), other]).is_err());
    }
}
