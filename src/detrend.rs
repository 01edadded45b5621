//! Linear detrending along the time axis.
use nalgebra::{DMatrix, DVector};

use crate::signal::Signal;

/// Remove the least-squares line from every column of a (time × column) matrix.
///
/// Each column is fitted independently against the sample index `0..n`. A single-sample column becomes zero.
pub fn detrend_matrix(data: &DMatrix<f64>) -> DMatrix<f64> {
    let n = data.nrows();
    let mut out = data.clone();
    if n == 0 {
        return out;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let x = DVector::from_fn(n, |t, _| t as f64 - x_mean);
    let x_norm = x.norm_squared();

    for mut column in out.column_iter_mut() {
        let y_mean = column.mean();
        let slope = if x_norm > 0.0 {
            x.dot(&column) / x_norm
        } else {
            0.0
        };
        for (t, value) in column.iter_mut().enumerate() {
            *value -= y_mean + slope * x[t];
        }
    }
    out
}

/// Remove the least-squares line from every (kind, channel) series of a signal.
pub fn detrend(signal: &Signal) -> Signal {
    signal.map_kinds(detrend_matrix)
}
