//! Module implementing the recorded data: hemoglobin signals and stimulus markers.
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FnirsError;
use crate::NUM_HEMO_KINDS;

/// The kind of hemoglobin measurement along the signal-kind axis.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HemoKind {
    /// Oxygenated hemoglobin (HbO).
    Oxy,
    /// Deoxygenated hemoglobin (HbR).
    Deoxy,
    /// Total hemoglobin (HbT).
    Total,
}

impl HemoKind {
    /// All kinds, in signal-kind axis order.
    pub const ALL: [HemoKind; NUM_HEMO_KINDS] = [HemoKind::Oxy, HemoKind::Deoxy, HemoKind::Total];

    /// Position of the kind along the signal-kind axis.
    pub fn index(self) -> usize {
        match self {
            HemoKind::Oxy => 0,
            HemoKind::Deoxy => 1,
            HemoKind::Total => 2,
        }
    }
}

/// A multi-channel hemoglobin signal indexed by (time, kind, channel).
///
/// Each kind is stored as a (time × channel) matrix; all three share the same shape.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Signal {
    kinds: [DMatrix<f64>; NUM_HEMO_KINDS],
}

impl Signal {
    /// Create a signal from its oxygenated, deoxygenated and total blocks.
    /// Returns an error if the three blocks don't have the same shape.
    pub fn build(
        oxy: DMatrix<f64>,
        deoxy: DMatrix<f64>,
        total: DMatrix<f64>,
    ) -> Result<Self, FnirsError> {
        let signal = Signal {
            kinds: [oxy, deoxy, total],
        };
        signal.check_shapes()?;
        Ok(signal)
    }

    /// Create a signal whose entry at (time, kind, channel) is given by `f`.
    pub fn from_fn<F>(num_samples: usize, num_channels: usize, mut f: F) -> Self
    where
        F: FnMut(usize, HemoKind, usize) -> f64,
    {
        let kinds =
            HemoKind::ALL.map(|kind| DMatrix::from_fn(num_samples, num_channels, |t, c| f(t, kind, c)));
        Signal { kinds }
    }

    fn check_shapes(&self) -> Result<(), FnirsError> {
        let shape = self.kinds[0].shape();
        if self.kinds.iter().any(|block| block.shape() != shape) {
            return Err(FnirsError::InvalidParameter(format!(
                "All hemoglobin kinds must have the same (time, channel) shape, got {:?}",
                self.kinds.iter().map(|block| block.shape()).collect::<Vec<_>>()
            )));
        }
        Ok(())
    }

    /// The number of samples along the time axis.
    pub fn num_samples(&self) -> usize {
        self.kinds[0].nrows()
    }

    /// The number of channels (or regions, once clustered).
    pub fn num_channels(&self) -> usize {
        self.kinds[0].ncols()
    }

    /// The (time × channel) block for one hemoglobin kind.
    pub fn kind(&self, kind: HemoKind) -> &DMatrix<f64> {
        &self.kinds[kind.index()]
    }

    /// Consume the signal and keep only one hemoglobin kind.
    pub fn into_kind(self, kind: HemoKind) -> DMatrix<f64> {
        let [oxy, deoxy, total] = self.kinds;
        match kind {
            HemoKind::Oxy => oxy,
            HemoKind::Deoxy => deoxy,
            HemoKind::Total => total,
        }
    }

    /// Apply the same (time × column) transform to every hemoglobin kind.
    pub fn map_kinds<F>(&self, f: F) -> Signal
    where
        F: Fn(&DMatrix<f64>) -> DMatrix<f64>,
    {
        Signal {
            kinds: [
                f(&self.kinds[0]),
                f(&self.kinds[1]),
                f(&self.kinds[2]),
            ],
        }
    }

    /// Keep the samples at the given time indices, in the given order.
    pub fn select_samples(&self, indices: &[usize]) -> Signal {
        self.map_kinds(|block| block.select_rows(indices.iter()))
    }

    /// Keep the samples selected by a boolean time mask, in time order.
    pub fn select_mask(&self, mask: &[bool]) -> Signal {
        let indices: Vec<usize> = mask.iter().positions(|&selected| selected).collect();
        self.select_samples(&indices)
    }

    /// Keep `len` consecutive samples starting at `start`.
    pub fn slice_samples(&self, start: usize, len: usize) -> Signal {
        self.map_kinds(|block| block.rows(start, len).into_owned())
    }

    /// Elementwise mean of signals sharing the same shape.
    /// Returns `None` if there is no signal or if the shapes differ.
    pub fn mean_of(signals: &[Signal]) -> Option<Signal> {
        let first = signals.first()?;
        let shape = (first.num_samples(), first.num_channels());
        if signals
            .iter()
            .any(|signal| (signal.num_samples(), signal.num_channels()) != shape)
        {
            return None;
        }

        let scale = 1.0 / signals.len() as f64;
        let kinds = HemoKind::ALL.map(|kind| {
            signals
                .iter()
                .fold(DMatrix::<f64>::zeros(shape.0, shape.1), |acc, signal| {
                    acc + signal.kind(kind)
                })
                * scale
        });
        Some(Signal { kinds })
    }
}

/// Binary stimulus markers indexed by (time, condition column).
///
/// A 1 marks a trial onset (and, once paired, the matching offset) of the condition.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct MarkerSequence {
    data: DMatrix<u8>,
}

impl MarkerSequence {
    /// Create a marker sequence from a (time × condition) matrix.
    /// Returns an error if some entry is neither 0 nor 1.
    pub fn new(data: DMatrix<u8>) -> Result<Self, FnirsError> {
        if let Some(value) = data.iter().find(|&&value| value > 1) {
            return Err(FnirsError::MalformedStimulus(format!(
                "Marker values must be binary, found {}",
                value
            )));
        }
        Ok(MarkerSequence { data })
    }

    /// Create a marker sequence of the given length with markers at the given positions, one list per condition.
    pub fn from_positions(
        num_samples: usize,
        columns: &[Vec<usize>],
    ) -> Result<Self, FnirsError> {
        let mut data = DMatrix::zeros(num_samples, columns.len());
        for (column, positions) in columns.iter().enumerate() {
            for &pos in positions {
                if pos >= num_samples {
                    return Err(FnirsError::MalformedStimulus(format!(
                        "Marker at sample {} is beyond the sequence length {}",
                        pos, num_samples
                    )));
                }
                data[(pos, column)] = 1;
            }
        }
        Ok(MarkerSequence { data })
    }

    /// The number of samples along the time axis.
    pub fn num_samples(&self) -> usize {
        self.data.nrows()
    }

    /// The number of condition columns.
    pub fn num_conditions(&self) -> usize {
        self.data.ncols()
    }

    /// The markers of one condition column, if the column exists.
    pub fn column(&self, column: usize) -> Option<Vec<u8>> {
        (column < self.num_conditions()).then(|| self.data.column(column).iter().copied().collect())
    }

    /// The number of markers in a condition column (zero if the column does not exist).
    pub fn count(&self, column: usize) -> usize {
        if column >= self.num_conditions() {
            return 0;
        }
        self.data.column(column).iter().filter(|&&value| value != 0).count()
    }

    /// The sample indices of the markers in a condition column, in time order.
    pub fn positions(&self, column: usize) -> Vec<usize> {
        if column >= self.num_conditions() {
            return vec![];
        }
        self.data
            .column(column)
            .iter()
            .enumerate()
            .filter(|(_, &value)| value != 0)
            .map(|(t, _)| t)
            .collect()
    }
}

/// The sex of the participant, as used in activation tables.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "M")]
    Male,
    #[default]
    #[serde(rename = "NA")]
    Unknown,
}

/// A complete recording of one participant: hemoglobin signal and stimulus markers.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Recording {
    /// The participant (or file) identifier.
    pub subject: String,
    /// The participant sex.
    #[serde(default)]
    pub sex: Sex,
    /// The (time, kind, channel) signal.
    pub signal: Signal,
    /// The (time, condition) markers.
    pub markers: MarkerSequence,
}

impl Recording {
    /// Create a new recording, checking that signal and markers share the same time axis.
    pub fn build(
        subject: impl Into<String>,
        sex: Sex,
        signal: Signal,
        markers: MarkerSequence,
    ) -> Result<Self, FnirsError> {
        let recording = Recording {
            subject: subject.into(),
            sex,
            signal,
            markers,
        };
        recording.validate()?;
        Ok(recording)
    }

    /// Check the structural invariants of the recording.
    pub fn validate(&self) -> Result<(), FnirsError> {
        self.signal.check_shapes()?;
        if self.signal.num_samples() != self.markers.num_samples() {
            return Err(FnirsError::MalformedStimulus(format!(
                "Number of observations in markers ({}) and signal ({}) do not match",
                self.markers.num_samples(),
                self.signal.num_samples()
            )));
        }
        if let Some(value) = self.markers.data.iter().find(|&&value| value > 1) {
            return Err(FnirsError::MalformedStimulus(format!(
                "Marker values must be binary, found {}",
                value
            )));
        }
        Ok(())
    }

    /// Save the recording to a JSON file.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), FnirsError> {
        let file = File::create(path).map_err(|e| FnirsError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|e| FnirsError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| FnirsError::IOError(e.to_string()))
    }

    /// Load a recording from a JSON file.
    /// The structural invariants are checked after loading.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, FnirsError> {
        let file = File::open(path.as_ref()).map_err(|e| FnirsError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        let recording: Recording =
            serde_json::from_reader(reader).map_err(|e| FnirsError::IOError(e.to_string()))?;
        recording.validate()?;
        info!(
            "Successfully loaded {} from {}: {} samples, {} channels, {} conditions",
            recording.subject,
            path.as_ref().display(),
            recording.signal.num_samples(),
            recording.signal.num_channels(),
            recording.markers.num_conditions()
        );
        Ok(recording)
    }
}
