//! Error module for the fNIRS ROI library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum FnirsError {
    /// The requested condition column has no marker at all (or does not exist).
    NoStimulusFound { column: usize },
    /// The number of markers in a condition column is odd, i.e., some trial has no end marker.
    UnevenMarkerCount { column: usize, count: usize },
    /// Structurally invalid marker data, e.g., non-binary values or mismatched time axes.
    MalformedStimulus(String),
    /// The channel axis of the signal disagrees with the region map.
    ChannelCountMismatch { expected: usize, found: usize },
    /// Not implemented operation.
    NotImplemented(String),
    /// Error for invalid parameters
    InvalidParameter(String),
    /// Error for I/O operations.
    IOError(String),
}

impl FnirsError {
    /// Returns true if the error reveals a misconfiguration shared by the whole batch.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, FnirsError::ChannelCountMismatch { .. })
    }
}

impl fmt::Display for FnirsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FnirsError::NoStimulusFound { column } => {
                write!(f, "No stimulus found in condition column {}", column)
            }
            FnirsError::UnevenMarkerCount { column, count } => write!(
                f,
                "Uneven number of markers in condition column {}: {} markers",
                column, count
            ),
            FnirsError::MalformedStimulus(e) => write!(f, "Malformed stimulus data: {}", e),
            FnirsError::ChannelCountMismatch { expected, found } => write!(
                f,
                "Channel count mismatch: the region map expects {} channels, the signal has {}",
                expected, found
            ),
            FnirsError::NotImplemented(e) => write!(f, "Not implemented: {}", e),
            FnirsError::InvalidParameter(e) => write!(f, "Invalid parameters: {}", e),
            FnirsError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for FnirsError {}
