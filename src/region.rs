//! Module implementing brain regions, i.e., groups of channels averaged into one signal.
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::FnirsError;
use crate::signal::Signal;

/// A brain region: a label and the (0-based) channels it is made of.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Region {
    pub label: String,
    pub channels: Vec<usize>,
}

/// An ordered list of regions. The order defines the region axis everywhere downstream.
///
/// Regions may overlap or leave channels out; the map is taken as given.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionMap {
    regions: Vec<Region>,
}

impl RegionMap {
    /// Create a region map.
    /// Returns an error if there is no region or if some region has no channel.
    pub fn build(regions: Vec<Region>) -> Result<Self, FnirsError> {
        let map = RegionMap { regions };
        map.validate()?;
        Ok(map)
    }

    /// Create a region map from channel groups, labelled `R1`, `R2`, ...
    pub fn from_groups(groups: Vec<Vec<usize>>) -> Result<Self, FnirsError> {
        Self::build(
            groups
                .into_iter()
                .enumerate()
                .map(|(i, channels)| Region {
                    label: format!("R{}", i + 1),
                    channels,
                })
                .collect(),
        )
    }

    pub(crate) fn validate(&self) -> Result<(), FnirsError> {
        if self.regions.is_empty() {
            return Err(FnirsError::InvalidParameter(
                "The region map must contain at least one region".to_string(),
            ));
        }
        if let Some(region) = self.regions.iter().find(|region| region.channels.is_empty()) {
            return Err(FnirsError::InvalidParameter(format!(
                "Region {} has no channel",
                region.label
            )));
        }
        Ok(())
    }

    /// The number of regions.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    /// The regions, in order.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// The region labels, in order.
    pub fn labels(&self) -> Vec<String> {
        self.regions.iter().map(|region| region.label.clone()).collect()
    }

    /// The summed size of all groups, counting shared channels once per region.
    pub fn total_channels(&self) -> usize {
        self.regions.iter().map(|region| region.channels.len()).sum()
    }

    /// The largest channel index referenced by the map.
    pub fn max_channel(&self) -> Option<usize> {
        self.regions
            .iter()
            .flat_map(|region| region.channels.iter().copied())
            .max()
    }

    /// Check the map against the channel axis of a signal.
    ///
    /// The signal must have `expected` channels if given, the summed group sizes otherwise,
    /// and every channel index of the map must exist in the signal.
    pub fn check_channels(
        &self,
        num_channels: usize,
        expected: Option<usize>,
    ) -> Result<(), FnirsError> {
        let expected = expected.unwrap_or_else(|| self.total_channels());
        if num_channels != expected {
            return Err(FnirsError::ChannelCountMismatch {
                expected,
                found: num_channels,
            });
        }
        self.check_indices(num_channels)
    }

    fn check_indices(&self, num_channels: usize) -> Result<(), FnirsError> {
        match self.max_channel() {
            Some(max_channel) if max_channel >= num_channels => {
                Err(FnirsError::ChannelCountMismatch {
                    expected: max_channel + 1,
                    found: num_channels,
                })
            }
            _ => Ok(()),
        }
    }

    fn average_channels(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(data.nrows(), self.num_regions());
        for (i, region) in self.regions.iter().enumerate() {
            let scale = 1.0 / region.channels.len() as f64;
            let mut column = out.column_mut(i);
            for &channel in region.channels.iter() {
                column += data.column(channel);
            }
            column *= scale;
        }
        out
    }

    /// Average a (time × channel) matrix into a (time × region) matrix.
    /// Returns an error if some channel of the map is not a column of the matrix.
    pub fn cluster_matrix(&self, data: &DMatrix<f64>) -> Result<DMatrix<f64>, FnirsError> {
        self.check_indices(data.ncols())?;
        Ok(self.average_channels(data))
    }

    /// Average every hemoglobin kind of a (time, kind, channel) signal into (time, kind, region).
    pub fn cluster(&self, signal: &Signal) -> Result<Signal, FnirsError> {
        self.check_indices(signal.num_channels())?;
        Ok(signal.map_kinds(|block| self.average_channels(block)))
    }
}
