//! Pipeline configuration: regions, conditions and processing parameters, shared by every file of a batch.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FnirsError;
use crate::region::RegionMap;
use crate::signal::HemoKind;
use crate::trial::Aggregation;

/// The default half-width (in samples) of the peak activation window.
pub const DEFAULT_PEAK_PADDING: usize = 4;

/// A stimulus condition and the marker column it is recorded in.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// The condition label, e.g., "normal" or "attack".
    pub name: String,
    /// The (0-based) marker column of the condition.
    pub column: usize,
}

impl Condition {
    pub fn new(name: impl Into<String>, column: usize) -> Self {
        Condition {
            name: name.into(),
            column,
        }
    }
}

fn default_paired() -> bool {
    true
}

fn default_hemo_kind() -> HemoKind {
    HemoKind::Oxy
}

fn default_peak_padding() -> usize {
    DEFAULT_PEAK_PADDING
}

/// Configuration of the per-file pipeline.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The brain regions, in output order.
    pub regions: RegionMap,
    /// The conditions to process.
    pub conditions: Vec<Condition>,
    /// Whether every trial already has a start and an end marker.
    #[serde(default = "default_paired")]
    pub paired: bool,
    /// Trial durations in seconds, used to synthesize end markers of unpaired conditions.
    #[serde(default)]
    pub trial_durations: Vec<f64>,
    /// Sampling frequency in Hz, used to synthesize end markers of unpaired conditions.
    #[serde(default)]
    pub sampling_freq: Option<f64>,
    /// How trials are combined into the ROI.
    #[serde(default)]
    pub aggregation: Aggregation,
    /// Whether to truncate every trial to the shortest one (always done for [`Aggregation::Average`]).
    #[serde(default)]
    pub equalize: bool,
    /// Keep at most this many markers per condition.
    #[serde(default)]
    pub max_markers: Option<usize>,
    /// The hemoglobin kind the metrics are computed on.
    #[serde(default = "default_hemo_kind")]
    pub hemo_kind: HemoKind,
    /// Half-width (in samples) of the peak activation window.
    #[serde(default = "default_peak_padding")]
    pub peak_padding: usize,
    /// Minimum z-score for a group-level correlation to be kept.
    #[serde(default)]
    pub fc_threshold: Option<f64>,
    /// The expected number of channels; the summed region sizes if absent.
    #[serde(default)]
    pub num_channels: Option<usize>,
}

impl PipelineConfig {
    /// Create a configuration for paired markers with default parameters.
    pub fn new(regions: RegionMap, conditions: Vec<Condition>) -> Self {
        PipelineConfig {
            regions,
            conditions,
            paired: default_paired(),
            trial_durations: vec![],
            sampling_freq: None,
            aggregation: Aggregation::default(),
            equalize: false,
            max_markers: None,
            hemo_kind: default_hemo_kind(),
            peak_padding: default_peak_padding(),
            fc_threshold: None,
            num_channels: None,
        }
    }

    /// Whether trials are equalized before extraction.
    pub fn equalizes(&self) -> bool {
        self.equalize || self.aggregation == Aggregation::Average
    }

    /// The condition with the given name, if any.
    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|condition| condition.name == name)
    }

    /// Check the consistency of the configuration.
    pub fn validate(&self) -> Result<(), FnirsError> {
        self.regions.validate()?;

        if self.conditions.is_empty() {
            return Err(FnirsError::InvalidParameter(
                "At least one condition is required".to_string(),
            ));
        }
        for (i, condition) in self.conditions.iter().enumerate() {
            if self.conditions[..i]
                .iter()
                .any(|other| other.name == condition.name)
            {
                return Err(FnirsError::InvalidParameter(format!(
                    "Duplicate condition name '{}'",
                    condition.name
                )));
            }
            if let Some(other) = self.conditions[..i]
                .iter()
                .find(|other| other.column == condition.column)
            {
                return Err(FnirsError::InvalidParameter(format!(
                    "Conditions '{}' and '{}' share the marker column {}",
                    other.name, condition.name, condition.column
                )));
            }
        }

        if !self.paired {
            if self.trial_durations.is_empty() {
                return Err(FnirsError::InvalidParameter(
                    "Trial durations are required for unpaired markers".to_string(),
                ));
            }
            match self.sampling_freq {
                Some(freq) if freq.is_finite() && freq > 0.0 => {}
                _ => {
                    return Err(FnirsError::InvalidParameter(
                        "A positive sampling frequency is required for unpaired markers"
                            .to_string(),
                    ))
                }
            }
        }

        if let Some(max_markers) = self.max_markers {
            if max_markers == 0 || max_markers % 2 != 0 {
                return Err(FnirsError::InvalidParameter(format!(
                    "The marker cap must be a positive even number, got {}",
                    max_markers
                )));
            }
        }

        if let Some(threshold) = self.fc_threshold {
            if threshold.is_nan() {
                return Err(FnirsError::InvalidParameter(
                    "The connectivity threshold must be a number".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, FnirsError> {
        let file = File::open(path).map_err(|e| FnirsError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        let config: PipelineConfig =
            serde_json::from_reader(reader).map_err(|e| FnirsError::IOError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> RegionMap {
        RegionMap::from_groups(vec![vec![0, 1], vec![2, 3]]).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new(regions(), vec![Condition::new("normal", 2)]);
        assert!(config.paired);
        assert_eq!(config.peak_padding, 4);
        assert_eq!(config.hemo_kind, HemoKind::Oxy);
        assert_eq!(config.aggregation, Aggregation::Concat);
        assert!(!config.equalizes());
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.condition("normal"), Some(&Condition::new("normal", 2)));
        assert_eq!(config.condition("attack"), None);

        let config = PipelineConfig {
            aggregation: Aggregation::Average,
            ..config
        };
        assert!(config.equalizes());
    }

    #[test]
    fn test_validate() {
        let config = PipelineConfig::new(regions(), vec![]);
        assert!(config.validate().is_err());

        let config = PipelineConfig::new(
            regions(),
            vec![Condition::new("normal", 2), Condition::new("normal", 3)],
        );
        assert!(config.validate().is_err());

        let config = PipelineConfig::new(
            regions(),
            vec![Condition::new("normal", 2), Condition::new("attack", 2)],
        );
        assert!(matches!(config.validate(), Err(FnirsError::InvalidParameter(_))));

        let mut config = PipelineConfig::new(regions(), vec![Condition::new("normal", 2)]);
        config.paired = false;
        assert!(config.validate().is_err());
        config.trial_durations = vec![20.0];
        assert!(config.validate().is_err());
        config.sampling_freq = Some(7.8125);
        assert_eq!(config.validate(), Ok(()));

        config.max_markers = Some(19);
        assert!(config.validate().is_err());
        config.max_markers = Some(20);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "regions": [
                {"label": "APFC", "channels": [0, 1, 3, 4]},
                {"label": "MDPFC", "channels": [2, 7, 6, 8, 5]}
            ],
            "conditions": [{"name": "normal", "column": 2}, {"name": "attack", "column": 3}],
            "aggregation": "average",
            "hemo_kind": "deoxy",
            "max_markers": 20
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.regions.labels(), vec!["APFC".to_string(), "MDPFC".to_string()]);
        assert_eq!(config.regions.total_channels(), 9);
        assert_eq!(config.conditions[1], Condition::new("attack", 3));
        assert_eq!(config.aggregation, Aggregation::Average);
        assert_eq!(config.hemo_kind, HemoKind::Deoxy);
        assert_eq!(config.max_markers, Some(20));
        assert!(config.paired);
        assert_eq!(config.peak_padding, DEFAULT_PEAK_PADDING);
    }
}
