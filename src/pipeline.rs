//! Module implementing the per-file pipeline and its batch orchestration.
//!
//! Every file goes through the stages
//! `Loaded → Validated → RoiExtracted → RegionClustered → Detrended → MetricsComputed`,
//! each stage producing new data from the previous one.
//! A batch collects one [`FileOutcome`] per (recording, condition) pair; only a channel count mismatch aborts it.
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Condition, PipelineConfig};
use crate::detrend::detrend;
use crate::error::FnirsError;
use crate::metrics::{mean_activation, peak_activation, ConnectivityMatrix};
use crate::signal::{Recording, Sex};
use crate::stimulus::StimulusTrack;
use crate::trial::extract_track;
use crate::MIN_PARALLEL_FILES;

/// The successive states of a file in the pipeline.
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineStage {
    Loaded,
    Validated,
    RoiExtracted,
    RegionClustered,
    Detrended,
    MetricsComputed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineStage::Loaded => write!(f, "loaded"),
            PipelineStage::Validated => write!(f, "validated"),
            PipelineStage::RoiExtracted => write!(f, "ROI extracted"),
            PipelineStage::RegionClustered => write!(f, "region clustered"),
            PipelineStage::Detrended => write!(f, "detrended"),
            PipelineStage::MetricsComputed => write!(f, "metrics computed"),
        }
    }
}

/// An error tagged with the stage that could not be reached.
#[derive(Debug, PartialEq, Clone)]
struct StageError {
    stage: PipelineStage,
    error: FnirsError,
}

trait AtStage<T> {
    fn at_stage(self, stage: PipelineStage) -> Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T, FnirsError> {
    fn at_stage(self, stage: PipelineStage) -> Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

/// The metrics of one processed (recording, condition) pair.
#[derive(Debug, Clone)]
pub struct FileResult {
    /// The processed (time × region) data of the configured hemoglobin kind.
    pub data: DMatrix<f64>,
    /// The number of trials the data was extracted from.
    pub num_trials: usize,
    /// The mean activation of every region.
    pub mean_activation: DVector<f64>,
    /// The peak activation of every region.
    pub peak_activation: DVector<f64>,
    /// The functional connectivity between regions.
    pub connectivity: ConnectivityMatrix,
}

/// What happened to one (recording, condition) pair of a batch.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// All stages completed.
    Processed(FileResult),
    /// No usable ROI could be extracted; the file does not contribute to the batch.
    Skipped {
        stage: PipelineStage,
        reason: String,
    },
    /// A stage failed; the file does not contribute to the batch.
    Failed {
        stage: PipelineStage,
        error: FnirsError,
    },
}

impl FileOutcome {
    /// The result, if the file was processed.
    pub fn result(&self) -> Option<&FileResult> {
        match self {
            FileOutcome::Processed(result) => Some(result),
            _ => None,
        }
    }
}

/// The outcome of one (recording, condition) pair, with the identity of the recording.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub subject: String,
    pub sex: Sex,
    pub condition: String,
    pub outcome: FileOutcome,
}

/// One row of the activation table: the peak activation of every region for a subject and a condition.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub subject: String,
    pub sex: Sex,
    pub condition: String,
    pub values: Vec<f64>,
}

/// The per-file outcomes of a batch, in (condition, recording) order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    /// Minimum averaged z-score for a group-level correlation to be kept.
    pub fc_threshold: Option<f64>,
}

impl BatchReport {
    /// The reports of the processed files.
    pub fn processed(&self) -> impl Iterator<Item = (&FileReport, &FileResult)> + '_ {
        self.files
            .iter()
            .filter_map(|report| report.outcome.result().map(|result| (report, result)))
    }

    /// The number of processed files.
    pub fn num_processed(&self) -> usize {
        self.processed().count()
    }

    /// The number of skipped or failed files.
    pub fn num_dropped(&self) -> usize {
        self.files.len() - self.num_processed()
    }

    /// The connectivity averaged over the processed files of a condition, thresholded on the averaged z-scores if required.
    /// Returns `None` if no file of the condition was processed.
    pub fn group_connectivity(&self, condition: &str) -> Result<Option<ConnectivityMatrix>, FnirsError> {
        let matrices: Vec<ConnectivityMatrix> = self
            .processed()
            .filter(|(report, _)| report.condition == condition)
            .map(|(_, result)| result.connectivity.clone())
            .collect();
        if matrices.is_empty() {
            return Ok(None);
        }

        let average = ConnectivityMatrix::average(&matrices)?;
        Ok(Some(match self.fc_threshold {
            Some(z_min) => average.threshold(z_min),
            None => average,
        }))
    }

    /// One activation record per processed file.
    pub fn activation_records(&self) -> Vec<ActivationRecord> {
        self.processed()
            .map(|(report, result)| ActivationRecord {
                subject: report.subject.clone(),
                sex: report.sex,
                condition: report.condition.clone(),
                values: result.peak_activation.iter().copied().collect(),
            })
            .collect()
    }

    /// The processed data of every processed file, ready to be saved.
    pub fn processed_records(&self) -> Vec<ProcessedRecord> {
        self.processed()
            .map(|(report, result)| ProcessedRecord {
                subject: report.subject.clone(),
                condition: report.condition.clone(),
                data: result.data.clone(),
                num_trials: result.num_trials,
            })
            .collect()
    }
}

/// The pipeline of one configuration.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline, after validating the configuration.
    pub fn build(config: &'a PipelineConfig) -> Result<Self, FnirsError> {
        config.validate()?;
        Ok(Pipeline { config })
    }

    /// The configuration of the pipeline.
    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    /// Run every stage on a recording for a condition.
    ///
    /// Returns `Ok(None)` if no ROI could be extracted from well-formed markers, so that the caller can skip the file.
    pub fn run(
        &self,
        recording: &Recording,
        condition: &Condition,
    ) -> Result<Option<FileResult>, FnirsError> {
        self.run_stages(recording, condition)
            .map_err(|stage_error| stage_error.error)
    }

    /// Run every stage and report the outcome, without propagating errors.
    pub fn process(&self, recording: &Recording, condition: &Condition) -> FileOutcome {
        info!(
            "Processing condition '{}' for subject {}",
            condition.name, recording.subject
        );
        match self.run_stages(recording, condition) {
            Ok(Some(result)) => FileOutcome::Processed(result),
            Ok(None) => {
                warn!(
                    "No ROI for condition '{}' of subject {}, skipping file",
                    condition.name, recording.subject
                );
                FileOutcome::Skipped {
                    stage: PipelineStage::RoiExtracted,
                    reason: "no ROI could be extracted".to_string(),
                }
            }
            Err(StageError { stage, error }) => {
                warn!(
                    "Condition '{}' of subject {} failed before stage '{}': {}",
                    condition.name, recording.subject, stage, error
                );
                FileOutcome::Failed { stage, error }
            }
        }
    }

    fn run_stages(
        &self,
        recording: &Recording,
        condition: &Condition,
    ) -> Result<Option<FileResult>, StageError> {
        let config = self.config;

        // Loaded → Validated
        recording.validate().at_stage(PipelineStage::Validated)?;
        config
            .regions
            .check_channels(recording.signal.num_channels(), config.num_channels)
            .at_stage(PipelineStage::Validated)?;

        // Validated → RoiExtracted
        let roi = self
            .prepare_track(recording, condition)
            .and_then(|track| extract_track(&recording.signal, &track, config.aggregation))
            .at_stage(PipelineStage::RoiExtracted)?;
        let roi = match roi {
            Some(roi) => roi,
            None => return Ok(None),
        };

        // RoiExtracted → RegionClustered
        let clustered = config
            .regions
            .cluster(&roi.data)
            .at_stage(PipelineStage::RegionClustered)?;

        // RegionClustered → Detrended
        let data = detrend(&clustered).into_kind(config.hemo_kind);

        // Detrended → MetricsComputed
        let mean = mean_activation(&data);
        let peak = peak_activation(&data, config.peak_padding, None)
            .at_stage(PipelineStage::MetricsComputed)?;
        let connectivity = ConnectivityMatrix::from_data(&data, config.regions.labels())
            .at_stage(PipelineStage::MetricsComputed)?;

        info!(
            "Condition '{}' of subject {}: {} trials, {} observations",
            condition.name,
            recording.subject,
            roi.num_trials,
            data.nrows()
        );

        Ok(Some(FileResult {
            data,
            num_trials: roi.num_trials,
            mean_activation: mean,
            peak_activation: peak,
            connectivity,
        }))
    }

    /// The marker track of a condition, paired, capped and equalized as configured.
    fn prepare_track(
        &self,
        recording: &Recording,
        condition: &Condition,
    ) -> Result<StimulusTrack, FnirsError> {
        let config = self.config;
        let mut track = StimulusTrack::from_markers(&recording.markers, condition.column)?;

        if !config.paired {
            // validated with the configuration
            let sampling_freq = config.sampling_freq.unwrap_or_default();
            track = track.pair_markers(&config.trial_durations, sampling_freq)?;
        }
        track.validate()?;
        if let Some(max_markers) = config.max_markers {
            track = track.limit_markers(max_markers);
        }
        if config.equalizes() {
            track = track.equalize_trial_length()?;
        }
        Ok(track)
    }
}

/// Run the pipeline on every recording, for every condition of the configuration.
///
/// Files are processed in parallel if there are at least [`MIN_PARALLEL_FILES`] of them.
/// A file that fails or is skipped only affects its own outcome, except for a channel count mismatch,
/// which reveals a misconfigured batch and is returned as an error.
pub fn run_batch(
    recordings: &[Recording],
    config: &PipelineConfig,
) -> Result<BatchReport, FnirsError> {
    let pipeline = Pipeline::build(config)?;
    info!(
        "Starting batch of {} recordings and {} conditions...",
        recordings.len(),
        config.conditions.len()
    );

    let pairs: Vec<(&Condition, &Recording)> = config
        .conditions
        .iter()
        .flat_map(|condition| recordings.iter().map(move |recording| (condition, recording)))
        .collect();

    let process = |&(condition, recording): &(&Condition, &Recording)| FileReport {
        subject: recording.subject.clone(),
        sex: recording.sex,
        condition: condition.name.clone(),
        outcome: pipeline.process(recording, condition),
    };
    let files: Vec<FileReport> = if recordings.len() >= MIN_PARALLEL_FILES {
        pairs.par_iter().map(process).collect()
    } else {
        pairs.iter().map(process).collect()
    };

    if let Some(error) = files.iter().find_map(|report| match &report.outcome {
        FileOutcome::Failed { error, .. } if error.aborts_batch() => Some(error.clone()),
        _ => None,
    }) {
        error!("Batch aborted: {}", error);
        return Err(error);
    }

    let report = BatchReport {
        files,
        fc_threshold: config.fc_threshold,
    };
    info!(
        "Batch completed: {} processed, {} skipped or failed",
        report.num_processed(),
        report.num_dropped()
    );
    Ok(report)
}

/// The processed data of one (subject, condition) pair, as saved for downstream analysis.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub subject: String,
    pub condition: String,
    /// The (time × region) data.
    pub data: DMatrix<f64>,
    pub num_trials: usize,
}

impl ProcessedRecord {
    /// The path of the record in an output directory: `<dir>/<condition>/<subject>.json`.
    pub fn path_in<P: AsRef<Path>>(&self, dir: P) -> PathBuf {
        dir.as_ref()
            .join(&self.condition)
            .join(format!("{}.json", self.subject))
    }

    /// Save the record in an output directory, creating the condition directory if needed.
    /// Returns the path of the written file.
    pub fn save_to<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, FnirsError> {
        let path = self.path_in(dir);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| FnirsError::IOError(e.to_string()))?;
        }
        let file = File::create(&path).map_err(|e| FnirsError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| FnirsError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| FnirsError::IOError(e.to_string()))?;
        info!("Processed data saved to {}", path.display());
        Ok(path)
    }

    /// Load a record from a file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, FnirsError> {
        let file = File::open(path).map_err(|e| FnirsError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| FnirsError::IOError(e.to_string()))
    }
}
