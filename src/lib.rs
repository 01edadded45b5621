//! This crate provides tools for extracting trials from fNIRS recordings, aggregating channels into brain regions,
//! and measuring regional activation and functional connectivity.
//!
//! # Extracting a Region of Interest
//!
//! ```rust
//! use fnirs_roi::signal::{HemoKind, MarkerSequence, Signal};
//! use fnirs_roi::trial::{extract, Aggregation};
//!
//! // A 12-sample, 2-channel signal with two trials in condition column 0
//! let signal = Signal::from_fn(12, 2, |t, _, c| (t + 10 * c) as f64);
//! let markers = MarkerSequence::from_positions(12, &[vec![1, 4, 7, 10]]).unwrap();
//!
//! // Concatenate the in-trial samples
//! let roi = extract(&signal, &markers, 0, Aggregation::Concat).unwrap().unwrap();
//! assert_eq!(roi.num_trials, 2);
//! assert_eq!(roi.data.num_samples(), 6);
//!
//! // Average the trials (of equal length) into one template
//! let roi = extract(&signal, &markers, 0, Aggregation::Average).unwrap().unwrap();
//! assert_eq!(roi.data.num_samples(), 3);
//! assert_eq!(roi.data.kind(HemoKind::Oxy)[(0, 0)], 4.0);
//! ```
//!
//! # Measuring Activation and Connectivity
//!
//! ```rust
//! use fnirs_roi::metrics::{mean_activation, peak_activation, ConnectivityMatrix};
//! use nalgebra::DMatrix;
//!
//! // A (time × region) matrix with 3 regions
//! let data = DMatrix::from_fn(20, 3, |t, r| ((t * (r + 1)) % 7) as f64);
//!
//! let mean = mean_activation(&data);
//! let peak = peak_activation(&data, 4, None).unwrap();
//! assert_eq!(mean.len(), 3);
//! assert_eq!(peak.len(), 3);
//!
//! let fc = ConnectivityMatrix::from_data(&data, vec!["A".into(), "B".into(), "C".into()]).unwrap();
//! assert!(fc.corr[(1, 1)].is_nan());
//! assert_eq!(fc.corr[(0, 2)], fc.corr[(2, 0)]);
//! ```
//!
//! # Processing a Batch
//!
//! ```rust
//! use fnirs_roi::config::{Condition, PipelineConfig};
//! use fnirs_roi::pipeline::run_batch;
//! use fnirs_roi::region::RegionMap;
//! use fnirs_roi::synth::{block_design, SyntheticRecording};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let sampler = SyntheticRecording::new(300, 4, vec![block_design(5, 10, 30, 20)], 30).unwrap();
//! let recordings = (0..3)
//!     .map(|i| sampler.sample(&format!("s{:02}", i), &mut rng).unwrap())
//!     .collect::<Vec<_>>();
//!
//! let regions = RegionMap::from_groups(vec![vec![0, 1], vec![2, 3]]).unwrap();
//! let config = PipelineConfig::new(regions, vec![Condition::new("normal", 0)]);
//! let report = run_batch(&recordings, &config).unwrap();
//!
//! assert_eq!(report.num_processed(), 3);
//! let fc = report.group_connectivity("normal").unwrap().unwrap();
//! assert_eq!(fc.num_regions(), 2);
//! ```

pub mod config;
pub mod detrend;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod region;
pub mod signal;
pub mod stimulus;
pub mod synth;
pub mod trial;

/// The number of hemoglobin kinds along the signal-kind axis (oxygenated, deoxygenated, total).
pub const NUM_HEMO_KINDS: usize = 3;
/// Minimum number of recordings to consider parallel processing.
pub const MIN_PARALLEL_FILES: usize = 4;
