use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use fnirs_roi::config::PipelineConfig;
use fnirs_roi::error::FnirsError;
use fnirs_roi::pipeline::run_batch;
use fnirs_roi::signal::{Recording, Sex};
use fnirs_roi::synth::{block_design, SyntheticRecording};

#[derive(Parser, Debug)]
struct Args {
    /// The pipeline configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,
    /// The recordings to process (JSON)
    inputs: Vec<PathBuf>,
    /// The output directory
    #[arg(short, long, default_value = "out")]
    out_dir: PathBuf,
    /// The log file
    #[arg(long, default_value = "log/fnirs_roi.log")]
    log_file: PathBuf,
    /// The number of synthetic recordings to process in addition to the inputs
    #[arg(long, default_value = "0")]
    synthetic: usize,
    /// The seed used for synthetic recordings
    #[arg(long, default_value = "0")]
    seed: u64,
}

fn write_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> Result<(), FnirsError> {
    let file = File::create(path).map_err(|e| FnirsError::IOError(e.to_string()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| FnirsError::IOError(e.to_string()))?;
    writer.flush().map_err(|e| FnirsError::IOError(e.to_string()))
}

/// Sample recordings with a block design in every condition column of the configuration.
fn synthetic_recordings(
    config: &PipelineConfig,
    num_recordings: usize,
    seed: u64,
) -> Result<Vec<Recording>, FnirsError> {
    let num_channels = config
        .num_channels
        .unwrap_or_else(|| config.regions.total_channels());
    let num_columns = config
        .conditions
        .iter()
        .map(|condition| condition.column + 1)
        .max()
        .unwrap_or_default();

    // conditions are interleaved, one block of 30 samples every 50 samples
    let mut onsets = vec![vec![]; num_columns];
    for (i, condition) in config.conditions.iter().enumerate() {
        onsets[condition.column] = block_design(10, 20 + 50 * i, 30, 20 + 50 * (config.conditions.len() - 1));
    }
    let num_samples = 50 * (10 * config.conditions.len() + 1);
    let sampler = SyntheticRecording::new(num_samples, num_channels, onsets, 30)?;
    let sampler = if config.paired { sampler } else { sampler.unpaired() };

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_recordings)
        .map(|i| {
            let sex = if i % 2 == 0 { Sex::Female } else { Sex::Male };
            sampler
                .clone()
                .with_sex(sex)
                .sample(&format!("synthetic_{:03}", i), &mut rng)
        })
        .collect()
}

fn main() -> Result<(), FnirsError> {
    let args = Args::parse();

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
        .build(&args.log_file)
        .map_err(|e| FnirsError::IOError(e.to_string()))?;

    let log_config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(LevelFilter::Info))
        .map_err(|e| FnirsError::IOError(e.to_string()))?;

    log4rs::init_config(log_config).map_err(|e| FnirsError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    let config = PipelineConfig::load_from(&args.config)?;
    log::info!("Configuration loading: done!");

    let mut recordings = args
        .inputs
        .iter()
        .map(Recording::load_from)
        .collect::<Result<Vec<Recording>, FnirsError>>()?;
    if args.synthetic > 0 {
        recordings.extend(synthetic_recordings(&config, args.synthetic, args.seed)?);
    }
    log::info!("Recording loading: done! {} recordings", recordings.len());

    let report = run_batch(&recordings, &config)?;
    log::info!(
        "Batch processing: done! {} processed, {} skipped or failed",
        report.num_processed(),
        report.num_dropped()
    );

    fs::create_dir_all(&args.out_dir).map_err(|e| FnirsError::IOError(e.to_string()))?;
    for record in report.processed_records() {
        record.save_to(&args.out_dir)?;
    }

    for condition in config.conditions.iter() {
        match report.group_connectivity(&condition.name)? {
            Some(fc) => {
                let path = args.out_dir.join(format!("{}_fc.json", condition.name));
                write_json(&fc, &path)?;
                log::info!("Group connectivity saved to {}", path.display());
            }
            None => log::warn!("No processed recording for condition '{}'", condition.name),
        }
    }

    let path = args.out_dir.join("activations.json");
    write_json(&report.activation_records(), &path)?;
    log::info!("Activations saved to {}", path.display());
    Ok(())
}
