//! Command definitions and executors

use crate::output::{write_analysis, write_summary, OutputFormat, Summary};
use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use vitalwatch_core::anomaly::synthetic_training_set;
use vitalwatch_core::config::SourceConfig;
use vitalwatch_core::source::tabular::write_readings;
use vitalwatch_core::source::{mock_dataset, CsvSource, MAX_DATASET_HOURS};
use vitalwatch_core::{Pipeline, PipelineConfig, ZScoreModel};

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Completed; nothing flagged (or flagging was not requested)
    Success = 0,
    /// Completed with `--fail-on-alert` and at least one flagged reading
    Flagged = 2,
    /// Invalid input, configuration or arguments
    InvalidInput = 3,
    /// File or source I/O error
    FileError = 4,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

/// Log output format
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum LogFormat {
    /// Structured JSON logs
    #[default]
    Json,
    /// Human-readable logs
    Pretty,
}

/// Vital-sign ingestion and alerting pipeline
#[derive(Parser, Debug)]
#[command(name = "vitalwatch")]
#[command(about = "VitalWatch - vital-sign ingestion, baseline alerting and anomaly scoring")]
#[command(version)]
pub struct Cli {
    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value = "json", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the commands that evaluate readings
#[derive(clap::Args, Debug, Clone, Default)]
pub struct EvaluationArgs {
    /// Pipeline configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "VITALWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Baseline ranges file (JSON), overrides the configuration
    #[arg(long)]
    pub baselines: Option<PathBuf>,

    /// Saved anomaly model, overrides the configuration
    #[arg(long)]
    pub model: Option<PathBuf>,

    /// Output format for analyses
    #[arg(long, value_enum, default_value = "json")]
    pub format: OutputFormat,

    /// Exit with status 2 if any reading raised a warning, critical alert or anomaly
    #[arg(long)]
    pub fail_on_alert: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll sources and print an analysis per cycle
    ///
    /// Sources from the configuration file come first, followed by those
    /// given on the command line in the order csv, api, simulate, sensor.
    Monitor {
        #[command(flatten)]
        eval: EvaluationArgs,

        /// Read readings from a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Fetch readings from an HTTP endpoint returning a JSON array
        #[arg(long)]
        api_url: Option<String>,

        /// Bearer token for --api-url
        #[arg(long, env = "VITALWATCH_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Add a simulated random stream
        #[arg(long)]
        simulate: bool,

        /// Add a dummy sensor for the given patient id
        #[arg(long)]
        sensor: Option<String>,

        /// Stop after this many cycles (runs until Ctrl-C otherwise)
        #[arg(long)]
        cycles: Option<usize>,

        /// Poll interval in milliseconds, overrides the configuration
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Analyze every row of a CSV file
    Evaluate {
        #[command(flatten)]
        eval: EvaluationArgs,

        /// CSV file to analyze
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Generate a mock CSV dataset
    Generate {
        /// Number of patients
        #[arg(long, default_value = "10")]
        patients: usize,

        /// Hours of history per patient (one reading every 5 minutes)
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Output CSV file
        #[arg(short, long)]
        output: PathBuf,

        /// Probability that a reading uses the abnormal pattern
        #[arg(long, default_value = "0.2")]
        abnormal_probability: f64,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Train a z-score anomaly model on synthetic resting data
    Train {
        /// Number of training samples
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Output model file (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Anomaly threshold in standard deviations
        #[arg(long, default_value = "3.0")]
        threshold: f64,

        /// RNG seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// Dispatch a parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Monitor {
            eval,
            csv,
            api_url,
            api_key,
            simulate,
            sensor,
            cycles,
            interval_ms,
        } => {
            let mut config = load_config(&eval)?;
            if let Some(path) = csv {
                config.sources.push(SourceConfig::Csv { path });
            }
            if let Some(url) = api_url {
                config.sources.push(SourceConfig::Http {
                    url,
                    api_key,
                    timeout_ms: None,
                });
            }
            if simulate {
                config.sources.push(SourceConfig::simulated());
            }
            if let Some(patient_id) = sensor {
                config.sources.push(SourceConfig::sensor(patient_id));
            }
            if let Some(ms) = interval_ms {
                config.coordinator.poll_interval_ms = ms;
            }
            if config.sources.is_empty() {
                bail!("no sources configured: pass --csv, --api-url, --simulate, --sensor or a config file with sources");
            }

            execute_monitor(&config, cycles, eval.format, eval.fail_on_alert).await
        }
        Commands::Evaluate { eval, input } => {
            let config = load_config(&eval)?;
            execute_evaluate(&config, &input, eval.format, eval.fail_on_alert).await
        }
        Commands::Generate {
            patients,
            hours,
            output,
            abnormal_probability,
            seed,
        } => execute_generate(patients, hours, &output, abnormal_probability, seed),
        Commands::Train {
            samples,
            output,
            threshold,
            seed,
        } => execute_train(samples, &output, threshold, seed),
    }
}

/// Load the configuration file (if any), apply environment overrides and
/// command-line overrides
pub fn load_config(args: &EvaluationArgs) -> anyhow::Result<PipelineConfig> {
    let config = match args.config {
        Some(ref path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let mut config = config.with_env_overrides()?;

    if let Some(ref path) = args.baselines {
        config.baseline.path = Some(path.clone());
    }
    if let Some(ref path) = args.model {
        config.anomaly.model_path = Some(path.clone());
    }
    Ok(config)
}

fn rng(seed: Option<u64>) -> StdRng {
    seed.map(StdRng::seed_from_u64).unwrap_or_else(StdRng::from_entropy)
}

fn exit_code(summary: &Summary, fail_on_alert: bool) -> ExitCode {
    if fail_on_alert && summary.flagged() {
        ExitCode::Flagged
    } else {
        ExitCode::Success
    }
}

/// Run the pipeline for a fixed number of cycles or until Ctrl-C
pub async fn execute_monitor(
    config: &PipelineConfig,
    cycles: Option<usize>,
    format: OutputFormat,
    fail_on_alert: bool,
) -> anyhow::Result<ExitCode> {
    let pipeline = Pipeline::from_config(config)?;
    if pipeline.coordinator().source_names().is_empty() {
        bail!("none of the configured sources could be initialised");
    }

    let stdout = io::stdout();
    let mut summary = Summary::default();

    match cycles {
        Some(cycles) => {
            let coordinator = pipeline.coordinator();
            for n in 0..cycles {
                if n > 0 {
                    tokio::time::sleep(pipeline.poll_interval()).await;
                }
                if let Some(analysis) = coordinator.cycle().await {
                    summary.record(&analysis);
                    write_analysis(&mut stdout.lock(), &analysis, format)?;
                }
            }
        }
        None => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (handle, mut results) = pipeline.spawn(shutdown_rx);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown requested");
                    let _ = shutdown_tx.send(true);
                }
            });

            while let Some(analysis) = results.recv().await {
                summary.record(&analysis);
                write_analysis(&mut stdout.lock(), &analysis, format)?;
            }
            handle.await.context("coordinator task failed")?;
        }
    }

    write_summary(&mut stdout.lock(), &summary, format)?;
    Ok(exit_code(&summary, fail_on_alert))
}

/// Analyze every row of a CSV file
pub async fn execute_evaluate(
    config: &PipelineConfig,
    input: &Path,
    format: OutputFormat,
    fail_on_alert: bool,
) -> anyhow::Result<ExitCode> {
    let source = CsvSource::from_file(input)?;
    let batch = source.read_all()?;

    let mut config = config.clone();
    config.sources.clear();
    let pipeline = Pipeline::from_config(&config)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut summary = Summary::default();
    for reading in batch.readings {
        let analysis = pipeline.coordinator().analyze(reading).await;
        summary.record(&analysis);
        write_analysis(&mut out, &analysis, format)?;
    }
    if !batch.skipped.is_empty() {
        tracing::warn!(skipped = batch.skipped.len(), "Some rows were skipped");
    }

    write_summary(&mut out, &summary, format)?;
    out.flush()?;
    Ok(exit_code(&summary, fail_on_alert))
}

/// Write a mock dataset to `output`
pub fn execute_generate(
    patients: usize,
    hours: u32,
    output: &Path,
    abnormal_probability: f64,
    seed: Option<u64>,
) -> anyhow::Result<ExitCode> {
    if !(0.0..=1.0).contains(&abnormal_probability) {
        tracing::error!(abnormal_probability, "abnormal probability must be within [0, 1]");
        return Ok(ExitCode::InvalidInput);
    }
    if hours > MAX_DATASET_HOURS {
        tracing::error!(hours, max = MAX_DATASET_HOURS, "hours exceeds the supported span");
        return Ok(ExitCode::InvalidInput);
    }

    let readings = mock_dataset(&mut rng(seed), patients, hours, abnormal_probability, Utc::now())?;
    let file = std::fs::File::create(output)
        .with_context(|| format!("creating {}", output.display()))?;
    write_readings(io::BufWriter::new(file), &readings)?;

    tracing::info!(
        readings = readings.len(),
        patients,
        hours,
        output = %output.display(),
        "Generated mock dataset"
    );
    Ok(ExitCode::Success)
}

/// Train and save a z-score model
pub fn execute_train(
    samples: usize,
    output: &Path,
    threshold: f64,
    seed: Option<u64>,
) -> anyhow::Result<ExitCode> {
    if !threshold.is_finite() || threshold <= 0.0 {
        tracing::error!(threshold, "threshold must be a positive number");
        return Ok(ExitCode::InvalidInput);
    }

    let training = synthetic_training_set(&mut rng(seed), samples);
    let mut model = ZScoreModel::new(threshold);
    model.train(&training)?;
    model
        .save(output)
        .with_context(|| format!("saving model to {}", output.display()))?;

    tracing::info!(samples, output = %output.display(), "Saved anomaly model");
    Ok(ExitCode::Success)
}
