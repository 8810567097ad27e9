use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use log::{info, warn, LevelFilter};
use time::OffsetDateTime;

use phishnet_ml::training::run_training_pipeline;
use phishnet_ml::{PhishingPredictor, ScanHistory, UrlFeatureExtractor};

use crate::config::AppConfig;
use crate::report::{print_reports, OutputFormat, ScanReport};

mod config;
mod report;

#[derive(Parser, Debug)]
#[command(author, version, about = "phishnet: explainable phishing URL classifier")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "config/phishnet.toml")]
    config: PathBuf,

    /// Increase output verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one or more URLs and explain each verdict
    Scan {
        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,

        /// Model artifact to load (defaults to output.model_path)
        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Train a classifier from a labelled URL dataset
    Train {
        /// CSV with `url,is_phishing` columns (defaults to output.dataset_path)
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Where to write the model artifact (defaults to output.model_path)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = AppConfig::load(&cli.config)?;
    match cli.command {
        Command::Scan {
            urls,
            model,
            format,
        } => scan(&config, &urls, model, format.into()),
        Command::Train { dataset, output } => train(&config, dataset, output),
    }
}

fn scan(
    config: &AppConfig,
    urls: &[String],
    model: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let model_path = model.unwrap_or_else(|| config.output.model_path.clone());
    let predictor = PhishingPredictor::load(&model_path)
        .with_context(|| format!("failed to load model from {}", model_path.display()))?;
    let extractor = UrlFeatureExtractor::new(&config.extractor_settings())
        .context("failed to build the HTTP client")?;
    info!(
        "model {} trained {} on {} rows",
        predictor.metadata().model_version,
        predictor.metadata().training_date,
        predictor.metadata().training_rows
    );

    let mut history = ScanHistory::with_capacity(config.output.history_capacity);
    let mut reports = Vec::with_capacity(urls.len());
    for url in urls {
        let vector = extractor.extract(url);
        match predictor.predict_values(&vector.encode()) {
            Ok(prediction) => {
                history.record(url, &prediction, OffsetDateTime::now_utc());
                reports.push(ScanReport::success(url, prediction));
            }
            Err(err) => {
                warn!("analysis of {url} failed: {err}");
                reports.push(ScanReport::failure(url, err));
            }
        }
    }

    print_reports(&reports, &history, format);
    Ok(())
}

fn train(config: &AppConfig, dataset: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let dataset_path = dataset.unwrap_or_else(|| config.output.dataset_path.clone());
    let output_path = output.unwrap_or_else(|| config.output.model_path.clone());
    let extractor = UrlFeatureExtractor::new(&config.extractor_settings())
        .context("failed to build the HTTP client")?;

    let outcome = run_training_pipeline(
        &dataset_path,
        &output_path,
        &extractor,
        &config.training_settings(),
    )
    .context("training failed")?;

    println!(
        "Trained on {} rows ({} skipped for unavailable features)",
        outcome.kept, outcome.skipped
    );
    if let Some(report) = &outcome.report {
        println!("\n{report}");
    }
    println!("Model saved to {}", output_path.display());
    Ok(())
}

fn init_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    builder.filter_level(level).format_timestamp_millis();
    builder.try_init().map_err(|err| err.into())
}
