use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use log::debug;
use phishnet_core::ForestParams;
use phishnet_ml::extract::DEFAULT_USER_AGENT;
use phishnet_ml::whois::{DEFAULT_WHOIS_SERVER, WHOIS_PORT};
use phishnet_ml::{ExtractorSettings, TrainingSettings, DEFAULT_HISTORY_CAPACITY};
use serde::Deserialize;

/// Settings read from `phishnet.toml`. Every section and key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub extractor: ExtractorSection,
    pub training: TrainingSection,
    pub output: OutputSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorSection {
    pub http_timeout_secs: u64,
    pub whois_timeout_secs: u64,
    pub user_agent: String,
    pub whois_server: String,
    pub whois_port: u16,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            http_timeout_secs: 5,
            whois_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            whois_server: DEFAULT_WHOIS_SERVER.to_string(),
            whois_port: WHOIS_PORT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingSection {
    pub trees: usize,
    pub max_depth: usize,
    pub seed: u64,
    pub test_ratio: f64,
    pub split_seed: u64,
    pub parallel_extraction: bool,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            trees: 100,
            max_depth: 10,
            seed: 42,
            test_ratio: 0.2,
            split_seed: 42,
            parallel_extraction: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub model_path: PathBuf,
    pub dataset_path: PathBuf,
    pub model_version: String,
    pub history_capacity: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/phishing_model.json"),
            dataset_path: PathBuf::from("data/phishing_dataset.csv"),
            model_version: "0.1.0".to_string(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Reads the file at `path`, falling back to defaults when it does not
    /// exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no configuration at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parse TOML configuration {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..1.0).contains(&self.training.test_ratio),
            "test_ratio must be within [0, 1)"
        );
        ensure!(self.training.trees > 0, "trees must be at least 1");
        ensure!(self.training.max_depth > 0, "max_depth must be at least 1");
        ensure!(
            self.extractor.http_timeout_secs > 0,
            "http_timeout_secs must be positive"
        );
        ensure!(
            self.extractor.whois_timeout_secs > 0,
            "whois_timeout_secs must be positive"
        );
        ensure!(
            self.output.history_capacity > 0,
            "history_capacity must be at least 1"
        );
        Ok(())
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        let section = &self.extractor;
        ExtractorSettings {
            http_timeout: Duration::from_secs(section.http_timeout_secs),
            whois_timeout: Duration::from_secs(section.whois_timeout_secs),
            user_agent: section.user_agent.clone(),
            whois_server: section.whois_server.clone(),
            whois_port: section.whois_port,
        }
    }

    pub fn training_settings(&self) -> TrainingSettings {
        let section = &self.training;
        TrainingSettings {
            forest: ForestParams {
                trees: section.trees,
                max_depth: section.max_depth,
                ..ForestParams::default()
            },
            seed: section.seed,
            test_ratio: section.test_ratio,
            split_seed: section.split_seed,
            parallel_extraction: section.parallel_extraction,
            model_version: self.output.model_version.clone(),
        }
    }
}
