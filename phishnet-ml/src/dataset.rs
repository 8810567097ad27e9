use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer};

use crate::extract::UrlFeatureExtractor;
use crate::schema::{FeatureVector, FEATURE_COUNT};

/// Rows between progress reports while extracting features.
const PROGRESS_INTERVAL: usize = 100;

/// One labelled row of the training dataset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TrainingRecord {
    pub url: String,
    #[serde(deserialize_with = "deserialize_label")]
    pub is_phishing: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("cannot open dataset {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset has no `url`/`is_phishing` header")]
    MissingColumns,
    #[error("test ratio must be within [0, 1), got {0}")]
    InvalidTestRatio(f64),
}

/// Labelled feature rows ready for fitting.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingMatrix {
    pub rows: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
    /// Records dropped because at least one feature was unavailable.
    pub skipped: usize,
}

impl TrainingMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|label| **label).count()
    }

    /// Adds a vector unless any of its features is unavailable. Returns
    /// whether the row was kept.
    pub fn push(&mut self, vector: &FeatureVector, label: bool) -> bool {
        if !vector.is_complete() {
            self.skipped += 1;
            return false;
        }
        self.rows.push(vector.encode().to_vec());
        self.labels.push(label);
        true
    }
}

/// Reads `url,is_phishing` records. Rows that fail to parse are logged and
/// skipped; a missing header is an error.
pub fn load_records(path: &Path) -> Result<Vec<TrainingRecord>, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.display().to_string(),
        source,
    })?;
    read_records(file)
}

pub fn read_records(reader: impl Read) -> Result<Vec<TrainingRecord>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?;
    if !headers.iter().any(|h| h == "url") || !headers.iter().any(|h| h == "is_phishing") {
        return Err(DatasetError::MissingColumns);
    }

    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<TrainingRecord>().enumerate() {
        match row {
            Ok(record) if !record.url.is_empty() => records.push(record),
            Ok(_) => warn!("dataset row {} has an empty url; skipping", line + 1),
            Err(err) => warn!("dataset row {} is malformed ({err}); skipping", line + 1),
        }
    }
    Ok(records)
}

fn deserialize_label<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "phishing" => Ok(true),
        "0" | "false" | "no" | "legitimate" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "unrecognised label `{other}`"
        ))),
    }
}

/// Runs the extractor over every record and keeps the complete vectors.
///
/// With `parallel` the extraction fans out over the rayon pool; row order is
/// preserved either way.
pub fn build_training_matrix(
    records: &[TrainingRecord],
    extractor: &UrlFeatureExtractor,
    parallel: bool,
) -> TrainingMatrix {
    let total = records.len();
    let processed = AtomicUsize::new(0);
    let extract = |record: &TrainingRecord| {
        let vector = extractor.extract(&record.url);
        let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
        if done % PROGRESS_INTERVAL == 0 || done == total {
            info!("extracted features for {done}/{total} urls");
        }
        vector
    };

    let vectors: Vec<FeatureVector> = if parallel {
        records.par_iter().map(extract).collect()
    } else {
        records.iter().map(extract).collect()
    };

    let mut matrix = TrainingMatrix::default();
    for (record, vector) in records.iter().zip(&vectors) {
        matrix.push(vector, record.is_phishing);
    }
    info!(
        "kept {} of {} rows ({} with unavailable features)",
        matrix.len(),
        total,
        matrix.skipped
    );
    debug_assert!(matrix.rows.iter().all(|row| row.len() == FEATURE_COUNT));
    matrix
}

/// Seeded shuffle followed by a train/test split. The test side gets
/// `ceil(len * test_ratio)` rows.
pub fn shuffle_split(
    matrix: TrainingMatrix,
    test_ratio: f64,
    seed: u64,
) -> Result<(TrainingMatrix, TrainingMatrix), DatasetError> {
    if !(0.0..1.0).contains(&test_ratio) {
        return Err(DatasetError::InvalidTestRatio(test_ratio));
    }
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut order: Vec<usize> = (0..matrix.len()).collect();
    order.shuffle(&mut rng);

    // At least one row stays on the training side.
    let test_len = (((order.len() as f64) * test_ratio).ceil() as usize)
        .min(order.len().saturating_sub(1));
    let split_index = order.len().saturating_sub(test_len);

    let mut train = TrainingMatrix::default();
    let mut test = TrainingMatrix::default();
    for (position, index) in order.into_iter().enumerate() {
        let target = if position < split_index {
            &mut train
        } else {
            &mut test
        };
        target.rows.push(matrix.rows[index].clone());
        target.labels.push(matrix.labels[index]);
    }
    train.skipped = matrix.skipped;
    Ok((train, test))
}
