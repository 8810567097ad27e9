//! Offline workflow turning a labelled URL list into a persisted artifact.

use std::path::Path;

use log::{info, warn};
use phishnet_core::{ForestError, ForestParams, RandomForest};
use rand::rngs::StdRng;
use rand::SeedableRng;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::artifact::{ArtifactError, ModelArtifact, ModelMetadata};
use crate::dataset::{
    build_training_matrix, load_records, shuffle_split, DatasetError, TrainingMatrix,
    TrainingRecord,
};
use crate::extract::UrlFeatureExtractor;
use crate::metrics::ClassificationReport;
use crate::schema::{FeatureId, FEATURE_NAMES};

/// Feature importances listed in the training log.
const REPORTED_IMPORTANCES: usize = 5;

#[derive(Clone, Debug)]
pub struct TrainingSettings {
    pub forest: ForestParams,
    /// Seed for bootstrap sampling and split-feature selection.
    pub seed: u64,
    pub test_ratio: f64,
    pub split_seed: u64,
    pub parallel_extraction: bool,
    pub model_version: String,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            seed: 42,
            test_ratio: 0.2,
            split_seed: 42,
            parallel_extraction: false,
            model_version: "0.1.0".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("no usable training rows: all {total} records had unavailable features")]
    EmptyTrainingMatrix { total: usize },
    #[error("test_ratio must be within [0, 1), got {0}")]
    InvalidTestRatio(f64),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("model fitting failed: {0}")]
    Model(ForestError),
    #[error("cannot timestamp the model: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl From<ForestError> for TrainingError {
    fn from(value: ForestError) -> Self {
        TrainingError::Model(value)
    }
}

/// Artifact produced by a run plus what the operator is told about it.
#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    /// Held-out evaluation; `None` when the test split was empty.
    pub report: Option<ClassificationReport>,
    pub kept: usize,
    pub skipped: usize,
}

/// Reads `dataset_path`, trains, and writes the artifact to `output_path`.
pub fn run_training_pipeline(
    dataset_path: &Path,
    output_path: &Path,
    extractor: &UrlFeatureExtractor,
    settings: &TrainingSettings,
) -> Result<TrainingOutcome, TrainingError> {
    info!("loading dataset from {}", dataset_path.display());
    let records = load_records(dataset_path)?;
    info!("loaded {} records", records.len());

    let outcome = train_from_records(&records, extractor, settings)?;
    outcome.artifact.save(output_path)?;
    info!("saved model to {}", output_path.display());
    Ok(outcome)
}

/// Extracts features for `records` and fits a model on the complete rows.
pub fn train_from_records(
    records: &[TrainingRecord],
    extractor: &UrlFeatureExtractor,
    settings: &TrainingSettings,
) -> Result<TrainingOutcome, TrainingError> {
    let matrix = build_training_matrix(records, extractor, settings.parallel_extraction);
    train_from_matrix(matrix, settings)
}

pub fn train_from_matrix(
    matrix: TrainingMatrix,
    settings: &TrainingSettings,
) -> Result<TrainingOutcome, TrainingError> {
    if !(0.0..1.0).contains(&settings.test_ratio) {
        return Err(TrainingError::InvalidTestRatio(settings.test_ratio));
    }
    if matrix.is_empty() {
        return Err(TrainingError::EmptyTrainingMatrix {
            total: matrix.skipped,
        });
    }

    let kept = matrix.len();
    let skipped = matrix.skipped;
    let positives = matrix.positives();
    if positives == 0 || positives == kept {
        warn!("training data holds a single class; predictions will be constant");
    }

    let (train_set, test_set) = shuffle_split(matrix, settings.test_ratio, settings.split_seed)?;
    info!(
        "training with {} samples, testing on {} samples",
        train_set.len(),
        test_set.len()
    );

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let model = RandomForest::fit(&train_set.rows, &train_set.labels, &settings.forest, &mut rng)?;

    let report = evaluate(&model, &test_set)?;
    match &report {
        Some(report) => info!("held-out evaluation:\n{report}"),
        None => warn!("test split is empty; skipping evaluation"),
    }
    log_importances(&model);

    let metadata = ModelMetadata {
        model_version: settings.model_version.clone(),
        training_date: OffsetDateTime::now_utc().format(&Rfc3339)?,
        features: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
        trees: settings.forest.trees,
        max_depth: settings.forest.max_depth,
        seed: settings.seed,
        training_rows: train_set.len(),
        skipped_rows: skipped,
    };

    Ok(TrainingOutcome {
        artifact: ModelArtifact::new(metadata, model),
        report,
        kept,
        skipped,
    })
}

fn evaluate(
    model: &RandomForest,
    test_set: &TrainingMatrix,
) -> Result<Option<ClassificationReport>, ForestError> {
    if test_set.is_empty() {
        return Ok(None);
    }
    let predictions = test_set
        .rows
        .iter()
        .map(|row| model.predict(row))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(ClassificationReport::new(&predictions, &test_set.labels)))
}

fn log_importances(model: &RandomForest) {
    let mut ranked: Vec<(FeatureId, f64)> = FeatureId::ALL
        .iter()
        .copied()
        .zip(model.feature_importances())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (feature, importance) in ranked.into_iter().take(REPORTED_IMPORTANCES) {
        info!("importance {:<20} {importance:.4}", feature.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FEATURE_COUNT;

    fn matrix(rows: usize) -> TrainingMatrix {
        let mut matrix = TrainingMatrix::default();
        for i in 0..rows {
            let phishing = i % 2 == 0;
            let mut row = vec![1.0; FEATURE_COUNT];
            row[FeatureId::HasAtSymbol.index()] = if phishing { 1.0 } else { 0.0 };
            row[FeatureId::UrlLength.index()] = (20 + i % 7) as f64;
            matrix.rows.push(row);
            matrix.labels.push(phishing);
        }
        matrix
    }

    fn settings() -> TrainingSettings {
        TrainingSettings {
            forest: ForestParams {
                trees: 10,
                ..ForestParams::default()
            },
            ..TrainingSettings::default()
        }
    }

    #[test]
    fn fits_and_reports_on_held_out_rows() {
        let outcome = train_from_matrix(matrix(50), &settings()).unwrap();
        assert_eq!(outcome.kept, 50);
        assert_eq!(outcome.artifact.metadata.training_rows, 40);
        assert_eq!(outcome.artifact.metadata.trees, 10);
        assert!(outcome.artifact.ensure_compatible().is_ok());

        let report = outcome.report.unwrap();
        assert_eq!(report.confusion.total(), 10);
        assert!(report.accuracy > 0.9);
    }

    #[test]
    fn training_is_reproducible_under_fixed_seeds() {
        let first = train_from_matrix(matrix(30), &settings()).unwrap();
        let second = train_from_matrix(matrix(30), &settings()).unwrap();
        assert_eq!(first.artifact.model, second.artifact.model);
    }

    #[test]
    fn empty_matrix_is_reported_not_fitted() {
        let mut empty = TrainingMatrix::default();
        empty.skipped = 4;
        assert!(matches!(
            train_from_matrix(empty, &settings()),
            Err(TrainingError::EmptyTrainingMatrix { total: 4 })
        ));
    }

    #[test]
    fn zero_test_ratio_skips_evaluation() {
        let settings = TrainingSettings {
            test_ratio: 0.0,
            ..settings()
        };
        let outcome = train_from_matrix(matrix(10), &settings).unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(outcome.artifact.metadata.training_rows, 10);
    }

    #[test]
    fn out_of_range_test_ratio_is_rejected() {
        let settings = TrainingSettings {
            test_ratio: 1.0,
            ..settings()
        };
        assert!(matches!(
            train_from_matrix(matrix(10), &settings),
            Err(TrainingError::InvalidTestRatio(_))
        ));
    }
}
