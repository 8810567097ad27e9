pub mod artifact;
pub mod dataset;
pub mod extract;
pub mod history;
pub mod metrics;
pub mod predictor;
pub mod schema;
pub mod training;
pub mod whois;

pub use artifact::{ArtifactError, ModelArtifact, ModelMetadata};
pub use dataset::{DatasetError, TrainingMatrix, TrainingRecord};
pub use extract::{ExtractorSettings, UrlFeatureExtractor};
pub use history::{ScanEntry, ScanHistory, DEFAULT_HISTORY_CAPACITY};
pub use metrics::ClassificationReport;
pub use predictor::{Attribution, FeatureAttribution, PhishingPredictor, PredictionResult, PredictorError};
pub use schema::{FeatureId, FeatureValue, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use training::{TrainingError, TrainingOutcome, TrainingSettings};
