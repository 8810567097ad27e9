use std::path::Path;

use log::{debug, trace};
use phishnet_core::{ForestError, TreeExplainer};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::artifact::{ArtifactError, ModelArtifact, ModelMetadata};
use crate::schema::{FeatureId, FeatureVector, FEATURE_COUNT};

#[derive(Debug, thiserror::Error)]
pub enum PredictorError {
    #[error("model expects {expected} features but the input has {found}")]
    ShapeMismatch { expected: usize, found: usize },
    #[error("model evaluation failed: {0}")]
    Model(ForestError),
}

impl From<ForestError> for PredictorError {
    fn from(value: ForestError) -> Self {
        match value {
            ForestError::RowWidthMismatch { expected, found } => {
                PredictorError::ShapeMismatch { expected, found }
            }
            other => PredictorError::Model(other),
        }
    }
}

/// Raw value and signed contribution of one feature.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FeatureAttribution {
    #[serde(skip)]
    pub feature: FeatureId,
    pub value: f64,
    pub attribution_score: f64,
}

/// Per-feature attribution in schema order. Serializes as an object keyed by
/// the human-readable feature label.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribution {
    entries: Vec<FeatureAttribution>,
}

impl Attribution {
    pub fn iter(&self) -> impl Iterator<Item = &FeatureAttribution> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn feature(&self, id: FeatureId) -> &FeatureAttribution {
        &self.entries[id.index()]
    }

    /// Looks an entry up by its human-readable label.
    pub fn get(&self, label: &str) -> Option<&FeatureAttribution> {
        self.entries
            .iter()
            .find(|entry| entry.feature.label() == label)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|entry| entry.attribution_score).sum()
    }

    /// Entries ordered by descending absolute contribution.
    pub fn ranked(&self) -> Vec<&FeatureAttribution> {
        let mut ranked: Vec<_> = self.entries.iter().collect();
        ranked.sort_by(|a, b| {
            b.attribution_score
                .abs()
                .total_cmp(&a.attribution_score.abs())
        });
        ranked
    }
}

impl Serialize for Attribution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(entry.feature.label(), entry)?;
        }
        map.end()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PredictionResult {
    /// `true` when the URL is classified as phishing.
    pub label: bool,
    /// Probability of the predicted class.
    pub confidence: f64,
    pub phishing_probability: f64,
    /// Expected phishing probability before any feature is observed.
    pub base_value: f64,
    pub attribution: Attribution,
}

impl PredictionResult {
    pub fn verdict(&self) -> &'static str {
        if self.label {
            "phishing"
        } else {
            "legitimate"
        }
    }
}

/// Loaded classifier plus the attribution engine built for it.
#[derive(Clone, Debug)]
pub struct PhishingPredictor {
    metadata: ModelMetadata,
    explainer: TreeExplainer,
}

impl PhishingPredictor {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let predictor = Self::from_artifact(ModelArtifact::load(path)?)?;
        debug!(
            target: "phishnet_ml::predictor",
            "loaded model {} ({} trees, trained {}) from {}",
            predictor.metadata.model_version,
            predictor.metadata.trees,
            predictor.metadata.training_date,
            path.display()
        );
        Ok(predictor)
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self, ArtifactError> {
        artifact.ensure_compatible()?;
        let ModelArtifact { metadata, model } = artifact;
        Ok(Self {
            metadata,
            explainer: TreeExplainer::new(model)?,
        })
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn predict(&self, vector: &FeatureVector) -> PredictionResult {
        let encoded = vector.encode();
        match self.evaluate(&encoded) {
            Ok(result) => result,
            // Widths are checked when the artifact is accepted.
            Err(err) => unreachable!("schema-width vector rejected: {err}"),
        }
    }

    /// Predicts from an already-encoded row, rejecting rows whose width does
    /// not match the model.
    pub fn predict_values(&self, values: &[f64]) -> Result<PredictionResult, PredictorError> {
        if values.len() != FEATURE_COUNT {
            return Err(PredictorError::ShapeMismatch {
                expected: FEATURE_COUNT,
                found: values.len(),
            });
        }
        self.evaluate(values)
    }

    fn evaluate(&self, values: &[f64]) -> Result<PredictionResult, PredictorError> {
        let [legitimate, phishing] = self.explainer.model().predict_proba(values)?;
        let explanation = self.explainer.shap_values(values)?;
        let label = phishing > legitimate;

        let entries = FeatureId::ALL
            .iter()
            .zip(values.iter().zip(&explanation.values))
            .map(|(&feature, (&value, &score))| FeatureAttribution {
                feature,
                value,
                attribution_score: score,
            })
            .collect();

        trace!(
            target: "phishnet_ml::predictor",
            "p(phishing)={phishing:.4} base={:.4} contributions={:?}",
            explanation.base_value,
            explanation.values
        );

        Ok(PredictionResult {
            label,
            confidence: legitimate.max(phishing),
            phishing_probability: phishing,
            base_value: explanation.base_value,
            attribution: Attribution { entries },
        })
    }
}
