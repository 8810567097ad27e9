use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use phishnet_core::{ForestError, RandomForest};
use serde::{Deserialize, Serialize};

use crate::schema::{FEATURE_COUNT, FEATURE_NAMES};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("cannot read model artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write model artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model artifact {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize model artifact: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("model was trained on {found} features but {expected} are required")]
    FeatureCount { expected: usize, found: usize },
    #[error("feature {position} is `{found}` in the artifact but `{expected}` in this build")]
    FeatureOrder {
        position: usize,
        expected: &'static str,
        found: String,
    },
    #[error("model structure is invalid: {0}")]
    Model(ForestError),
}

impl From<ForestError> for ArtifactError {
    fn from(value: ForestError) -> Self {
        ArtifactError::Model(value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_version: String,
    pub training_date: String,
    /// Feature names in the column order the model was fitted on.
    pub features: Vec<String>,
    pub trees: usize,
    pub max_depth: usize,
    pub seed: u64,
    pub training_rows: usize,
    pub skipped_rows: usize,
}

/// Trained classifier bound to the feature order it was fitted on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub metadata: ModelMetadata,
    pub model: RandomForest,
}

impl ModelArtifact {
    pub fn new(metadata: ModelMetadata, model: RandomForest) -> Self {
        Self { metadata, model }
    }

    /// Checks that the artifact matches this build's feature schema.
    pub fn ensure_compatible(&self) -> Result<(), ArtifactError> {
        if self.model.feature_count() != FEATURE_COUNT {
            return Err(ArtifactError::FeatureCount {
                expected: FEATURE_COUNT,
                found: self.model.feature_count(),
            });
        }
        if self.metadata.features.len() != FEATURE_COUNT {
            return Err(ArtifactError::FeatureCount {
                expected: FEATURE_COUNT,
                found: self.metadata.features.len(),
            });
        }
        for (position, (expected, found)) in FEATURE_NAMES
            .iter()
            .zip(&self.metadata.features)
            .enumerate()
        {
            if expected != found {
                return Err(ArtifactError::FeatureOrder {
                    position,
                    expected,
                    found: found.clone(),
                });
            }
        }
        self.model.validate()?;
        Ok(())
    }

    /// Loads and validates an artifact written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let file = File::open(path).map_err(|source| ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: Self =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                ArtifactError::Corrupt {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        artifact.ensure_compatible()?;
        Ok(artifact)
    }

    /// Writes the artifact as JSON, creating parent directories and replacing
    /// any previous artifact at `path`.
    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let write_error = |source| ArtifactError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_error)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path).map_err(write_error)?);
        serde_json::to_writer_pretty(&mut writer, self).map_err(ArtifactError::Serialize)?;
        writer.write_all(b"\n").map_err(write_error)?;
        writer.flush().map_err(write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phishnet_core::ForestParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_artifact() -> ModelArtifact {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| {
                let mut row = vec![0.0; FEATURE_COUNT];
                row[0] = i as f64;
                row
            })
            .collect();
        let labels: Vec<bool> = (0..20).map(|i| i >= 10).collect();
        let params = ForestParams {
            trees: 3,
            ..ForestParams::default()
        };
        let model =
            RandomForest::fit(&rows, &labels, &params, &mut StdRng::seed_from_u64(42)).unwrap();
        ModelArtifact::new(
            ModelMetadata {
                model_version: "test".into(),
                training_date: "2024-01-01T00:00:00Z".into(),
                features: FEATURE_NAMES.iter().map(|name| name.to_string()).collect(),
                trees: 3,
                max_depth: 10,
                seed: 42,
                training_rows: 20,
                skipped_rows: 0,
            },
            model,
        )
    }

    #[test]
    fn save_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/model/phishing_model.json");
        let artifact = tiny_artifact();
        artifact.save(&path).unwrap();
        assert_eq!(ModelArtifact::load(&path).unwrap(), artifact);
    }

    #[test]
    fn save_overwrites_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, "stale contents that are much longer than nothing").unwrap();
        tiny_artifact().save(&path).unwrap();
        assert!(ModelArtifact::load(&path).is_ok());
    }

    #[test]
    fn missing_and_corrupt_files_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(
            ModelArtifact::load(&missing),
            Err(ArtifactError::Read { .. })
        ));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{ not json").unwrap();
        assert!(matches!(
            ModelArtifact::load(&corrupt),
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[test]
    fn reordered_features_are_rejected() {
        let mut artifact = tiny_artifact();
        artifact.metadata.features.swap(0, 1);
        match artifact.ensure_compatible() {
            Err(ArtifactError::FeatureOrder {
                position, expected, ..
            }) => {
                assert_eq!(position, 0);
                assert_eq!(expected, "url_length");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn narrower_models_are_rejected() {
        let mut artifact = tiny_artifact();
        artifact.metadata.features.pop();
        assert!(matches!(
            artifact.ensure_compatible(),
            Err(ArtifactError::FeatureCount {
                expected: 12,
                found: 11
            })
        ));
    }
}
