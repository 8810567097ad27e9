use alloc::vec;
use alloc::vec::Vec;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tree::{DecisionTree, TreeParams};
use crate::{ForestError, ForestParams, ForestResult};

/// Ensemble of bagged decision trees for binary classification.
///
/// Class probabilities are the mean of the per-tree leaf fractions, so the
/// positive-class probability of a row is `trees.map(predict).mean()`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub(crate) feature_count: usize,
    pub(crate) trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fits an ensemble on `rows` with boolean `labels` (true = positive class).
    pub fn fit<R: Rng + ?Sized>(
        rows: &[Vec<f64>],
        labels: &[bool],
        params: &ForestParams,
        rng: &mut R,
    ) -> ForestResult<Self> {
        if rows.is_empty() {
            return Err(ForestError::EmptyTrainingSet);
        }
        if rows.len() != labels.len() {
            return Err(ForestError::LabelCountMismatch {
                rows: rows.len(),
                labels: labels.len(),
            });
        }
        if params.trees == 0 {
            return Err(ForestError::NoTrees);
        }

        let feature_count = rows[0].len();
        if feature_count == 0 {
            return Err(ForestError::NoFeatures);
        }
        if let Some((row, found)) = rows
            .iter()
            .map(Vec::len)
            .enumerate()
            .find(|(_, len)| *len != feature_count)
        {
            return Err(ForestError::InconsistentRow {
                row,
                expected: feature_count,
                found,
            });
        }

        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split.max(2),
            features_per_split: params.features_per_split(feature_count),
        };

        let row_count = rows.len();
        let mut samples = Vec::with_capacity(row_count);
        let mut trees = Vec::with_capacity(params.trees);
        for _ in 0..params.trees {
            samples.clear();
            if params.bootstrap {
                samples.extend((0..row_count).map(|_| rng.gen_range(0..row_count)));
            } else {
                samples.extend(0..row_count);
            }
            trees.push(DecisionTree::fit(
                rows,
                labels,
                &mut samples,
                tree_params,
                rng,
            ));
        }

        debug!(
            target: "phishnet_core::forest",
            "fitted {} trees on {} rows x {} features (max depth {}, {} features per split)",
            trees.len(),
            row_count,
            feature_count,
            tree_params.max_depth,
            tree_params.features_per_split
        );

        Ok(Self {
            feature_count,
            trees,
        })
    }

    /// Number of features every input row must carry.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Returns `[negative, positive]` class probabilities for `row`.
    pub fn predict_proba(&self, row: &[f64]) -> ForestResult<[f64; 2]> {
        self.check_width(row)?;
        let positive = self.trees.iter().map(|tree| tree.predict(row)).sum::<f64>()
            / self.trees.len() as f64;
        Ok([1.0 - positive, positive])
    }

    /// Returns true when the positive class is strictly more probable.
    pub fn predict(&self, row: &[f64]) -> ForestResult<bool> {
        let [negative, positive] = self.predict_proba(row)?;
        Ok(positive > negative)
    }

    /// Mean decrease in impurity per feature, normalised to sum to one.
    pub fn feature_importances(&self) -> Vec<f64> {
        let mut totals = vec![0.0; self.feature_count];
        let mut per_tree = vec![0.0; self.feature_count];
        for tree in &self.trees {
            per_tree.iter_mut().for_each(|value| *value = 0.0);
            tree.accumulate_importances(&mut per_tree);
            let sum: f64 = per_tree.iter().sum();
            if sum > 0.0 {
                for (total, value) in totals.iter_mut().zip(&per_tree) {
                    *total += value / sum;
                }
            }
        }
        let sum: f64 = totals.iter().sum();
        if sum > 0.0 {
            totals.iter_mut().for_each(|value| *value /= sum);
        }
        totals
    }

    /// Verifies a deserialized ensemble before it is used for inference.
    pub fn validate(&self) -> ForestResult<()> {
        if self.trees.is_empty() {
            return Err(ForestError::NoTrees);
        }
        if self.feature_count == 0 {
            return Err(ForestError::NoFeatures);
        }
        for (index, tree) in self.trees.iter().enumerate() {
            if tree.feature_count() != self.feature_count {
                return Err(ForestError::MalformedTree {
                    tree: index,
                    node: 0,
                });
            }
            tree.validate()
                .map_err(|node| ForestError::MalformedTree { tree: index, node })?;
        }
        Ok(())
    }

    pub(crate) fn check_width(&self, row: &[f64]) -> ForestResult<()> {
        if row.len() != self.feature_count {
            return Err(ForestError::RowWidthMismatch {
                expected: self.feature_count,
                found: row.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn noisy_data(seed: u64) -> (Vec<Vec<f64>>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for _ in 0..200 {
            let signal: f64 = rng.gen_range(0.0..10.0);
            let noise: f64 = rng.gen_range(0.0..10.0);
            let flip = rng.gen_bool(0.1);
            rows.push(vec![signal, noise, 3.0]);
            labels.push((signal > 5.0) ^ flip);
        }
        (rows, labels)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            trees: 15,
            max_depth: 4,
            ..ForestParams::default()
        }
    }

    #[test]
    fn same_seed_produces_identical_forests() {
        let (rows, labels) = noisy_data(11);
        let first =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(42))
                .expect("fit");
        let second =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(42))
                .expect("fit");
        assert_eq!(first, second);
        assert_eq!(first.tree_count(), 15);
        assert!(first.trees().iter().all(|tree| tree.depth() <= 4));
    }

    #[test]
    fn probabilities_are_complementary_and_track_the_signal() {
        let (rows, labels) = noisy_data(5);
        let forest =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(1))
                .expect("fit");

        let [low_neg, low_pos] = forest.predict_proba(&[1.0, 5.0, 3.0]).expect("proba");
        assert!((low_neg + low_pos - 1.0).abs() < 1e-12);
        assert!(!forest.predict(&[1.0, 5.0, 3.0]).expect("predict"));
        assert!(forest.predict(&[9.0, 5.0, 3.0]).expect("predict"));
    }

    #[test]
    fn importances_favour_the_informative_feature() {
        let (rows, labels) = noisy_data(9);
        let forest =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(3))
                .expect("fit");
        let importances = forest.feature_importances();
        assert_eq!(importances.len(), 3);
        assert!(importances[0] > importances[1]);
        assert_eq!(importances[2], 0.0);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fit_rejects_bad_inputs() {
        let mut rng = StdRng::seed_from_u64(0);
        let params = small_params();
        assert_eq!(
            RandomForest::fit(&[], &[], &params, &mut rng),
            Err(ForestError::EmptyTrainingSet)
        );
        assert_eq!(
            RandomForest::fit(&[vec![1.0]], &[true, false], &params, &mut rng),
            Err(ForestError::LabelCountMismatch { rows: 1, labels: 2 })
        );
        assert_eq!(
            RandomForest::fit(
                &[vec![1.0, 2.0], vec![1.0]],
                &[true, false],
                &params,
                &mut rng
            ),
            Err(ForestError::InconsistentRow {
                row: 1,
                expected: 2,
                found: 1
            })
        );
        let no_trees = ForestParams {
            trees: 0,
            ..params
        };
        assert_eq!(
            RandomForest::fit(&[vec![1.0]], &[true], &no_trees, &mut rng),
            Err(ForestError::NoTrees)
        );
    }

    #[test]
    fn inference_rejects_wrong_width() {
        let (rows, labels) = noisy_data(2);
        let forest =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(8))
                .expect("fit");
        assert_eq!(
            forest.predict_proba(&[1.0, 2.0]),
            Err(ForestError::RowWidthMismatch {
                expected: 3,
                found: 2
            })
        );
        assert!(forest.validate().is_ok());
    }

    #[test]
    fn single_class_training_is_certain() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let labels = vec![true, true, true];
        let forest =
            RandomForest::fit(&rows, &labels, &small_params(), &mut StdRng::seed_from_u64(4))
                .expect("fit");
        assert_eq!(forest.predict_proba(&[2.0, 2.0]).expect("proba"), [0.0, 1.0]);
    }
}
