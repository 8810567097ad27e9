#![no_std]

//! Bagged decision-tree ensemble with exact per-feature attribution.
//!
//! The crate is a pure numeric engine: it never touches the network, the file
//! system or the clock. Randomness is injected by the caller so that fitting is
//! reproducible under a fixed seed.

extern crate alloc;

use core::fmt;

use serde::{Deserialize, Serialize};

mod explain;
mod forest;
mod tree;

pub use explain::{Explanation, TreeExplainer};
pub use forest::RandomForest;
pub use tree::{DecisionTree, Node};

/// Errors raised while fitting or evaluating a [`RandomForest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForestError {
    /// No rows were supplied for fitting.
    EmptyTrainingSet,
    /// The ensemble was configured with zero trees.
    NoTrees,
    /// Rows carry no features.
    NoFeatures,
    /// Row and label slices differ in length.
    LabelCountMismatch { rows: usize, labels: usize },
    /// A training row is wider or narrower than the first row.
    InconsistentRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    /// An inference row does not match the width the model was fitted on.
    RowWidthMismatch { expected: usize, found: usize },
    /// A deserialized tree references nodes or features it does not have.
    MalformedTree { tree: usize, node: usize },
}

impl fmt::Display for ForestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForestError::EmptyTrainingSet => write!(f, "training set is empty"),
            ForestError::NoTrees => write!(f, "ensemble must contain at least one tree"),
            ForestError::NoFeatures => write!(f, "training rows carry no features"),
            ForestError::LabelCountMismatch { rows, labels } => {
                write!(f, "{rows} rows but {labels} labels")
            }
            ForestError::InconsistentRow {
                row,
                expected,
                found,
            } => write!(f, "row {row} has {found} features, expected {expected}"),
            ForestError::RowWidthMismatch { expected, found } => write!(
                f,
                "model expects {expected} features but the input has {found}"
            ),
            ForestError::MalformedTree { tree, node } => {
                write!(f, "tree {tree} is malformed at node {node}")
            }
        }
    }
}

/// Convenience result type used by the ensemble.
pub type ForestResult<T> = core::result::Result<T, ForestError>;

/// Hyper-parameters for [`RandomForest::fit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees in the ensemble.
    pub trees: usize,
    /// Maximum depth of every tree; the root sits at depth zero.
    pub max_depth: usize,
    /// Nodes with fewer rows than this become leaves.
    pub min_samples_split: usize,
    /// Features considered per split. `None` uses `floor(sqrt(n_features))`.
    pub max_features: Option<usize>,
    /// Fit each tree on a bootstrap resample of the rows.
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            max_features: None,
            bootstrap: true,
        }
    }
}

impl ForestParams {
    /// Resolves the per-split feature budget for a model of the given width.
    pub fn features_per_split(&self, feature_count: usize) -> usize {
        let budget = match self.max_features {
            Some(count) => count,
            None => libm::sqrt(feature_count as f64) as usize,
        };
        budget.clamp(1, feature_count.max(1))
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqrt_budget_matches_feature_width() {
        let params = ForestParams::default();
        assert_eq!(params.features_per_split(12), 3);
        assert_eq!(params.features_per_split(1), 1);
        assert_eq!(params.features_per_split(16), 4);
    }

    #[test]
    fn explicit_budget_is_clamped() {
        let params = ForestParams {
            max_features: Some(40),
            ..ForestParams::default()
        };
        assert_eq!(params.features_per_split(12), 12);

        let params = ForestParams {
            max_features: Some(0),
            ..ForestParams::default()
        };
        assert_eq!(params.features_per_split(12), 1);
    }

    #[test]
    fn errors_render_their_context() {
        let message = std::format!(
            "{}",
            ForestError::RowWidthMismatch {
                expected: 12,
                found: 11
            }
        );
        assert_eq!(message, "model expects 12 features but the input has 11");
    }
}
