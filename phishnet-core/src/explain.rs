//! Exact path-dependent TreeSHAP over a [`RandomForest`].
//!
//! Attribution targets the positive-class probability. For every row the
//! values satisfy `base_value + values.sum() == predict_proba(row)[1]`.

use alloc::vec;
use alloc::vec::Vec;

use log::trace;

use crate::forest::RandomForest;
use crate::tree::DecisionTree;
use crate::ForestResult;

/// Additive decomposition of one prediction.
#[derive(Clone, Debug, PartialEq)]
pub struct Explanation {
    /// Expected positive-class probability over the training distribution.
    pub base_value: f64,
    /// Signed contribution of each feature, in model feature order.
    pub values: Vec<f64>,
}

impl Explanation {
    /// `base_value` plus every contribution; equals the explained probability.
    pub fn total(&self) -> f64 {
        self.base_value + self.values.iter().sum::<f64>()
    }
}

/// Attribution engine bound to one fitted forest.
///
/// Construction walks every tree once; build it when the model is loaded and
/// reuse it for every prediction.
#[derive(Clone, Debug)]
pub struct TreeExplainer {
    forest: RandomForest,
    base_value: f64,
}

#[derive(Clone, Copy, Debug, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

impl TreeExplainer {
    /// Fails when the forest is empty or structurally inconsistent.
    pub fn new(forest: RandomForest) -> ForestResult<Self> {
        forest.validate()?;
        let trees = forest.trees();
        let base_value =
            trees.iter().map(|tree| tree.root().value).sum::<f64>() / trees.len() as f64;
        trace!(
            target: "phishnet_core::explain",
            "explainer ready: {} trees, base value {:.4}",
            trees.len(),
            base_value
        );
        Ok(Self { forest, base_value })
    }

    /// The forest this explainer attributes.
    pub fn model(&self) -> &RandomForest {
        &self.forest
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }

    /// Attributes the positive-class probability of `row` to its features.
    pub fn shap_values(&self, row: &[f64]) -> ForestResult<Explanation> {
        self.forest.check_width(row)?;
        let mut values = vec![0.0; self.forest.feature_count()];
        for tree in self.forest.trees() {
            recurse(tree, row, &mut values, &[], 0, 0, 1.0, 1.0, None);
        }
        let scale = self.forest.tree_count() as f64;
        values.iter_mut().for_each(|value| *value /= scale);
        Ok(Explanation {
            base_value: self.base_value,
            values,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &DecisionTree,
    row: &[f64],
    phi: &mut [f64],
    parent_path: &[PathElement],
    node_index: usize,
    mut depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    let mut path = Vec::with_capacity(depth + 2);
    path.extend_from_slice(&parent_path[..depth]);
    path.push(PathElement::default());
    extend_path(&mut path, depth, zero_fraction, one_fraction, feature);

    let nodes = tree.nodes();
    let node = &nodes[node_index];
    let Some(split) = node.feature else {
        for i in 1..=depth {
            let weight = unwound_path_sum(&path, depth, i);
            let element = path[i];
            if let Some(index) = element.feature {
                phi[index] +=
                    weight * (element.one_fraction - element.zero_fraction) * node.value;
            }
        }
        return;
    };

    let (hot, cold) = if row[split] <= node.threshold {
        (node.left, node.right)
    } else {
        (node.right, node.left)
    };
    let hot_zero = nodes[hot].cover / node.cover;
    let cold_zero = nodes[cold].cover / node.cover;

    let mut incoming_zero = 1.0;
    let mut incoming_one = 1.0;
    if let Some(previous) = (1..=depth).find(|&i| path[i].feature == Some(split)) {
        incoming_zero = path[previous].zero_fraction;
        incoming_one = path[previous].one_fraction;
        unwind_path(&mut path, depth, previous);
        depth -= 1;
    }

    recurse(
        tree,
        row,
        phi,
        &path,
        hot,
        depth + 1,
        hot_zero * incoming_zero,
        incoming_one,
        Some(split),
    );
    recurse(
        tree,
        row,
        phi,
        &path,
        cold,
        depth + 1,
        cold_zero * incoming_zero,
        0.0,
        Some(split),
    );
}

fn extend_path(
    path: &mut [PathElement],
    depth: usize,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    path[depth] = PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    };
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / scale;
        path[i].weight = zero_fraction * path[i].weight * (depth - i) as f64 / scale;
    }
}

fn unwind_path(path: &mut [PathElement], depth: usize, index: usize) {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let previous = path[i].weight;
            path[i].weight = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            next_one_portion =
                previous - path[i].weight * zero_fraction * (depth - i) as f64 / scale;
        } else {
            path[i].weight = path[i].weight * scale / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

fn unwound_path_sum(path: &[PathElement], depth: usize, index: usize) -> f64 {
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let share = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            total += share;
            next_one_portion = path[i].weight - share * zero_fraction * ((depth - i) as f64 / scale);
        } else if zero_fraction != 0.0 {
            total += (path[i].weight / zero_fraction) / ((depth - i) as f64 / scale);
        }
    }

    total
}
