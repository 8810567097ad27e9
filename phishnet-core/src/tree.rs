use alloc::vec::Vec;

use log::trace;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Single node of a fitted [`DecisionTree`]. The root is stored at index zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Split feature, `None` for leaves.
    pub feature: Option<usize>,
    /// Rows with `x[feature] <= threshold` descend to `left`.
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    /// Number of training rows (with bootstrap multiplicity) reaching the node.
    pub cover: f64,
    /// Fraction of positive rows reaching the node.
    pub value: f64,
    /// Gini impurity of the rows reaching the node.
    pub impurity: f64,
}

impl Node {
    fn leaf(cover: f64, value: f64) -> Self {
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            cover,
            value,
            impurity: gini(value),
        }
    }

    /// Returns true when the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }
}

/// Binary CART classifier predicting the positive-class fraction of its leaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    feature_count: usize,
    nodes: Vec<Node>,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub features_per_split: usize,
}

#[derive(Clone, Copy, Debug)]
struct Split {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

impl DecisionTree {
    /// Fits a tree on the rows indexed by `samples`. Indices may repeat.
    pub(crate) fn fit<R: Rng + ?Sized>(
        rows: &[Vec<f64>],
        labels: &[bool],
        samples: &mut [usize],
        params: TreeParams,
        rng: &mut R,
    ) -> Self {
        let feature_count = rows.first().map_or(0, Vec::len);
        let mut builder = Builder {
            rows,
            labels,
            params,
            rng,
            nodes: Vec::new(),
            features: (0..feature_count).collect(),
            order: Vec::with_capacity(samples.len()),
        };
        if !samples.is_empty() {
            builder.grow(samples, 0);
        }
        Self {
            feature_count,
            nodes: builder.nodes,
        }
    }

    /// Number of features the tree was fitted on.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Depth of the deepest leaf.
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            let node = &nodes[index];
            if node.is_leaf() {
                0
            } else {
                1 + walk(nodes, node.left).max(walk(nodes, node.right))
            }
        }
        walk(&self.nodes, 0)
    }

    /// Returns the leaf reached by `row`.
    pub fn leaf(&self, row: &[f64]) -> &Node {
        let mut node = &self.nodes[0];
        while let Some(feature) = node.feature {
            node = if row[feature] <= node.threshold {
                &self.nodes[node.left]
            } else {
                &self.nodes[node.right]
            };
        }
        node
    }

    /// Positive-class fraction of the leaf reached by `row`.
    pub fn predict(&self, row: &[f64]) -> f64 {
        self.leaf(row).value
    }

    /// Checks the structural invariants a fitted tree upholds.
    ///
    /// Children always sit after their parent, which rules out cycles in trees
    /// that were loaded from untrusted storage. Returns the offending node.
    pub(crate) fn validate(&self) -> Result<(), usize> {
        if self.nodes.is_empty() {
            return Err(0);
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if !(node.cover > 0.0) || !(0.0..=1.0).contains(&node.value) {
                return Err(index);
            }
            let Some(feature) = node.feature else {
                continue;
            };
            let children_ok = node.left > index
                && node.right > index
                && node.left < self.nodes.len()
                && node.right < self.nodes.len();
            if feature >= self.feature_count || !children_ok {
                return Err(index);
            }
        }
        Ok(())
    }

    /// Accumulates the weighted impurity decrease of every split into `out`.
    pub(crate) fn accumulate_importances(&self, out: &mut [f64]) {
        for node in &self.nodes {
            let Some(feature) = node.feature else {
                continue;
            };
            let left = &self.nodes[node.left];
            let right = &self.nodes[node.right];
            out[feature] += node.cover * node.impurity
                - left.cover * left.impurity
                - right.cover * right.impurity;
        }
    }
}

struct Builder<'a, R: Rng + ?Sized> {
    rows: &'a [Vec<f64>],
    labels: &'a [bool],
    params: TreeParams,
    rng: &'a mut R,
    nodes: Vec<Node>,
    features: Vec<usize>,
    order: Vec<usize>,
}

impl<R: Rng + ?Sized> Builder<'_, R> {
    fn grow(&mut self, samples: &mut [usize], depth: usize) -> usize {
        let index = self.nodes.len();
        let positives = samples.iter().filter(|&&row| self.labels[row]).count();
        let cover = samples.len() as f64;
        self.nodes
            .push(Node::leaf(cover, positives as f64 / cover));

        let pure = positives == 0 || positives == samples.len();
        if pure || depth >= self.params.max_depth || samples.len() < self.params.min_samples_split
        {
            return index;
        }

        let Some(split) = self.best_split(samples, positives) else {
            return index;
        };

        let rows = self.rows;
        let mid = partition(samples, |row| {
            rows[row][split.feature] <= split.threshold
        });
        if mid == 0 || mid == samples.len() {
            return index;
        }

        trace!(
            target: "phishnet_core::tree",
            "split node {} on feature {} at {:.4} ({} | {} rows, impurity {:.4})",
            index,
            split.feature,
            split.threshold,
            mid,
            samples.len() - mid,
            split.impurity
        );

        let (left_rows, right_rows) = samples.split_at_mut(mid);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        let node = &mut self.nodes[index];
        node.feature = Some(split.feature);
        node.threshold = split.threshold;
        node.left = left;
        node.right = right;
        index
    }

    /// Searches a random feature subset for the split with the lowest weighted
    /// Gini impurity. Constant features do not count against the budget.
    fn best_split(&mut self, samples: &[usize], positives: usize) -> Option<Split> {
        let rows = self.rows;
        let labels = self.labels;

        for i in (1..self.features.len()).rev() {
            let j = self.rng.gen_range(0..=i);
            self.features.swap(i, j);
        }

        let total = samples.len() as f64;
        let total_positive = positives as f64;
        let mut best: Option<Split> = None;
        let mut evaluated = 0;

        for &feature in &self.features {
            if evaluated >= self.params.features_per_split {
                break;
            }

            self.order.clear();
            self.order.extend_from_slice(samples);
            self.order
                .sort_unstable_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

            let first = rows[self.order[0]][feature];
            let last = rows[self.order[self.order.len() - 1]][feature];
            if first >= last {
                continue;
            }
            evaluated += 1;

            let mut left_count = 0.0;
            let mut left_positive = 0.0;
            for window in self.order.windows(2) {
                let (row, next_row) = (window[0], window[1]);
                left_count += 1.0;
                if labels[row] {
                    left_positive += 1.0;
                }

                let current = rows[row][feature];
                let next = rows[next_row][feature];
                if next <= current {
                    continue;
                }

                let right_count = total - left_count;
                let right_positive = total_positive - left_positive;
                let impurity = (left_count * gini(left_positive / left_count)
                    + right_count * gini(right_positive / right_count))
                    / total;

                if best.map_or(true, |candidate| impurity < candidate.impurity) {
                    let mut threshold = current / 2.0 + next / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some(Split {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

/// Moves every sample accepted by `goes_left` to the front and returns the
/// boundary index.
fn partition(samples: &mut [usize], mut goes_left: impl FnMut(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..samples.len() {
        if goes_left(samples[i]) {
            samples.swap(mid, i);
            mid += 1;
        }
    }
    mid
}

fn gini(positive_fraction: f64) -> f64 {
    2.0 * positive_fraction * (1.0 - positive_fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_split: 2,
            features_per_split: 2,
        }
    }

    fn threshold_data() -> (Vec<Vec<f64>>, Vec<bool>) {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 7.0]).collect();
        let labels = rows.iter().map(|row| row[0] >= 10.0).collect();
        (rows, labels)
    }

    #[test]
    fn separable_data_is_split_once() {
        let (rows, labels) = threshold_data();
        let mut samples: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let tree = DecisionTree::fit(&rows, &labels, &mut samples, params(10), &mut rng);

        assert_eq!(tree.depth(), 1);
        let root = tree.root();
        assert_eq!(root.feature, Some(0));
        assert_eq!(root.threshold, 9.5);
        assert_eq!(root.cover, 20.0);
        assert_eq!(tree.predict(&[3.0, 7.0]), 0.0);
        assert_eq!(tree.predict(&[12.0, 7.0]), 1.0);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn depth_cap_produces_mixed_leaves() {
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![(i % 4) as f64]).collect();
        let labels: Vec<bool> = (0..8).map(|i| i % 2 == 1).collect();
        let mut samples: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(&rows, &labels, &mut samples, params(0), &mut rng);

        assert!(tree.root().is_leaf());
        assert_eq!(tree.predict(&[0.0]), 0.5);
    }

    #[test]
    fn covers_of_children_add_up() {
        let (rows, labels) = threshold_data();
        let mut samples: Vec<usize> = vec![0, 0, 1, 5, 11, 11, 11, 19, 12, 3];
        let mut rng = StdRng::seed_from_u64(3);
        let tree = DecisionTree::fit(&rows, &labels, &mut samples, params(10), &mut rng);

        for node in tree.nodes().iter().filter(|node| !node.is_leaf()) {
            let nodes = tree.nodes();
            assert_eq!(node.cover, nodes[node.left].cover + nodes[node.right].cover);
        }
        assert_eq!(tree.root().cover, 10.0);
    }

    #[test]
    fn validate_rejects_backward_children() {
        let (rows, labels) = threshold_data();
        let mut samples: Vec<usize> = (0..rows.len()).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = DecisionTree::fit(&rows, &labels, &mut samples, params(10), &mut rng);
        tree.nodes[0].left = 0;
        assert_eq!(tree.validate(), Err(0));
    }

    #[test]
    fn partition_moves_accepted_rows_forward() {
        let mut samples = vec![4, 1, 3, 2, 5];
        let mid = partition(&mut samples, |row| row % 2 == 0);
        assert_eq!(mid, 2);
        assert!(samples[..mid].iter().all(|row| row % 2 == 0));
        assert!(samples[mid..].iter().all(|row| row % 2 == 1));
    }
}
