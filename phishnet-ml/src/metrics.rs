//! Held-out evaluation metrics reported to the training operator.

use std::fmt;

use serde::Serialize;

/// Precision, recall and F1 for one class.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

impl ClassMetrics {
    fn from_counts(true_positive: usize, false_positive: usize, false_negative: usize) -> Self {
        let precision = ratio(true_positive, true_positive + false_positive);
        let recall = ratio(true_positive, true_positive + false_negative);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
            support: true_positive + false_negative,
        }
    }
}

/// Confusion counts with phishing as the positive class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[bool], labels: &[bool]) -> Self {
        assert_eq!(
            predictions.len(),
            labels.len(),
            "predictions and labels must have same length"
        );
        let mut matrix = Self::default();
        for (&predicted, &actual) in predictions.iter().zip(labels) {
            match (predicted, actual) {
                (true, true) => matrix.true_positive += 1,
                (true, false) => matrix.false_positive += 1,
                (false, false) => matrix.true_negative += 1,
                (false, true) => matrix.false_negative += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }
}

/// Per-class and averaged metrics in the layout of a classification report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub legitimate: ClassMetrics,
    pub phishing: ClassMetrics,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
    pub confusion: ConfusionMatrix,
}

impl ClassificationReport {
    pub fn new(predictions: &[bool], labels: &[bool]) -> Self {
        let confusion = ConfusionMatrix::from_predictions(predictions, labels);
        let ConfusionMatrix {
            true_positive: tp,
            false_positive: fp,
            true_negative: tn,
            false_negative: fn_,
        } = confusion;

        let phishing = ClassMetrics::from_counts(tp, fp, fn_);
        let legitimate = ClassMetrics::from_counts(tn, fn_, fp);
        let total = confusion.total();

        Self {
            legitimate,
            phishing,
            accuracy: ratio(tp + tn, total),
            macro_avg: averaged([&legitimate, &phishing], [1.0, 1.0], total),
            weighted_avg: averaged(
                [&legitimate, &phishing],
                [legitimate.support as f64, phishing.support as f64],
                total,
            ),
            confusion,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for (name, metrics) in [("legitimate", &self.legitimate), ("phishing", &self.phishing)] {
            write_row(f, name, metrics)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.confusion.total()
        )?;
        write_row(f, "macro avg", &self.macro_avg)?;
        write_row(f, "weighted avg", &self.weighted_avg)
    }
}

fn averaged(classes: [&ClassMetrics; 2], weights: [f64; 2], support: usize) -> ClassMetrics {
    let norm: f64 = weights.iter().sum();
    let mut blended = ClassMetrics {
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
        support,
    };
    if norm > 0.0 {
        for (class, weight) in classes.into_iter().zip(weights) {
            blended.precision += weight * class.precision / norm;
            blended.recall += weight * class.recall / norm;
            blended.f1 += weight * class.f1 / norm;
        }
    }
    blended
}

fn write_row(f: &mut fmt::Formatter<'_>, name: &str, metrics: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
        name, metrics.precision, metrics.recall, metrics.f1, metrics.support
    )
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_matches_hand_computed_values() {
        // tp=3 fp=1 tn=4 fn=2
        let predictions = [true, true, true, true, false, false, false, false, false, false];
        let labels = [true, true, true, false, true, true, false, false, false, false];
        let report = ClassificationReport::new(&predictions, &labels);

        assert_eq!(
            report.confusion,
            ConfusionMatrix {
                true_positive: 3,
                false_positive: 1,
                true_negative: 4,
                false_negative: 2,
            }
        );
        assert!((report.phishing.precision - 0.75).abs() < 1e-12);
        assert!((report.phishing.recall - 0.6).abs() < 1e-12);
        assert_eq!(report.phishing.support, 5);
        assert!((report.legitimate.precision - 4.0 / 6.0).abs() < 1e-12);
        assert!((report.legitimate.recall - 0.8).abs() < 1e-12);
        assert!((report.accuracy - 0.7).abs() < 1e-12);
        assert!(
            (report.macro_avg.recall - 0.7).abs() < 1e-12,
            "macro recall {}",
            report.macro_avg.recall
        );
        assert_eq!(report.weighted_avg.support, 10);
    }

    #[test]
    fn absent_class_scores_zero_instead_of_nan() {
        let report = ClassificationReport::new(&[false, false], &[false, false]);
        assert_eq!(report.phishing.precision, 0.0);
        assert_eq!(report.phishing.f1, 0.0);
        assert_eq!(report.legitimate.recall, 1.0);
        assert!(!report.to_string().contains("NaN"));
    }

    #[test]
    fn display_lists_both_classes() {
        let report = ClassificationReport::new(&[true, false], &[true, true]);
        let text = report.to_string();
        assert!(text.contains("legitimate"));
        assert!(text.contains("phishing"));
        assert!(text.contains("weighted avg"));
    }
}
