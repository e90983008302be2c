//! Offline model evaluation: held-out metrics and k-fold stability.

use crate::error::{TrainingError, TrainingResult};
use arbiter_abstraction::{is_positive, Features, Predictor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comprehensive assessment of a candidate on held-out data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Held-out accuracy (tolerance match rate for continuous outputs).
    pub accuracy: f64,
    /// Positive-class precision (discrete outputs only).
    pub precision: Option<f64>,
    /// Positive-class recall (discrete outputs only).
    pub recall: Option<f64>,
    /// F1 score (discrete outputs only).
    pub f1: Option<f64>,
    /// Mean absolute error (continuous outputs only).
    pub mean_absolute_error: Option<f64>,
    /// Mean fold accuracy across the cross-validation split.
    pub cv_mean: Option<f64>,
    /// Standard deviation of fold accuracy; high values mean instability.
    pub cv_std: Option<f64>,
    /// Held-out rows evaluated.
    pub sample_count: usize,
}

/// Evaluates candidates on held-out features/labels.
pub struct EvaluationEngine {
    k_folds: usize,
    seed: u64,
}

impl EvaluationEngine {
    /// Creates an engine with the default 5-fold split.
    #[must_use]
    pub fn new() -> Self {
        Self { k_folds: 5, seed: 42 }
    }

    /// Overrides the number of cross-validation folds.
    #[must_use]
    pub fn with_k_folds(mut self, k_folds: usize) -> Self {
        self.k_folds = k_folds;
        self
    }

    /// Overrides the shuffle seed for reproducible splits.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Evaluates a candidate against held-out features and labels.
    ///
    /// # Errors
    /// Returns an error for empty or mismatched inputs, or when the
    /// candidate fails to predict.
    pub fn evaluate(
        &self,
        predictor: &dyn Predictor,
        features: &[Features],
        labels: &[Value],
    ) -> TrainingResult<EvaluationReport> {
        if features.is_empty() {
            return Err(TrainingError::InvalidInput("empty held-out set".to_string()));
        }
        if features.len() != labels.len() {
            return Err(TrainingError::InvalidInput(format!(
                "feature/label length mismatch: {} vs {}",
                features.len(),
                labels.len()
            )));
        }

        let mut predictions = Vec::with_capacity(features.len());
        for row in features {
            predictions.push(predictor.predict(row)?.value);
        }

        let pairs: Vec<(&Value, &Value)> = predictions.iter().zip(labels.iter()).collect();
        let continuous = is_continuous(&pairs);
        let accuracy = accuracy_of(&pairs, continuous);

        let (precision, recall, f1, mean_absolute_error) = if continuous {
            let mae = pairs
                .iter()
                .map(|(p, a)| (p.as_f64().unwrap_or(0.0) - a.as_f64().unwrap_or(0.0)).abs())
                .sum::<f64>()
                / pairs.len() as f64;
            (None, None, None, Some(mae))
        } else {
            let (p, r, f) = positive_class_metrics(&pairs);
            (p, r, f, None)
        };

        let (cv_mean, cv_std) = self.cross_validate(&pairs, continuous);

        Ok(EvaluationReport {
            accuracy,
            precision,
            recall,
            f1,
            mean_absolute_error,
            cv_mean,
            cv_std,
            sample_count: pairs.len(),
        })
    }

    /// Fold-wise accuracy over a shuffled split; the spread measures how
    /// stable the candidate's accuracy is across subsamples.
    fn cross_validate(
        &self,
        pairs: &[(&Value, &Value)],
        continuous: bool,
    ) -> (Option<f64>, Option<f64>) {
        if self.k_folds < 2 || pairs.len() < self.k_folds {
            return (None, None);
        }

        let mut indices: Vec<usize> = (0..pairs.len()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        indices.shuffle(&mut rng);

        let fold_size = pairs.len() / self.k_folds;
        let mut fold_accuracies = Vec::with_capacity(self.k_folds);
        for fold in 0..self.k_folds {
            let start = fold * fold_size;
            let end = if fold == self.k_folds - 1 { pairs.len() } else { start + fold_size };
            let fold_pairs: Vec<(&Value, &Value)> =
                indices[start..end].iter().map(|&i| pairs[i]).collect();
            fold_accuracies.push(accuracy_of(&fold_pairs, continuous));
        }

        let mean = fold_accuracies.iter().sum::<f64>() / fold_accuracies.len() as f64;
        let variance = fold_accuracies.iter().map(|a| (a - mean).powi(2)).sum::<f64>()
            / fold_accuracies.len() as f64;
        (Some(mean), Some(variance.sqrt()))
    }
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn is_integer_like(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().is_some_and(|v| v.fract() == 0.0),
        _ => true,
    }
}

fn is_continuous(pairs: &[(&Value, &Value)]) -> bool {
    let all_numeric = pairs.iter().all(|(p, a)| p.is_number() && a.is_number());
    all_numeric && pairs.iter().any(|(p, a)| !is_integer_like(p) || !is_integer_like(a))
}

fn matches_label(prediction: &Value, actual: &Value, continuous: bool) -> bool {
    if continuous {
        let (p, a) = (prediction.as_f64().unwrap_or(0.0), actual.as_f64().unwrap_or(0.0));
        if a == 0.0 {
            p == 0.0
        } else {
            ((p - a) / a).abs() <= 0.1
        }
    } else {
        prediction == actual
    }
}

fn accuracy_of(pairs: &[(&Value, &Value)], continuous: bool) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let matched = pairs.iter().filter(|(p, a)| matches_label(p, a, continuous)).count();
    matched as f64 / pairs.len() as f64
}

fn positive_class_metrics(
    pairs: &[(&Value, &Value)],
) -> (Option<f64>, Option<f64>, Option<f64>) {
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;
    for (prediction, actual) in pairs {
        match (is_positive(prediction), is_positive(actual)) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }
    let precision = (tp + fp > 0).then(|| tp as f64 / (tp + fp) as f64);
    let recall = (tp + fn_ > 0).then(|| tp as f64 / (tp + fn_) as f64);
    let f1 = match (precision, recall) {
        (Some(p), Some(r)) if p + r > 0.0 => Some(2.0 * p * r / (p + r)),
        _ => None,
    };
    (precision, recall, f1)
}
