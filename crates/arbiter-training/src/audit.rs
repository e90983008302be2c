//! Fairness and ethics audit engine.
//!
//! Produces the [`AuditReport`] that gates registry promotion: bias tests
//! per sensitive attribute, a privacy-risk heuristic, a denylist
//! compliance checklist, and an explainability score.

use crate::error::{TrainingError, TrainingResult};
use crate::job::HoldoutSet;
use arbiter_abstraction::{is_positive, Explainable, Predictor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Thresholds and policy for the fairness audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Maximum allowed pairwise rate difference for the parity-style
    /// tests. A difference equal to the threshold is non-violating.
    pub parity_threshold: f64,
    /// Minimum allowed low/high selection-rate ratio (four-fifths rule).
    pub disparate_impact_minimum: f64,
    /// Groups smaller than this are skipped, not failed.
    pub min_group_size: usize,
    /// Fairness score below this blocks compliance.
    pub fairness_minimum: f64,
    /// Explainability score below this blocks compliance.
    pub explainability_minimum: f64,
    /// Fairness-score penalty per bias violation.
    pub violation_penalty: f64,
    /// Attribute names requiring extra handling wherever they appear.
    pub denylist: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            parity_threshold: 0.10,
            disparate_impact_minimum: 0.8,
            min_group_size: 10,
            fairness_minimum: 0.8,
            explainability_minimum: 0.7,
            violation_penalty: 0.25,
            denylist: vec![
                "race".to_string(),
                "religion".to_string(),
                "disability".to_string(),
                "ethnicity".to_string(),
                "national_origin".to_string(),
            ],
        }
    }
}

/// Which bias test a result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasTest {
    /// Max pairwise difference in positive-prediction rate.
    DemographicParity,
    /// Max pairwise difference in true-positive rate.
    EqualOpportunity,
    /// Max pairwise difference in false-positive rate.
    PredictiveEquality,
    /// Ratio of lowest to highest group selection rate.
    DisparateImpact,
}

impl BiasTest {
    fn label(self) -> &'static str {
        match self {
            BiasTest::DemographicParity => "demographic parity",
            BiasTest::EqualOpportunity => "equal opportunity",
            BiasTest::PredictiveEquality => "predictive equality",
            BiasTest::DisparateImpact => "disparate impact",
        }
    }
}

/// Outcome of one bias test on one sensitive attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasTestResult {
    /// Which test ran.
    pub test: BiasTest,
    /// Sensitive attribute the test ran over.
    pub attribute: String,
    /// The computed statistic (difference or ratio).
    pub value: f64,
    /// The threshold it was compared against.
    pub threshold: f64,
    /// Whether the statistic violates the threshold.
    pub violation: bool,
    /// "PASS" or "FAIL", for the compliance trail.
    pub compliance_status: String,
}

impl BiasTestResult {
    fn new(test: BiasTest, attribute: &str, value: f64, threshold: f64, violation: bool) -> Self {
        Self {
            test,
            attribute: attribute.to_string(),
            value,
            threshold,
            violation,
            compliance_status: if violation { "FAIL".to_string() } else { "PASS".to_string() },
        }
    }
}

/// Heuristic membership-inference risk, classified by held-out size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyRisk {
    Low,
    Medium,
    High,
}

/// Result of the fairness/ethics evaluation for one candidate version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    /// Bias test results per sensitive attribute.
    pub bias_tests: Vec<BiasTestResult>,
    /// Checks that could not run (small groups), with the reason.
    pub skipped_checks: Vec<String>,
    /// 1.0 minus a penalty per violation, floored at 0.
    pub fairness_score: f64,
    /// Membership-inference risk class.
    pub privacy_risk: PrivacyRisk,
    /// Sensitive attributes matching the denylist.
    pub flagged_attributes: Vec<String>,
    /// Flagged attributes whose checks could not all run.
    pub mishandled_attributes: Vec<String>,
    /// Explainability score in [0, 1].
    pub explainability_score: f64,
    /// Whether the candidate may be promoted.
    pub overall_compliant: bool,
    /// Remediation suggestions per failed check category.
    pub recommendations: Vec<String>,
}

impl AuditReport {
    /// The scalar score handed to the registry acceptance gate.
    #[must_use]
    pub fn audit_score(&self) -> f64 {
        self.fairness_score
    }
}

/// Runs the fairness audit over a candidate and its held-out data.
pub struct FairnessAuditor {
    config: AuditConfig,
}

impl FairnessAuditor {
    /// Creates an auditor with the default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(AuditConfig::default())
    }

    /// Creates an auditor with custom thresholds.
    #[must_use]
    pub fn with_config(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Audits a candidate.
    ///
    /// # Errors
    /// Returns `TrainingError::Audit` for malformed inputs and propagates
    /// prediction failures; an error here rejects promotion but never
    /// touches the currently active version.
    pub fn audit(
        &self,
        predictor: &dyn Predictor,
        explainer: Option<&dyn Explainable>,
        holdout: &HoldoutSet,
    ) -> TrainingResult<AuditReport> {
        if holdout.features.is_empty() {
            return Err(TrainingError::Audit("empty held-out set".to_string()));
        }
        if holdout.features.len() != holdout.labels.len() {
            return Err(TrainingError::Audit(format!(
                "feature/label length mismatch: {} vs {}",
                holdout.features.len(),
                holdout.labels.len()
            )));
        }
        for (attribute, groups) in &holdout.sensitive_attributes {
            if groups.len() != holdout.features.len() {
                return Err(TrainingError::Audit(format!(
                    "sensitive attribute '{attribute}' has {} entries for {} rows",
                    groups.len(),
                    holdout.features.len()
                )));
            }
        }

        let mut predicted = Vec::with_capacity(holdout.features.len());
        for row in &holdout.features {
            predicted.push(is_positive(&predictor.predict(row)?.value));
        }
        let actual: Vec<bool> = holdout.labels.iter().map(is_positive).collect();

        let mut bias_tests = Vec::new();
        let mut skipped_checks = Vec::new();
        let mut mishandled_attributes = Vec::new();

        let flagged_attributes: Vec<String> = holdout
            .sensitive_attributes
            .keys()
            .filter(|name| self.is_denylisted(name))
            .cloned()
            .collect();

        for (attribute, groups) in &holdout.sensitive_attributes {
            let before = bias_tests.len();
            self.run_bias_tests(
                attribute,
                groups,
                &predicted,
                &actual,
                &mut bias_tests,
                &mut skipped_checks,
            );
            if bias_tests.len() == before && self.is_denylisted(attribute) {
                // A denylisted attribute we could not audit at all.
                mishandled_attributes.push(attribute.clone());
            }
        }

        let violations = bias_tests.iter().filter(|t| t.violation).count();
        let fairness_score =
            (1.0 - self.config.violation_penalty * violations as f64).max(0.0);

        let privacy_risk = privacy_risk_for(holdout.features.len());
        let explainability_score = explainability_score_for(explainer);

        let overall_compliant = violations == 0
            && fairness_score >= self.config.fairness_minimum
            && explainability_score >= self.config.explainability_minimum
            && privacy_risk == PrivacyRisk::Low
            && mishandled_attributes.is_empty();

        let recommendations = self.recommendations(
            &bias_tests,
            fairness_score,
            privacy_risk,
            explainability_score,
            &flagged_attributes,
        );

        debug!(
            violations,
            fairness_score,
            explainability_score,
            privacy_risk = ?privacy_risk,
            compliant = overall_compliant,
            "Fairness audit completed"
        );

        Ok(AuditReport {
            bias_tests,
            skipped_checks,
            fairness_score,
            privacy_risk,
            flagged_attributes,
            mishandled_attributes,
            explainability_score,
            overall_compliant,
            recommendations,
        })
    }

    fn is_denylisted(&self, attribute: &str) -> bool {
        let lower = attribute.to_lowercase();
        self.config.denylist.iter().any(|entry| lower.contains(entry))
    }

    fn run_bias_tests(
        &self,
        attribute: &str,
        groups: &[String],
        predicted: &[bool],
        actual: &[bool],
        results: &mut Vec<BiasTestResult>,
        skipped: &mut Vec<String>,
    ) {
        // Indices per group, only groups large enough to test.
        let mut by_group: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, group) in groups.iter().enumerate() {
            by_group.entry(group.as_str()).or_default().push(i);
        }
        let eligible: BTreeMap<&str, &Vec<usize>> = by_group
            .iter()
            .filter(|(_, idx)| idx.len() >= self.config.min_group_size)
            .map(|(g, idx)| (*g, idx))
            .collect();

        if eligible.len() < 2 {
            skipped.push(format!(
                "attribute '{attribute}': fewer than 2 groups with >= {} samples, bias tests skipped",
                self.config.min_group_size
            ));
            return;
        }

        // Demographic parity + disparate impact over selection rates.
        let selection_rates: Vec<f64> = eligible
            .values()
            .map(|idx| idx.iter().filter(|&&i| predicted[i]).count() as f64 / idx.len() as f64)
            .collect();
        let (min_rate, max_rate) = min_max(&selection_rates);

        let parity_diff = max_rate - min_rate;
        results.push(BiasTestResult::new(
            BiasTest::DemographicParity,
            attribute,
            parity_diff,
            self.config.parity_threshold,
            parity_diff > self.config.parity_threshold,
        ));

        let impact_ratio = if max_rate == 0.0 { 1.0 } else { min_rate / max_rate };
        results.push(BiasTestResult::new(
            BiasTest::DisparateImpact,
            attribute,
            impact_ratio,
            self.config.disparate_impact_minimum,
            impact_ratio < self.config.disparate_impact_minimum,
        ));

        // Equal opportunity over true-positive rates. Groups with no
        // actual positives cannot have a TPR and are left out.
        let tprs: Vec<f64> = eligible
            .values()
            .filter_map(|idx| {
                let positives: Vec<usize> =
                    idx.iter().copied().filter(|&i| actual[i]).collect();
                if positives.is_empty() {
                    return None;
                }
                let tp = positives.iter().filter(|&&i| predicted[i]).count();
                Some(tp as f64 / positives.len() as f64)
            })
            .collect();
        if tprs.len() >= 2 {
            let (min_tpr, max_tpr) = min_max(&tprs);
            let diff = max_tpr - min_tpr;
            results.push(BiasTestResult::new(
                BiasTest::EqualOpportunity,
                attribute,
                diff,
                self.config.parity_threshold,
                diff > self.config.parity_threshold,
            ));
        } else {
            skipped.push(format!(
                "attribute '{attribute}': fewer than 2 groups with actual positives, equal opportunity skipped"
            ));
        }

        // Predictive equality over false-positive rates.
        let fprs: Vec<f64> = eligible
            .values()
            .filter_map(|idx| {
                let negatives: Vec<usize> =
                    idx.iter().copied().filter(|&i| !actual[i]).collect();
                if negatives.is_empty() {
                    return None;
                }
                let fp = negatives.iter().filter(|&&i| predicted[i]).count();
                Some(fp as f64 / negatives.len() as f64)
            })
            .collect();
        if fprs.len() >= 2 {
            let (min_fpr, max_fpr) = min_max(&fprs);
            let diff = max_fpr - min_fpr;
            results.push(BiasTestResult::new(
                BiasTest::PredictiveEquality,
                attribute,
                diff,
                self.config.parity_threshold,
                diff > self.config.parity_threshold,
            ));
        } else {
            skipped.push(format!(
                "attribute '{attribute}': fewer than 2 groups with actual negatives, predictive equality skipped"
            ));
        }
    }

    fn recommendations(
        &self,
        bias_tests: &[BiasTestResult],
        fairness_score: f64,
        privacy_risk: PrivacyRisk,
        explainability_score: f64,
        flagged_attributes: &[String],
    ) -> Vec<String> {
        let mut out = Vec::new();
        for test in bias_tests.iter().filter(|t| t.violation) {
            out.push(format!(
                "Apply bias mitigation (reweighing or per-group threshold adjustment) for attribute '{}' to address the {} violation",
                test.attribute,
                test.test.label(),
            ));
        }
        if fairness_score < self.config.fairness_minimum {
            out.push(
                "Adopt fairness-aware training (constraint-based or adversarial debiasing) before resubmitting"
                    .to_string(),
            );
        }
        if privacy_risk != PrivacyRisk::Low {
            out.push(
                "Harden privacy: enlarge the held-out set and consider differentially private training"
                    .to_string(),
            );
        }
        if explainability_score < self.config.explainability_minimum {
            out.push(
                "Add explainability tooling: global feature importances and a local explanation mechanism"
                    .to_string(),
            );
        }
        for attribute in flagged_attributes {
            out.push(format!(
                "Attribute '{attribute}' is denylisted and requires documented extra handling"
            ));
        }
        out
    }
}

impl Default for FairnessAuditor {
    fn default() -> Self {
        Self::new()
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
    })
}

fn privacy_risk_for(sample_count: usize) -> PrivacyRisk {
    if sample_count < 100 {
        PrivacyRisk::High
    } else if sample_count < 1000 {
        PrivacyRisk::Medium
    } else {
        PrivacyRisk::Low
    }
}

fn explainability_score_for(explainer: Option<&dyn Explainable>) -> f64 {
    let mut score: f64 = 0.3;
    if let Some(explainer) = explainer {
        if explainer.feature_importances().is_some() {
            score += 0.5;
        }
        if explainer.supports_local_explanations() {
            score += 0.2;
        }
    }
    score.min(1.0)
}
