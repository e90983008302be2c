//! Input drift scoring via two-sample Kolmogorov–Smirnov statistics.

use arbiter_abstraction::Features;
use std::collections::BTreeSet;

/// Two-sample Kolmogorov–Smirnov statistic in [0, 1].
///
/// 0 means the empirical distributions are identical; 1 means fully
/// separated supports. Returns 0 when either sample is empty.
#[must_use]
pub fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));
    b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal));

    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;

    // Walk both sorted samples, advancing past ties together so the CDF
    // difference is evaluated between distinct support points.
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    if i < a.len() || j < b.len() {
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

fn numeric_series(slice: &[&Features], key: &str) -> Vec<f64> {
    slice.iter().filter_map(|f| f.get(key).and_then(serde_json::Value::as_f64)).collect()
}

/// Mean per-feature KS statistic between a baseline and a recent slice.
///
/// Only numeric feature dimensions participate; a dimension missing from
/// either slice is skipped. Returns 0 when no dimension is comparable.
#[must_use]
pub fn drift_score(baseline: &[&Features], recent: &[&Features]) -> f64 {
    let mut keys = BTreeSet::new();
    for features in baseline {
        for (key, value) in features.iter() {
            if value.as_f64().is_some() {
                keys.insert(key.clone());
            }
        }
    }

    let mut total = 0.0;
    let mut counted = 0usize;
    for key in keys {
        let base = numeric_series(baseline, &key);
        let rec = numeric_series(recent, &key);
        if base.is_empty() || rec.is_empty() {
            continue;
        }
        total += ks_statistic(&base, &rec);
        counted += 1;
    }

    if counted == 0 {
        0.0
    } else {
        total / counted as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(x: f64) -> Features {
        let mut f = Features::new();
        f.insert("x".to_string(), json!(x));
        f
    }

    #[test]
    fn test_ks_identical_samples_is_zero() {
        let a = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(ks_statistic(&a, &a), 0.0);
    }

    #[test]
    fn test_ks_disjoint_supports_is_one() {
        let a = vec![0.0, 1.0, 2.0];
        let b = vec![10.0, 11.0, 12.0];
        assert!((ks_statistic(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_known_value() {
        // F_a jumps to 1.0 at 2, F_b is 0.5 there: D = 0.5.
        let a = vec![1.0, 2.0];
        let b = vec![1.0, 3.0];
        assert!((ks_statistic(&a, &b) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_drift_score_zero_for_identical_slices() {
        let rows: Vec<Features> = (0..50).map(|i| features(f64::from(i))).collect();
        let refs: Vec<&Features> = rows.iter().collect();
        assert_eq!(drift_score(&refs, &refs), 0.0);
    }

    #[test]
    fn test_drift_score_detects_shift() {
        let base: Vec<Features> = (0..50).map(|i| features(f64::from(i))).collect();
        let shifted: Vec<Features> = (0..50).map(|i| features(f64::from(i) + 100.0)).collect();
        let base_refs: Vec<&Features> = base.iter().collect();
        let shifted_refs: Vec<&Features> = shifted.iter().collect();
        let score = drift_score(&base_refs, &shifted_refs);
        assert!(score > 0.9, "expected near-total drift, got {score}");
    }

    #[test]
    fn test_drift_score_ignores_non_numeric_dimensions() {
        let mut a = features(1.0);
        a.insert("label".to_string(), json!("spam"));
        let mut b = features(1.0);
        b.insert("label".to_string(), json!("ham"));
        assert_eq!(drift_score(&[&a], &[&b]), 0.0);
    }
}
