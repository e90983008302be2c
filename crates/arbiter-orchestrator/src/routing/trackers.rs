//! Rolling per-engine cost and quality trackers.
//!
//! Both trackers keep a bounded window of recent observations per engine
//! kind and answer with the rolling mean, falling back to configured
//! defaults until real observations arrive.

use arbiter_abstraction::EngineKind;
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

/// Observations retained per engine.
const WINDOW: usize = 100;

fn push_bounded(window: &mut VecDeque<f64>, value: f64) {
    window.push_back(value);
    while window.len() > WINDOW {
        window.pop_front();
    }
}

fn mean(window: &VecDeque<f64>) -> Option<f64> {
    if window.is_empty() {
        None
    } else {
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }
}

/// Tracks observed per-call cost (USD) per engine kind.
pub struct CostTracker {
    observations: RwLock<HashMap<EngineKind, VecDeque<f64>>>,
}

impl CostTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { observations: RwLock::new(HashMap::new()) }
    }

    /// Baseline per-call cost before any observations exist.
    #[must_use]
    pub fn base_cost(engine: EngineKind) -> f64 {
        match engine {
            EngineKind::LocalModel => 0.001,
            EngineKind::RemoteLlm => 0.03,
            // Ensemble pays for both calls.
            EngineKind::Ensemble => 0.031,
        }
    }

    /// Records the observed cost of one call.
    pub fn record(&self, engine: EngineKind, cost: f64) {
        let mut observations =
            self.observations.write().unwrap_or_else(PoisonError::into_inner);
        push_bounded(observations.entry(engine).or_default(), cost);
    }

    /// Rolling mean cost per call for an engine.
    #[must_use]
    pub fn mean_cost(&self, engine: EngineKind) -> f64 {
        let observations = self.observations.read().unwrap_or_else(PoisonError::into_inner);
        observations
            .get(&engine)
            .and_then(mean)
            .unwrap_or_else(|| Self::base_cost(engine))
    }

    /// Estimated cost of an unexecuted task: the rolling per-call mean
    /// scaled up by complexity and payload size.
    #[must_use]
    pub fn estimate(&self, engine: EngineKind, complexity: f64, data_volume: usize) -> f64 {
        self.mean_cost(engine)
            * (1.0 + 0.5 * complexity)
            * (1.0 + data_volume as f64 / 1000.0)
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks observed output quality in `[0, 1]` per engine kind.
pub struct QualityTracker {
    observations: RwLock<HashMap<EngineKind, VecDeque<f64>>>,
}

impl QualityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { observations: RwLock::new(HashMap::new()) }
    }

    /// Baseline quality before any observations exist.
    #[must_use]
    pub fn base_quality(engine: EngineKind) -> f64 {
        match engine {
            EngineKind::LocalModel => 0.75,
            EngineKind::RemoteLlm => 0.9,
            EngineKind::Ensemble => 0.92,
        }
    }

    /// Records an observed quality score for one call.
    pub fn record(&self, engine: EngineKind, quality: f64) {
        let mut observations =
            self.observations.write().unwrap_or_else(PoisonError::into_inner);
        push_bounded(observations.entry(engine).or_default(), quality.clamp(0.0, 1.0));
    }

    /// Rolling mean quality for an engine.
    #[must_use]
    pub fn mean_quality(&self, engine: EngineKind) -> f64 {
        let observations = self.observations.read().unwrap_or_else(PoisonError::into_inner);
        observations
            .get(&engine)
            .and_then(mean)
            .unwrap_or_else(|| Self::base_quality(engine))
    }
}

impl Default for QualityTracker {
    fn default() -> Self {
        Self::new()
    }
}
