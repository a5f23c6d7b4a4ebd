//! Pareto front over (incidence error, exposure error).

use crate::params::ParamId;

/// Parameter values closer than this are the same action.
const VALUE_TOLERANCE: f64 = 1e-10;

const DOMINATING_REWARD: f64 = 1.0;
const DOMINATED_REWARD: f64 = -1.0;
const REDISCOVERED_REWARD: f64 = 0.02;
const NEUTRAL_REWARD: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParetoOptimalSetup {
    pub param: ParamId,
    pub value: f64,
    pub incidence_error: f64,
    pub exposure_error: f64,
}

impl ParetoOptimalSetup {
    /// Whether `self` is no worse than `other` on both errors and better on one.
    pub fn dominates(&self, other: &Self) -> bool {
        let no_worse = self.incidence_error <= other.incidence_error
            && self.exposure_error <= other.exposure_error;
        let better = self.incidence_error < other.incidence_error
            || self.exposure_error < other.exposure_error;
        no_worse && better
    }

    /// Same action with both errors within `threshold`.
    pub fn is_almost_the_same_as(&self, other: &Self, threshold: f64) -> bool {
        self.param == other.param
            && (self.value - other.value).abs() < VALUE_TOLERANCE
            && (self.incidence_error - other.incidence_error).abs() < threshold
            && (self.exposure_error - other.exposure_error).abs() < threshold
    }
}

pub struct ParetoFront {
    setups: Vec<ParetoOptimalSetup>,
    similarity_threshold: f64,
}

impl ParetoFront {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            setups: Vec::new(),
            similarity_threshold,
        }
    }

    pub fn setups(&self) -> &[ParetoOptimalSetup] {
        &self.setups
    }

    /// Insert `candidate` if it is non-dominated and return its reward.
    ///
    /// Dominating existing members earns a positive reward and evicts them;
    /// being dominated earns a penalty, softened when the candidate merely
    /// repeats the dominating setup.
    pub fn evaluate(&mut self, candidate: ParetoOptimalSetup) -> f64 {
        let threshold = self.similarity_threshold;

        if let Some(dominating) = self.setups.iter().find(|s| s.dominates(&candidate)) {
            return if candidate.is_almost_the_same_as(dominating, threshold) {
                REDISCOVERED_REWARD
            } else {
                DOMINATED_REWARD
            };
        }

        let n_setups = self.setups.len();
        self.setups.retain(|s| !candidate.dominates(s));
        let n_evicted = n_setups - self.setups.len();

        let is_known = self
            .setups
            .iter()
            .any(|s| candidate.is_almost_the_same_as(s, threshold));
        if !is_known {
            self.setups.push(candidate);
        }

        if n_evicted > 0 {
            DOMINATING_REWARD
        } else {
            NEUTRAL_REWARD
        }
    }
}
