use crate::config::CalibrationConfig;
use crate::engine::{Counters, RunHook};
use crate::params::{ParamId, TunableValues};
use crate::stats::deviation_from_goal;
use crate::tuner::QLearningTuner;
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use std::collections::BTreeMap;

/// Outcome of one finished simulation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunMetrics {
    pub new_infections: usize,
    pub new_exposures: usize,
    pub incidence_rate: f64,
    pub exposure_rate: f64,
}

impl RunMetrics {
    pub fn new(counters: Counters, initial_population: usize) -> Self {
        let n_pop = initial_population as f64;
        Self {
            new_infections: counters.new_infections,
            new_exposures: counters.new_exposures,
            incidence_rate: counters.new_infections as f64 / n_pop,
            exposure_rate: counters.new_exposures as f64 / n_pop,
        }
    }
}

/// Deviations of one calibration step from the goal rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepErrors {
    pub incidence: f64,
    /// Only tracked when an exposure rate goal is configured.
    pub exposure: Option<f64>,
}

/// Summary of one completed calibration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    pub errors: StepErrors,
    pub reward: f64,
    /// Parameter and value the errors were observed with.
    pub param: ParamId,
    pub value: f64,
    pub q: f64,
    pub epsilon: f64,
    pub best_error: f64,
    /// Parameter and value applied for the next step.
    pub next_param: ParamId,
    pub next_value: f64,
}

/// Calibration loop.
///
/// Collects the metrics of `simulations_per_step` runs, turns them into a
/// step error, lets the tuner learn from it and applies the value the tuner
/// selects next. The update happens within the call that completes a step, so
/// between calls the loop is always collecting.
pub struct Calibrator {
    cfg: CalibrationConfig,
    tuner: QLearningTuner,
    vals: TunableValues,
    metrics: Vec<RunMetrics>,
    history: Vec<StepRecord>,
}

impl Calibrator {
    /// Activate the tuner on the configured parameters.
    ///
    /// # Errors
    /// Returns an error if a tuned parameter has no valid calibration setup.
    pub fn initialize(cfg: CalibrationConfig, vals: TunableValues, rng: ChaCha12Rng) -> Result<Self> {
        let tuner = QLearningTuner::activate(&cfg, &cfg.tuned_ids(), &cfg.setup(), rng)
            .context("failed to activate tuner")?;
        log::info!("tuning {} first", tuner.current_param());

        Ok(Self {
            metrics: Vec::with_capacity(cfg.simulations_per_step),
            cfg,
            tuner,
            vals,
            history: Vec::new(),
        })
    }

    /// Record a finished run and update the tuner once the step is complete.
    pub fn on_simulation_run_boundary(&mut self, metrics: RunMetrics) -> Option<StepRecord> {
        self.metrics.push(metrics);
        if self.metrics.len() < self.cfg.simulations_per_step {
            return None;
        }

        let record = self.update();
        self.metrics.clear();

        Some(record)
    }

    fn update(&mut self) -> StepRecord {
        let errors = self.step_errors();
        let update = self.tuner.update_learning(errors, &self.vals);

        let (next_param, next_value) = self.tuner.select_action();
        self.vals.set(next_param, next_value);

        let record = StepRecord {
            step: self.history.len() + 1,
            errors,
            reward: update.reward,
            param: update.param,
            value: update.value,
            q: update.q,
            epsilon: self.tuner.epsilon(),
            best_error: self.tuner.best_error(),
            next_param,
            next_value,
        };
        self.history.push(record);

        log::info!(
            "step {}: incidence error {:.5}, exposure error {}, reward {:.5}",
            record.step,
            errors.incidence,
            errors
                .exposure
                .map_or_else(|| "-".to_string(), |err| format!("{err:.5}")),
            record.reward
        );
        log::info!(
            "step {}: {} = {} has Q {:.5}; next {} = {}; epsilon {:.3}, best error {:.5}",
            record.step,
            record.param,
            record.value,
            record.q,
            next_param,
            next_value,
            record.epsilon,
            record.best_error
        );

        record
    }

    fn step_errors(&self) -> StepErrors {
        let cfg = &self.cfg;
        let incidence = deviation_from_goal(
            self.metrics.iter().map(|m| m.incidence_rate),
            cfg.incidence_rate_goal,
            cfg.aggregate,
        );
        let exposure = cfg.exposure_rate_goal.map(|goal| {
            deviation_from_goal(
                self.metrics.iter().map(|m| m.exposure_rate),
                goal,
                cfg.aggregate,
            )
        });
        StepErrors {
            incidence,
            exposure,
        }
    }

    pub fn current_parameter_values(&self) -> BTreeMap<ParamId, f64> {
        self.vals.to_map()
    }

    /// Runs collected towards the current step.
    pub fn runs_so_far(&self) -> usize {
        self.metrics.len()
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub fn best_error(&self) -> f64 {
        self.tuner.best_error()
    }

    pub fn tuner(&self) -> &QLearningTuner {
        &self.tuner
    }
}

impl RunHook for Calibrator {
    fn refresh_parameters(&mut self, vals: &mut TunableValues) {
        *vals = self.vals;
    }

    fn on_run_boundary(&mut self, metrics: RunMetrics) -> Result<()> {
        if self.on_simulation_run_boundary(metrics).is_none() {
            log::debug!(
                "collected {} of {} runs",
                self.runs_so_far(),
                self.cfg.simulations_per_step
            );
        }
        Ok(())
    }
}
