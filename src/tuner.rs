//! Q-learning tuner.
//!
//! The tuner works on one parameter at a time. Each parameter's range is
//! discretized into actions whose Q-estimates are updated from the reward of
//! the calibration error observed after applying them. After a fixed number of
//! updates the tuner rotates to another parameter; the best error so far is
//! shared across parameters and serves as the reward baseline.

use crate::calibration::StepErrors;
use crate::config::{CalibrationConfig, Objective};
use crate::pareto::{ParetoFront, ParetoOptimalSetup};
use crate::params::{CalibrationSetup, ParamId, TunableValues};
use crate::random;
use anyhow::{Result, bail};
use rand_chacha::ChaCha12Rng;

/// Values closer than this are the same action.
const VALUE_TOLERANCE: f64 = 1e-10;

const INITIAL_Q_ESTIMATE: f64 = 0.0;

/// Candidate value of a parameter with its Q-estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionValue {
    value: f64,
    q: f64,
}

impl ActionValue {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn q(&self) -> f64 {
        self.q
    }
}

/// Actions of one tuned parameter.
#[derive(Debug, Clone)]
struct ParamActions {
    id: ParamId,
    actions: Vec<ActionValue>,
}

/// Temporal-difference update of a single Q-estimate.
pub fn q_update(old_q: f64, reward: f64, max_q: f64, learning_rate: f64, discount_factor: f64) -> f64 {
    old_q + learning_rate * (reward + discount_factor * max_q - old_q)
}

/// Reward of the single-objective scheme.
///
/// Zero without a baseline or when the error moved less than the just
/// noticeable difference, otherwise the signed improvement.
pub fn improvement_reward(best_error: f64, error: f64, jnd: f64) -> f64 {
    if !best_error.is_finite() || (error - best_error).abs() < jnd {
        0.0
    } else {
        best_error - error
    }
}

/// Outcome of one learning update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Update {
    pub param: ParamId,
    pub value: f64,
    pub reward: f64,
    pub q: f64,
}

pub struct QLearningTuner {
    epsilon: f64,
    epsilon_decrement: f64,
    learning_rate: f64,
    discount_factor: f64,
    jnd: f64,
    objective: Objective,
    updates_before_swap: usize,

    q_table: Vec<ParamActions>,
    i_current: usize,
    n_updates: usize,

    best_error: f64,
    front: ParetoFront,

    rng: ChaCha12Rng,
}

impl QLearningTuner {
    /// Build the Q-table of every tuned parameter and pick the first one to tune.
    ///
    /// # Errors
    /// Returns an error if no parameter is tuned or a tuned parameter is
    /// missing from `setup` or has malformed bounds.
    pub fn activate(
        cfg: &CalibrationConfig,
        tuned: &[ParamId],
        setup: &CalibrationSetup,
        mut rng: ChaCha12Rng,
    ) -> Result<Self> {
        if tuned.is_empty() {
            bail!("no parameter to tune");
        }

        let mut q_table = Vec::with_capacity(tuned.len());
        for &id in tuned {
            let Some(par) = setup.get(&id) else {
                bail!("parameter {id} is missing from the calibration setup");
            };
            par.validate()?;
            if q_table.iter().any(|p: &ParamActions| p.id == id) {
                bail!("parameter {id} is tuned twice");
            }
            let actions = par
                .actions()
                .into_iter()
                .map(|value| ActionValue {
                    value,
                    q: INITIAL_Q_ESTIMATE,
                })
                .collect();
            q_table.push(ParamActions { id, actions });
        }
        let i_current = random::index(&mut rng, q_table.len());

        Ok(Self {
            epsilon: cfg.epsilon,
            epsilon_decrement: cfg.epsilon / cfg.max_steps as f64,
            learning_rate: cfg.learning_rate,
            discount_factor: cfg.discount_factor,
            jnd: cfg.just_noticeable_difference,
            objective: cfg.objective,
            updates_before_swap: cfg.updates_before_swap,
            q_table,
            i_current,
            n_updates: 0,
            best_error: f64::INFINITY,
            front: ParetoFront::new(cfg.similarity_threshold),
            rng,
        })
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn best_error(&self) -> f64 {
        self.best_error
    }

    pub fn current_param(&self) -> ParamId {
        self.q_table[self.i_current].id
    }

    pub fn actions(&self, id: ParamId) -> &[ActionValue] {
        self.q_table
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn pareto_front(&self) -> &ParetoFront {
        &self.front
    }

    /// Pick a value of the current parameter (epsilon-greedy).
    pub fn select_action(&mut self) -> (ParamId, f64) {
        let ParamActions { id, actions } = &self.q_table[self.i_current];

        let r = random::uniform(&mut self.rng, 0.0, 1.0);
        let action = if r < 1.0 - self.epsilon {
            // Exploit: uniformly among the ties for the best estimate.
            let max_q = max_q(actions);
            let ties: Vec<_> = actions.iter().filter(|a| a.q == max_q).collect();
            ties[random::index(&mut self.rng, ties.len())]
        } else {
            &actions[random::index(&mut self.rng, actions.len())]
        };

        (*id, action.value)
    }

    /// Learn from the errors observed with the values in `vals`.
    pub fn update_learning(&mut self, errors: StepErrors, vals: &TunableValues) -> Update {
        let param = self.current_param();
        let value = vals.get(param);

        let reward = self.compute_reward(errors, param, value);

        let actions = &mut self.q_table[self.i_current].actions;
        let i_action = find_action(actions, value);
        let max_q = max_q(actions);
        let action = &mut actions[i_action];
        action.q = q_update(action.q, reward, max_q, self.learning_rate, self.discount_factor);
        let q = action.q;

        self.n_updates += 1;
        self.epsilon = (self.epsilon - self.epsilon_decrement).max(0.0);

        if errors.incidence < self.best_error {
            self.best_error = errors.incidence;
        }

        if self.n_updates >= self.updates_before_swap {
            self.swap_param();
        }

        Update {
            param,
            value,
            reward,
            q,
        }
    }

    fn compute_reward(&mut self, errors: StepErrors, param: ParamId, value: f64) -> f64 {
        match (self.objective, errors.exposure) {
            (Objective::Pareto, Some(exposure_error)) => self.front.evaluate(ParetoOptimalSetup {
                param,
                value,
                incidence_error: errors.incidence,
                exposure_error,
            }),
            _ => improvement_reward(self.best_error, errors.incidence, self.jnd),
        }
    }

    fn swap_param(&mut self) {
        self.n_updates = 0;
        let n_params = self.q_table.len();
        if n_params < 2 {
            return;
        }
        // Draw among the other parameters.
        let offset = 1 + random::index(&mut self.rng, n_params - 1);
        self.i_current = (self.i_current + offset) % n_params;
        log::info!("now tuning {}", self.current_param());
    }
}

fn max_q(actions: &[ActionValue]) -> f64 {
    actions
        .iter()
        .map(|a| a.q)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Index of the action matching `value`, or of the nearest one when float
/// drift (or an off-grid initial value) leaves no exact match.
fn find_action(actions: &[ActionValue], value: f64) -> usize {
    if let Some(idx) = actions
        .iter()
        .position(|a| (a.value - value).abs() < VALUE_TOLERANCE)
    {
        return idx;
    }
    actions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (a.value - value).abs().total_cmp(&(b.value - value).abs()))
        .map_or(0, |(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use rand::SeedableRng;

    fn tuner(epsilon: f64, tuned: &[ParamId], seed: u64) -> QLearningTuner {
        let mut cfg = config::tests::sample().calibration;
        cfg.epsilon = epsilon;
        QLearningTuner::activate(&cfg, tuned, &cfg.setup(), ChaCha12Rng::seed_from_u64(seed))
            .unwrap()
    }

    fn single(incidence: f64) -> StepErrors {
        StepErrors {
            incidence,
            exposure: None,
        }
    }

    #[test]
    fn q_update_follows_td_rule() {
        assert!((q_update(0.0, 1.0, 0.0, 0.1, 0.8) - 0.1).abs() < 1e-12);
        assert!((q_update(0.5, -0.2, 1.0, 0.5, 0.9) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn reward_is_signed_improvement_beyond_jnd() {
        assert_eq!(improvement_reward(f64::INFINITY, 0.3, 0.01), 0.0);
        assert_eq!(improvement_reward(0.3, 0.295, 0.01), 0.0);

        let gain = improvement_reward(0.3, 0.1, 0.01);
        assert!(gain > 0.0);
        assert!((gain - 0.2).abs() < 1e-12);

        let loss = improvement_reward(0.1, 0.25, 0.01);
        assert!((loss + 0.15).abs() < 1e-12);
    }

    #[test]
    fn activation_builds_discretized_actions() {
        let tuner = tuner(0.3, &[ParamId::InfectionProbability, ParamId::TreatmentDropoutRate], 1);
        // tolerance 0.1 over [0, 1] -> step 0.2
        assert_eq!(tuner.actions(ParamId::InfectionProbability).len(), 6);
        // tolerance 0.25 over [0, 0.5] -> step 0.25
        let values: Vec<_> = tuner
            .actions(ParamId::TreatmentDropoutRate)
            .iter()
            .map(ActionValue::value)
            .collect();
        assert_eq!(values, [0.0, 0.25, 0.5]);
        assert!(
            tuner
                .actions(ParamId::InfectionProbability)
                .iter()
                .all(|a| a.q == 0.0)
        );
    }

    #[test]
    fn activation_rejects_missing_setup() {
        let cfg = config::tests::sample().calibration;
        let res = QLearningTuner::activate(
            &cfg,
            &[ParamId::MeanDiagnosisDelay],
            &cfg.setup(),
            ChaCha12Rng::seed_from_u64(2),
        );
        assert!(res.is_err());
    }

    #[test]
    fn greedy_selection_breaks_ties_uniformly() {
        let mut tuner = tuner(0.0, &[ParamId::InfectionProbability], 3);
        let actions = &mut tuner.q_table[0].actions;
        actions[1].q = 0.5;
        actions[4].q = 0.5;
        actions[2].q = 0.2;

        let n_draws = 4000;
        let mut n_low = 0;
        for _ in 0..n_draws {
            let (param, value) = tuner.select_action();
            assert_eq!(param, ParamId::InfectionProbability);
            if (value - 0.2).abs() < 1e-9 {
                n_low += 1;
            } else {
                assert!((value - 0.8).abs() < 1e-9, "picked non-greedy value {value}");
            }
        }
        let share = n_low as f64 / n_draws as f64;
        assert!((share - 0.5).abs() < 0.05, "tie share was {share}");
    }

    #[test]
    fn exploration_reaches_every_action() {
        let mut tuner = tuner(1.0, &[ParamId::InfectionProbability], 4);
        let mut seen = [false; 6];
        for _ in 0..600 {
            let (_, value) = tuner.select_action();
            seen[(value / 0.2).round() as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn update_rewards_the_applied_action() {
        let mut tuner = tuner(0.3, &[ParamId::InfectionProbability], 5);
        let mut vals = config::tests::sample().model.initial;
        vals.infection_probability = 0.4;

        let first = tuner.update_learning(single(0.3), &vals);
        assert_eq!(first.reward, 0.0);
        assert_eq!(tuner.best_error(), 0.3);

        let second = tuner.update_learning(single(0.1), &vals);
        assert!((second.reward - 0.2).abs() < 1e-12);
        // Q was 0 and max Q was 0: 0 + 0.1 * (0.2 + 0.8 * 0 - 0)
        assert!((second.q - 0.02).abs() < 1e-12);
        let action = tuner.actions(ParamId::InfectionProbability)[2];
        assert!((action.value() - 0.4).abs() < 1e-12);
        assert!((action.q - 0.02).abs() < 1e-12);
        assert_eq!(tuner.best_error(), 0.1);

        // Regression keeps the best error.
        let third = tuner.update_learning(single(0.2), &vals);
        assert!(third.reward < 0.0);
        assert_eq!(tuner.best_error(), 0.1);
    }

    #[test]
    fn off_grid_value_updates_nearest_action() {
        let mut tuner = tuner(0.3, &[ParamId::InfectionProbability], 6);
        tuner.best_error = 0.5;
        let mut vals = config::tests::sample().model.initial;
        vals.infection_probability = 0.41;

        let update = tuner.update_learning(single(0.2), &vals);
        assert!(update.q > 0.0);
        assert!(tuner.actions(ParamId::InfectionProbability)[2].q > 0.0);
    }

    #[test]
    fn epsilon_decays_linearly_to_zero() {
        let mut tuner = tuner(0.3, &[ParamId::InfectionProbability], 7);
        let vals = config::tests::sample().model.initial;
        // max_steps = 3 in the sample config
        tuner.update_learning(single(0.1), &vals);
        assert!((tuner.epsilon() - 0.2).abs() < 1e-12);
        tuner.update_learning(single(0.1), &vals);
        tuner.update_learning(single(0.1), &vals);
        assert!(tuner.epsilon().abs() < 1e-12);
        tuner.update_learning(single(0.1), &vals);
        assert_eq!(tuner.epsilon(), 0.0);
    }

    #[test]
    fn rotates_to_another_parameter() {
        let ids = [ParamId::InfectionProbability, ParamId::TreatmentDropoutRate];
        let mut tuner = tuner(0.3, &ids, 8);
        let vals = config::tests::sample().model.initial;

        // updates_before_swap = 3 in the sample config
        let first = tuner.current_param();
        for _ in 0..3 {
            assert_eq!(tuner.current_param(), first);
            tuner.update_learning(single(0.1), &vals);
        }
        assert_ne!(tuner.current_param(), first);
    }

    #[test]
    fn pareto_objective_uses_front_reward() {
        let mut cfg = config::tests::sample().calibration;
        cfg.objective = Objective::Pareto;
        let mut tuner = QLearningTuner::activate(
            &cfg,
            &[ParamId::InfectionProbability],
            &cfg.setup(),
            ChaCha12Rng::seed_from_u64(9),
        )
        .unwrap();
        let mut vals = config::tests::sample().model.initial;
        vals.infection_probability = 0.2;

        let errors = |incidence, exposure| StepErrors {
            incidence,
            exposure: Some(exposure),
        };
        assert_eq!(tuner.update_learning(errors(0.2, 0.2), &vals).reward, 0.0);
        assert_eq!(tuner.update_learning(errors(0.1, 0.1), &vals).reward, 1.0);
        vals.infection_probability = 0.6;
        assert_eq!(tuner.update_learning(errors(0.3, 0.3), &vals).reward, -1.0);
        assert_eq!(tuner.pareto_front().setups().len(), 1);
    }
}
