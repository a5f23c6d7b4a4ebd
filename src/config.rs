use crate::params::{CalibrationParameter, CalibrationSetup, ParamId, TunableValues};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub city: CityConfig,
    pub population: PopulationConfig,
    pub model: ModelConfig,
    pub calibration: CalibrationConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Length of one simulation run (unit: ticks).
    #[serde(default = "default_ticks_per_run")]
    pub ticks_per_run: u64,
    /// Idle ticks between consecutive runs (at least one).
    #[serde(default = "default_ticks_between_runs")]
    pub ticks_between_runs: u64,
    /// Seed of the random number generator (drawn from the OS if absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks_per_run: default_ticks_per_run(),
            ticks_between_runs: default_ticks_between_runs(),
            seed: None,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CityConfig {
    /// Number of grid cells along x.
    pub length: usize,
    /// Number of grid cells along y.
    pub width: usize,
}

impl Default for CityConfig {
    fn default() -> Self {
        Self {
            length: 500,
            width: 500,
        }
    }
}

/// Household and workplace of one citizen.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub household: [f64; 2],
    pub workplace: [f64; 2],
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of initially susceptible agents.
    pub susceptible_count: usize,
    /// Number of initially exposed agents.
    pub exposed_count: usize,

    /// Share of immunosuppressed agents.
    pub immunosuppressed_share: f64,
    /// Share of smokers.
    pub smokers_share: f64,
    /// Share of alcohol drinkers.
    pub alcohol_drinkers_share: f64,

    /// Reference locations to draw from (random ones are generated if empty).
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl PopulationConfig {
    pub fn n_agents(&self) -> usize {
        self.susceptible_count + self.exposed_count
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Volume of a typical room (unit: cubic meters).
    pub average_room_volume: f64,
    /// Breathing rate of a susceptible person (unit: cubic meters per hour).
    #[serde(default = "default_pulmonary_ventilation_rate")]
    pub mean_pulmonary_ventilation_rate: f64,
    /// Infectious dose emitted by an infected person (unit: quanta per hour).
    #[serde(default = "default_quanta_production")]
    pub mean_quanta_production: f64,

    /// Initial values of the tunable parameters.
    pub initial: TunableValues,
}

/// How run-level deviations are folded into one step error.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Mean,
    Median,
}

/// Reward scheme of the tuner.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Improvement of the incidence error over the best error so far.
    Single,
    /// Pareto dominance over incidence and exposure errors.
    Pareto,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Initial exploration rate.
    pub epsilon: f64,
    pub learning_rate: f64,
    pub discount_factor: f64,
    /// Smallest error change rewarded by the single-objective scheme.
    pub just_noticeable_difference: f64,
    /// Largest error difference for two Pareto setups to count as identical.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Updates spent on one parameter before switching to another.
    pub updates_before_swap: usize,

    /// Simulation runs per calibration step.
    pub simulations_per_step: usize,
    /// Number of calibration steps.
    pub max_steps: usize,

    pub incidence_rate_goal: f64,
    #[serde(default)]
    pub exposure_rate_goal: Option<f64>,

    #[serde(default = "default_aggregate")]
    pub aggregate: Aggregate,
    #[serde(default = "default_objective")]
    pub objective: Objective,

    /// Parameters to tune (every parameter in the setup if absent).
    #[serde(default)]
    pub tuned: Option<Vec<ParamId>>,
    /// Search range of each parameter.
    pub parameters: Vec<CalibrationParameter>,
}

impl CalibrationConfig {
    pub fn setup(&self) -> CalibrationSetup {
        self.parameters
            .iter()
            .map(|par| (par.id, par.clone()))
            .collect()
    }

    pub fn tuned_ids(&self) -> Vec<ParamId> {
        match &self.tuned {
            Some(ids) => ids.clone(),
            None => self.setup().into_keys().collect(),
        }
    }

    /// Total number of simulation runs of the calibration.
    pub fn n_runs(&self) -> usize {
        self.max_steps * self.simulations_per_step
    }
}

fn default_ticks_per_run() -> u64 {
    8760
}

fn default_ticks_between_runs() -> u64 {
    100
}

fn default_pulmonary_ventilation_rate() -> f64 {
    0.48
}

fn default_quanta_production() -> f64 {
    1.25
}

fn default_similarity_threshold() -> f64 {
    0.1
}

fn default_aggregate() -> Aggregate {
    Aggregate::Median
}

fn default_objective() -> Objective {
    Objective::Single
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be a TOML document with the sections of [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;
        check_num(sim.ticks_per_run, 1..=1_000_000).context("invalid ticks per run")?;
        check_num(sim.ticks_between_runs, 1..=1_000_000).context("invalid ticks between runs")?;

        check_num(self.city.length, 1..=100_000).context("invalid city length")?;
        check_num(self.city.width, 1..=100_000).context("invalid city width")?;

        let pop = &self.population;
        check_num(pop.susceptible_count, 1..=1_000_000).context("invalid susceptible count")?;
        check_num(pop.exposed_count, 0..=1_000_000).context("invalid exposed count")?;
        check_num(pop.immunosuppressed_share, 0.0..=1.0)
            .context("invalid immunosuppressed share")?;
        check_num(pop.smokers_share, 0.0..=1.0).context("invalid smokers share")?;
        check_num(pop.alcohol_drinkers_share, 0.0..=1.0)
            .context("invalid alcohol drinkers share")?;
        for (i_loc, loc) in pop.locations.iter().enumerate() {
            check_point(loc.household, &self.city)
                .with_context(|| format!("invalid household of location {i_loc}"))?;
            check_point(loc.workplace, &self.city)
                .with_context(|| format!("invalid workplace of location {i_loc}"))?;
        }

        let model = &self.model;
        check_positive(model.average_room_volume).context("invalid average room volume")?;
        check_positive(model.mean_pulmonary_ventilation_rate)
            .context("invalid mean pulmonary ventilation rate")?;
        check_positive(model.mean_quanta_production)
            .context("invalid mean quanta production")?;
        check_tunable(&model.initial).context("invalid initial parameter values")?;

        self.validate_calibration()
            .context("invalid calibration config")?;

        Ok(())
    }

    fn validate_calibration(&self) -> Result<()> {
        let cal = &self.calibration;
        check_num(cal.epsilon, 0.0..=1.0).context("invalid epsilon")?;
        check_num(cal.learning_rate, 0.0..=1.0).context("invalid learning rate")?;
        check_num(cal.discount_factor, 0.0..=1.0).context("invalid discount factor")?;
        check_num(cal.just_noticeable_difference, 0.0..=1.0)
            .context("invalid just noticeable difference")?;
        check_num(cal.similarity_threshold, 0.0..=1.0).context("invalid similarity threshold")?;
        check_num(cal.updates_before_swap, 1..=100_000).context("invalid updates before swap")?;
        check_num(cal.simulations_per_step, 1..=10_000)
            .context("invalid simulations per step")?;
        check_num(cal.max_steps, 1..=1_000_000).context("invalid max steps")?;
        check_num(cal.incidence_rate_goal, 0.0..=1.0).context("invalid incidence rate goal")?;
        if let Some(goal) = cal.exposure_rate_goal {
            check_num(goal, 0.0..=1.0).context("invalid exposure rate goal")?;
        }
        if cal.objective == Objective::Pareto && cal.exposure_rate_goal.is_none() {
            bail!("pareto objective requires an exposure rate goal");
        }

        let mut seen = Vec::with_capacity(cal.parameters.len());
        for par in &cal.parameters {
            if seen.contains(&par.id) {
                bail!("parameter {} is set up more than once", par.id);
            }
            seen.push(par.id);
            par.validate()
                .with_context(|| format!("invalid setup of parameter {}", par.id))?;
            check_domain(par.id, par.lower_bound)
                .with_context(|| format!("invalid lower bound of parameter {}", par.id))?;
            check_domain(par.id, par.upper_bound)
                .with_context(|| format!("invalid upper bound of parameter {}", par.id))?;
        }

        let tuned = cal.tuned_ids();
        if tuned.is_empty() {
            bail!("at least one parameter must be tuned");
        }
        for id in tuned {
            if !seen.contains(&id) {
                bail!("tuned parameter {id} is missing from the calibration setup");
            }
        }

        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_positive(num: f64) -> Result<()> {
    if !(num > 0.0 && num.is_finite()) {
        bail!("number must be positive and finite, but is {num:?}");
    }
    Ok(())
}

fn check_point(point: [f64; 2], city: &CityConfig) -> Result<()> {
    check_num(point[0], 0.0..city.length as f64).context("invalid x coordinate")?;
    check_num(point[1], 0.0..city.width as f64).context("invalid y coordinate")?;
    Ok(())
}

/// Check that `val` is a legal value of parameter `id`.
fn check_domain(id: ParamId, val: f64) -> Result<()> {
    match id {
        ParamId::AverageRoomVentilationRate | ParamId::MeanDiagnosisDelay => check_positive(val),
        ParamId::InfectionProbability | ParamId::TreatmentDropoutRate => {
            check_num(val, 0.0..=1.0)
        }
    }
}

fn check_tunable(vals: &TunableValues) -> Result<()> {
    for id in ParamId::ALL {
        check_domain(id, vals.get(id)).with_context(|| format!("invalid {id}"))?;
    }
    Ok(())
}
