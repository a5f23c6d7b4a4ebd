use crate::calibration::RunMetrics;
use crate::config::{Config, Location};
use crate::grid::{Grid, Point};
use crate::model::{Agent, AgentId, Compartment};
use crate::params::TunableValues;
use crate::random;
use crate::schedule::{ActionHandle, Priority, Scheduler};
use crate::time::{TICKS_PER_DAY, Tick};
use crate::transmission::TransmissionModel;
use anyhow::{Context, Result};
use rand_chacha::ChaCha12Rng;
use rand_distr::Exp;

/// Displacement per random-walk step (unit: grid cells).
const DISPLACEMENT_PER_STEP: f64 = 1.0;

/// Action performed by (or on) a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    BecomeInfected,
    BeginTreatment,
    BecomeImmune,
    BecomeSusceptible,
    ExpelParticles,
    GoWork,
    GoHome,
    Walk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    RefreshParameters,
    RunStart,
    RunEnd,
    Agent(AgentId, AgentEvent),
}

/// Aggregate counters of the current run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub new_infections: usize,
    pub new_exposures: usize,
}

/// Observer of run boundaries.
///
/// The engine asks the hook for parameter values before every run and hands
/// it the metrics of every finished run.
pub trait RunHook {
    fn refresh_parameters(&mut self, vals: &mut TunableValues);
    fn on_run_boundary(&mut self, metrics: RunMetrics) -> Result<()>;
}

/// Collects run metrics without touching parameters.
impl RunHook for Vec<RunMetrics> {
    fn refresh_parameters(&mut self, _vals: &mut TunableValues) {}

    fn on_run_boundary(&mut self, metrics: RunMetrics) -> Result<()> {
        self.push(metrics);
        Ok(())
    }
}

/// Simulation engine.
///
/// Holds the configuration, the population with its spatial index, the event
/// queue and the random number generator, and executes simulation runs.
pub struct Engine {
    pub(crate) cfg: Config,
    pub(crate) vals: TunableValues,
    pub(crate) transmission: TransmissionModel,
    /// Delay from infection to diagnosis (unit: days).
    pub(crate) diagnosis_delay: Exp<f64>,

    pub(crate) agents: Vec<Agent>,
    pub(crate) grid: Grid,
    locations: Vec<Location>,

    pub(crate) queue: Scheduler<Event>,
    pub(crate) rng: ChaCha12Rng,
    pub(crate) counters: Counters,
    pub(crate) i_agt_ngh: Vec<AgentId>,

    n_runs_done: usize,
}

impl Engine {
    /// Build the population described by `cfg`.
    ///
    /// # Errors
    /// Returns an error if the initial parameter values do not define valid
    /// distributions.
    pub fn new(cfg: Config, mut rng: ChaCha12Rng) -> Result<Self> {
        let n_agt = cfg.population.n_agents();

        let mut agents = Vec::with_capacity(n_agt);
        agents.extend((0..cfg.population.exposed_count).map(|_| Agent::new(true)));
        agents.extend((0..cfg.population.susceptible_count).map(|_| Agent::new(false)));

        let locations = if cfg.population.locations.is_empty() {
            let (length, width) = (cfg.city.length as f64, cfg.city.width as f64);
            (0..n_agt)
                .map(|_| Location {
                    household: [
                        random::uniform(&mut rng, 0.0, length),
                        random::uniform(&mut rng, 0.0, width),
                    ],
                    workplace: [
                        random::uniform(&mut rng, 0.0, length),
                        random::uniform(&mut rng, 0.0, width),
                    ],
                })
                .collect()
        } else {
            cfg.population.locations.clone()
        };

        let grid = Grid::new(cfg.city.length, cfg.city.width, n_agt);
        let vals = cfg.model.initial;
        let transmission = TransmissionModel::new(&cfg.model, &vals);
        let diagnosis_delay = diagnosis_delay(&vals)?;

        Ok(Self {
            cfg,
            vals,
            transmission,
            diagnosis_delay,
            agents,
            grid,
            locations,
            queue: Scheduler::new(),
            rng,
            counters: Counters::default(),
            i_agt_ngh: Vec::new(),
            n_runs_done: 0,
        })
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn tunable_values(&self) -> &TunableValues {
        &self.vals
    }

    pub fn n_runs_done(&self) -> usize {
        self.n_runs_done
    }

    /// Perform `n_runs` consecutive simulation runs, reporting to `hook`.
    pub fn run<H: RunHook>(&mut self, n_runs: usize, hook: &mut H) -> Result<()> {
        let run_handles = self.schedule_runs(n_runs);

        while let Some(event) = self.queue.next_event() {
            self.process(event, hook)?;
        }

        for handle in run_handles {
            self.queue.cancel(handle);
        }
        debug_assert_eq!(self.queue.n_live(), 0);

        Ok(())
    }

    /// Schedule the lifecycle events of `n_runs` runs starting now and end
    /// the queue after the last run.
    pub(crate) fn schedule_runs(&mut self, n_runs: usize) -> Vec<ActionHandle> {
        if n_runs == 0 {
            self.queue.end_at(self.queue.current_tick());
            return Vec::new();
        }

        // The end of a run must fall strictly before the start of the next one.
        let ticks_per_run = self.cfg.simulation.ticks_per_run;
        let period = ticks_per_run + self.cfg.simulation.ticks_between_runs.max(1);

        let handles = vec![
            self.queue.schedule_recurring(
                0,
                period,
                Priority::ParameterRefresh,
                Event::RefreshParameters,
            ),
            self.queue
                .schedule_recurring(0, period, Priority::Reinitialize, Event::RunStart),
            self.queue.schedule_recurring(
                ticks_per_run,
                period,
                Priority::Bookkeeping,
                Event::RunEnd,
            ),
        ];

        let last_tick = self.queue.current_tick() + (n_runs as Tick - 1) * period + ticks_per_run;
        self.queue.end_at(last_tick);

        handles
    }

    pub(crate) fn process<H: RunHook>(&mut self, event: Event, hook: &mut H) -> Result<()> {
        match event {
            Event::RefreshParameters => {
                hook.refresh_parameters(&mut self.vals);
                self.transmission = TransmissionModel::new(&self.cfg.model, &self.vals);
                self.diagnosis_delay = diagnosis_delay(&self.vals)
                    .context("failed to refresh parameters")?;
            }
            Event::RunStart => self.start_run(),
            Event::RunEnd => {
                let metrics = self.finish_run();
                hook.on_run_boundary(metrics)
                    .context("failed to handle run boundary")?;
            }
            Event::Agent(i_agt, agt_event) => {
                self.handle_agent_event(i_agt, agt_event);
                let agt = &self.agents[i_agt];
                debug_assert!(
                    matches!(agt.compartment(), Compartment::Susceptible | Compartment::Immune)
                        || agt.has_pending_transition(&self.queue),
                    "agent {i_agt} is {:?} with nothing pending",
                    agt.compartment()
                );
            }
        }
        Ok(())
    }

    fn start_run(&mut self) {
        self.counters = Counters::default();

        // Reinitialize every agent before anyone enters the disease lifecycle.
        for agt in &mut self.agents {
            agt.reinitialize(&mut self.queue, &mut self.rng, &self.cfg.population);
        }

        for i_agt in 0..self.agents.len() {
            self.start_agent(i_agt);
        }
    }

    fn finish_run(&mut self) -> RunMetrics {
        let metrics = RunMetrics::new(self.counters, self.cfg.population.susceptible_count);

        // Nothing happens between runs.
        for agt in &mut self.agents {
            agt.cancel_all(&mut self.queue);
            debug_assert_eq!(agt.n_live_actions(&self.queue), 0);
        }

        self.n_runs_done += 1;
        log::info!(
            "completed run {}: new infections {}, new exposures {}, incidence rate {:.4}, exposure rate {:.4}",
            self.n_runs_done,
            metrics.new_infections,
            metrics.new_exposures,
            metrics.incidence_rate,
            metrics.exposure_rate
        );

        metrics
    }

    fn start_agent(&mut self, i_agt: AgentId) {
        // Initialize disease.
        if self.agents[i_agt].initially_exposed() {
            self.expose(i_agt, true);
        } else {
            self.agents[i_agt].set_compartment(Compartment::Susceptible);
        }

        // Assign reference locations.
        let i_loc = random::index(&mut self.rng, self.locations.len());
        let loc = self.locations[i_loc];
        let agt = &mut self.agents[i_agt];
        agt.household = Point::from(loc.household);
        agt.workplace = Point::from(loc.workplace);

        // Schedule daily routine.
        let (wake_up, return_home) = (agt.wake_up_tick, agt.return_home_tick);
        let routine = [
            (wake_up, TICKS_PER_DAY, AgentEvent::GoWork),
            (return_home, TICKS_PER_DAY, AgentEvent::GoHome),
            (wake_up, 1, AgentEvent::Walk),
        ];
        for (first_delay, interval, agt_event) in routine {
            let handle = self.queue.schedule_recurring(
                first_delay,
                interval,
                Priority::Agent,
                Event::Agent(i_agt, agt_event),
            );
            self.agents[i_agt].track_routine(handle);
        }

        self.grid.move_to(i_agt, self.agents[i_agt].household);
    }

    fn handle_agent_event(&mut self, i_agt: AgentId, agt_event: AgentEvent) {
        match agt_event {
            AgentEvent::BecomeInfected => self.become_infected(i_agt),
            AgentEvent::BeginTreatment => self.begin_treatment(i_agt),
            AgentEvent::BecomeImmune => self.become_immune(i_agt),
            AgentEvent::BecomeSusceptible => self.become_susceptible(i_agt),
            AgentEvent::ExpelParticles => self.expel_particles(i_agt),
            AgentEvent::GoWork => self.grid.move_to(i_agt, self.agents[i_agt].workplace),
            AgentEvent::GoHome => self.grid.move_to(i_agt, self.agents[i_agt].household),
            AgentEvent::Walk => {
                let dx = random::uniform(&mut self.rng, -DISPLACEMENT_PER_STEP, DISPLACEMENT_PER_STEP);
                let dy = random::uniform(&mut self.rng, -DISPLACEMENT_PER_STEP, DISPLACEMENT_PER_STEP);
                self.grid.move_by(i_agt, dx, dy);
            }
        }
    }
}

fn diagnosis_delay(vals: &TunableValues) -> Result<Exp<f64>> {
    Exp::new(1.0 / vals.mean_diagnosis_delay).with_context(|| {
        format!(
            "failed to build diagnosis delay for mean {}",
            vals.mean_diagnosis_delay
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use rand::SeedableRng;
    use rand_distr::Distribution;

    fn outbreak_config() -> Config {
        let mut cfg = config::tests::sample();
        cfg.population.susceptible_count = 100;
        cfg.population.exposed_count = 5;
        cfg.simulation.ticks_per_run = 90 * TICKS_PER_DAY;
        cfg.model.initial.infection_probability = 1.0;
        cfg
    }

    #[test]
    fn initially_exposed_agents_become_infected() {
        let mut engine = Engine::new(outbreak_config(), ChaCha12Rng::seed_from_u64(11)).unwrap();
        let mut metrics: Vec<RunMetrics> = Vec::new();
        let mut reached_infected = [false; 5];

        engine.schedule_runs(1);
        while let Some(event) = engine.queue.next_event() {
            engine.process(event, &mut metrics).unwrap();
            if event == Event::RunEnd {
                continue;
            }
            for (i_agt, reached) in reached_infected.iter_mut().enumerate() {
                assert!(engine.agents[i_agt].initially_exposed());
                *reached |= engine.agents[i_agt].compartment() == Compartment::Infected;
            }
        }

        assert!(reached_infected.iter().all(|&r| r));
        assert_eq!(metrics.len(), 1);
        assert!(metrics[0].new_infections >= 5);
        assert!(metrics[0].new_exposures >= 5);
    }

    #[test]
    fn active_compartments_always_have_a_pending_transition() {
        let mut engine = Engine::new(outbreak_config(), ChaCha12Rng::seed_from_u64(12)).unwrap();
        let mut metrics: Vec<RunMetrics> = Vec::new();

        engine.schedule_runs(1);
        while let Some(event) = engine.queue.next_event() {
            engine.process(event, &mut metrics).unwrap();
            if event == Event::RunEnd {
                break;
            }
            for agt in engine.agents() {
                match agt.compartment() {
                    Compartment::Susceptible | Compartment::Immune => {}
                    _ => assert!(agt.has_pending_transition(&engine.queue)),
                }
            }
        }
    }

    #[test]
    fn runs_leave_nothing_scheduled() {
        let mut engine = Engine::new(config::tests::sample(), ChaCha12Rng::seed_from_u64(13)).unwrap();
        let mut metrics: Vec<RunMetrics> = Vec::new();
        engine.run(3, &mut metrics).unwrap();

        assert_eq!(metrics.len(), 3);
        assert_eq!(engine.n_runs_done(), 3);
        assert_eq!(engine.queue.n_live(), 0);
        for agt in engine.agents() {
            assert_eq!(agt.n_live_actions(&engine.queue), 0);
        }
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let run = |seed| {
            let mut engine = Engine::new(outbreak_config(), ChaCha12Rng::seed_from_u64(seed)).unwrap();
            let mut metrics: Vec<RunMetrics> = Vec::new();
            engine.run(2, &mut metrics).unwrap();
            metrics
        };
        assert_eq!(run(21), run(21));
    }

    #[test]
    fn refreshes_parameters_before_each_run() {
        struct Fixed {
            vals: TunableValues,
            n_refresh: usize,
            n_boundary: usize,
        }

        impl RunHook for Fixed {
            fn refresh_parameters(&mut self, vals: &mut TunableValues) {
                *vals = self.vals;
                self.n_refresh += 1;
            }

            fn on_run_boundary(&mut self, _metrics: RunMetrics) -> Result<()> {
                self.n_boundary += 1;
                Ok(())
            }
        }

        let cfg = config::tests::sample();
        let mut vals = cfg.model.initial;
        vals.treatment_dropout_rate = 0.4;
        let mut hook = Fixed {
            vals,
            n_refresh: 0,
            n_boundary: 0,
        };

        let mut engine = Engine::new(cfg, ChaCha12Rng::seed_from_u64(14)).unwrap();
        engine.run(2, &mut hook).unwrap();

        assert_eq!(hook.n_refresh, 2);
        assert_eq!(hook.n_boundary, 2);
        assert_eq!(engine.tunable_values().treatment_dropout_rate, 0.4);
    }

    #[test]
    fn back_to_back_runs_are_measured_separately() {
        let mut cfg = outbreak_config();
        cfg.simulation.ticks_between_runs = 0;
        let mut engine = Engine::new(cfg, ChaCha12Rng::seed_from_u64(15)).unwrap();
        let mut metrics: Vec<RunMetrics> = Vec::new();
        engine.run(3, &mut metrics).unwrap();

        assert_eq!(metrics.len(), 3);
        for run in &metrics {
            assert!(run.new_infections >= 5, "run reported {run:?}");
        }
        assert_eq!(engine.queue.n_live(), 0);
    }

    #[test]
    fn diagnosis_delay_follows_mean() {
        let mut cfg = config::tests::sample();
        cfg.model.initial.mean_diagnosis_delay = 40.0;
        let mut engine = Engine::new(cfg, ChaCha12Rng::seed_from_u64(16)).unwrap();

        let n_vals = 20_000;
        let sum: f64 = (0..n_vals)
            .map(|_| engine.diagnosis_delay.sample(&mut engine.rng))
            .sum();
        let mean = sum / n_vals as f64;
        assert!((mean - 40.0).abs() < 2.0, "mean was {mean}");
    }
}
