use crate::config::PopulationConfig;
use crate::grid::Point;
use crate::random;
use crate::schedule::{ActionHandle, Scheduler};
use crate::time::{Tick, hours_to_ticks};
use rand::Rng;

/// Index of an agent in the population.
pub type AgentId = usize;

const MIN_WAKE_UP_HOUR: f64 = 6.0;
const MAX_WAKE_UP_HOUR: f64 = 9.0;
const MIN_RETURN_HOME_HOUR: f64 = 17.0;
const MAX_RETURN_HOME_HOUR: f64 = 20.0;

const IMMUNODEFICIENCY_FOLD: f64 = 10.0;
const RISK_FACTOR_FOLD: f64 = 1.5;

/// Disease stage of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compartment {
    Susceptible,
    Exposed,
    Infected,
    OnTreatment,
    Immune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiskFactors {
    pub immunosuppressed: bool,
    pub smoker: bool,
    pub drinks_alcohol: bool,
}

impl RiskFactors {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R, pop: &PopulationConfig) -> Self {
        Self {
            immunosuppressed: random::chance(rng, pop.immunosuppressed_share),
            smoker: random::chance(rng, pop.smokers_share),
            drinks_alcohol: random::chance(rng, pop.alcohol_drinkers_share),
        }
    }

    /// Combined multiplier applied to the progression probability.
    pub fn multiplier(&self) -> f64 {
        let mut mult = 1.0;
        if self.immunosuppressed {
            mult *= IMMUNODEFICIENCY_FOLD;
        }
        if self.smoker {
            mult *= RISK_FACTOR_FOLD;
        }
        if self.drinks_alcohol {
            mult *= RISK_FACTOR_FOLD;
        }
        mult
    }
}

/// Citizen of the simulation.
///
/// The agent owns the handles of everything it has scheduled: disease
/// transitions (including the particle emission) and its daily routine.
pub struct Agent {
    compartment: Compartment,
    initially_exposed: bool,

    pub(crate) household: Point,
    pub(crate) workplace: Point,
    pub(crate) risk: RiskFactors,
    pub(crate) wake_up_tick: Tick,
    pub(crate) return_home_tick: Tick,

    notified_exposure: bool,
    notified_infection: bool,

    pub(crate) emission: Option<ActionHandle>,
    transitions: Vec<ActionHandle>,
    routine: Vec<ActionHandle>,
}

impl Agent {
    pub fn new(initially_exposed: bool) -> Self {
        Self {
            compartment: Compartment::Susceptible,
            initially_exposed,
            household: Point::default(),
            workplace: Point::default(),
            risk: RiskFactors::default(),
            wake_up_tick: hours_to_ticks(MIN_WAKE_UP_HOUR),
            return_home_tick: hours_to_ticks(MIN_RETURN_HOME_HOUR),
            notified_exposure: false,
            notified_infection: false,
            emission: None,
            transitions: Vec::new(),
            routine: Vec::new(),
        }
    }

    pub fn compartment(&self) -> Compartment {
        self.compartment
    }

    pub fn initially_exposed(&self) -> bool {
        self.initially_exposed
    }

    pub(crate) fn set_compartment(&mut self, compartment: Compartment) {
        self.compartment = compartment;
    }

    /// Prepare the agent for a new run.
    ///
    /// Cancels everything the agent scheduled, clears the notification flags
    /// and draws fresh daily times and risk factors.
    pub fn reinitialize<E: Clone, R: Rng + ?Sized>(
        &mut self,
        queue: &mut Scheduler<E>,
        rng: &mut R,
        pop: &PopulationConfig,
    ) {
        self.cancel_all(queue);
        self.compartment = Compartment::Susceptible;
        self.notified_exposure = false;
        self.notified_infection = false;

        let wake_up_hour = random::uniform(rng, MIN_WAKE_UP_HOUR, MAX_WAKE_UP_HOUR);
        let return_home_hour = random::uniform(rng, MIN_RETURN_HOME_HOUR, MAX_RETURN_HOME_HOUR);
        self.wake_up_tick = hours_to_ticks(wake_up_hour);
        self.return_home_tick = hours_to_ticks(return_home_hour);
        self.risk = RiskFactors::draw(rng, pop);
    }

    /// Cancel every pending action of the agent.
    pub fn cancel_all<E: Clone>(&mut self, queue: &mut Scheduler<E>) {
        for handle in self.transitions.drain(..).chain(self.routine.drain(..)) {
            queue.cancel(handle);
        }
        if let Some(handle) = self.emission.take() {
            queue.cancel(handle);
        }
    }

    pub(crate) fn track_transition<E: Clone>(&mut self, queue: &Scheduler<E>, handle: ActionHandle) {
        self.transitions.retain(|&h| queue.is_live(h));
        self.transitions.push(handle);
    }

    pub(crate) fn track_routine(&mut self, handle: ActionHandle) {
        self.routine.push(handle);
    }

    /// Whether a disease transition or particle emission is still pending.
    pub fn has_pending_transition<E: Clone>(&self, queue: &Scheduler<E>) -> bool {
        self.emission.is_some_and(|h| queue.is_live(h))
            || self.transitions.iter().any(|&h| queue.is_live(h))
    }

    pub fn n_live_actions<E: Clone>(&self, queue: &Scheduler<E>) -> usize {
        self.transitions
            .iter()
            .chain(&self.routine)
            .chain(&self.emission)
            .filter(|&&h| queue.is_live(h))
            .count()
    }

    /// Mark the exposure of this run as reported; returns whether it was new.
    pub(crate) fn notify_exposure(&mut self) -> bool {
        !std::mem::replace(&mut self.notified_exposure, true)
    }

    /// Mark the infection of this run as reported; returns whether it was new.
    pub(crate) fn notify_infection(&mut self) -> bool {
        !std::mem::replace(&mut self.notified_infection, true)
    }
}
