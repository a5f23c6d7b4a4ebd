//! Disease state machine of a single agent.
//!
//! `Susceptible -> Exposed -> Infected -> OnTreatment -> Immune -> Susceptible`,
//! with treatment dropout looping back to `Infected`. Each transition schedules
//! the next one through the engine's queue.

use crate::engine::{AgentEvent, Engine, Event};
use crate::model::{AgentId, Compartment};
use crate::random;
use crate::schedule::Priority;
use crate::time::{Tick, days_to_ticks};
use rand_distr::Distribution;

const MIN_INCUBATION_DAYS: f64 = 15.0;
const MAX_INCUBATION_DAYS: f64 = 84.0;
const MIN_TREATMENT_DAYS: f64 = 180.0;
const MAX_TREATMENT_DAYS: f64 = 244.0;
const MIN_FULL_RECOVERY_DAYS: f64 = 608.0;
const MAX_FULL_RECOVERY_DAYS: f64 = 852.0;

/// Ticks between two particle emissions of an infected agent.
pub const EMISSION_INTERVAL: Tick = 1;

impl Engine {
    /// Expose a susceptible agent.
    ///
    /// The exposure progresses to disease with the risk-adjusted infection
    /// probability (always for initially exposed agents); otherwise the agent
    /// is susceptible again right away.
    pub(crate) fn expose(&mut self, i_agt: AgentId, is_initial: bool) {
        let agt = &mut self.agents[i_agt];
        agt.set_compartment(Compartment::Exposed);

        let prob = self.vals.infection_probability * agt.risk.multiplier();
        if is_initial || random::chance(&mut self.rng, prob) {
            let days = random::uniform(&mut self.rng, MIN_INCUBATION_DAYS, MAX_INCUBATION_DAYS);
            self.schedule_transition(i_agt, days_to_ticks(days), AgentEvent::BecomeInfected);
        } else {
            self.agents[i_agt].set_compartment(Compartment::Susceptible);
        }

        if self.agents[i_agt].notify_exposure() {
            self.counters.new_exposures += 1;
        }
        log::trace!("agent {i_agt} exposed");
    }

    pub(crate) fn become_infected(&mut self, i_agt: AgentId) {
        self.agents[i_agt].set_compartment(Compartment::Infected);

        // Start particle emission.
        let handle = self.queue.schedule_recurring(
            EMISSION_INTERVAL,
            EMISSION_INTERVAL,
            Priority::Agent,
            Event::Agent(i_agt, AgentEvent::ExpelParticles),
        );
        if let Some(old) = self.agents[i_agt].emission.replace(handle) {
            self.queue.cancel(old);
        }

        // Schedule diagnosis.
        let days = self.diagnosis_delay.sample(&mut self.rng);
        self.schedule_transition(i_agt, days_to_ticks(days), AgentEvent::BeginTreatment);

        if self.agents[i_agt].notify_infection() {
            self.counters.new_infections += 1;
        }
        log::trace!("agent {i_agt} infected");
    }

    pub(crate) fn begin_treatment(&mut self, i_agt: AgentId) {
        self.agents[i_agt].set_compartment(Compartment::OnTreatment);

        if let Some(handle) = self.agents[i_agt].emission.take() {
            self.queue.cancel(handle);
        }

        if random::chance(&mut self.rng, self.vals.treatment_dropout_rate) {
            log::trace!("agent {i_agt} dropped out of treatment");
            self.become_infected(i_agt);
        } else {
            let days = random::uniform(&mut self.rng, MIN_TREATMENT_DAYS, MAX_TREATMENT_DAYS);
            self.schedule_transition(i_agt, days_to_ticks(days), AgentEvent::BecomeImmune);
        }
    }

    pub(crate) fn become_immune(&mut self, i_agt: AgentId) {
        self.agents[i_agt].set_compartment(Compartment::Immune);

        let days = random::uniform(&mut self.rng, MIN_FULL_RECOVERY_DAYS, MAX_FULL_RECOVERY_DAYS);
        self.schedule_transition(i_agt, days_to_ticks(days), AgentEvent::BecomeSusceptible);
    }

    pub(crate) fn become_susceptible(&mut self, i_agt: AgentId) {
        self.agents[i_agt].set_compartment(Compartment::Susceptible);
    }

    /// Expose susceptible agents sharing the cell of an infected agent.
    pub(crate) fn expel_particles(&mut self, i_agt: AgentId) {
        let mut i_agt_ngh = std::mem::take(&mut self.i_agt_ngh);
        i_agt_ngh.clear();
        i_agt_ngh.extend_from_slice(self.grid.neighbors_of(i_agt));

        let n_infected = i_agt_ngh
            .iter()
            .filter(|&&i_ngh| self.agents[i_ngh].compartment() == Compartment::Infected)
            .count();

        for &i_ngh in &i_agt_ngh {
            if self.agents[i_ngh].compartment() == Compartment::Susceptible
                && self.transmission.is_exposed(&mut self.rng, n_infected)
            {
                self.expose(i_ngh, false);
            }
        }

        self.i_agt_ngh = i_agt_ngh;
    }

    fn schedule_transition(&mut self, i_agt: AgentId, delay: Tick, agt_event: AgentEvent) {
        let handle = self.queue.schedule_once(
            delay,
            Priority::Agent,
            Event::Agent(i_agt, agt_event),
        );
        self.agents[i_agt].track_transition(&self.queue, handle);
    }
}
