//! Wells-Riley dose-response model of airborne exposure.

use crate::config::ModelConfig;
use crate::params::TunableValues;
use crate::random;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionModel {
    pulmonary_ventilation_rate: f64,
    quanta_production: f64,
    room_volume: f64,
    room_ventilation_rate: f64,
}

impl TransmissionModel {
    pub fn new(model: &ModelConfig, vals: &TunableValues) -> Self {
        let tm = Self {
            pulmonary_ventilation_rate: model.mean_pulmonary_ventilation_rate,
            quanta_production: model.mean_quanta_production,
            room_volume: model.average_room_volume,
            room_ventilation_rate: vals.average_room_ventilation_rate,
        };

        let prob = tm.raw_probability(1);
        if !(0.0..=1.0).contains(&prob) {
            log::warn!(
                "exposure probability for one infected neighbor is {prob:.4}, outside [0, 1]; draws are clamped"
            );
        }

        tm
    }

    /// Exposure probability of a susceptible agent sharing a cell with
    /// `n_infected` infected agents, clamped to `[0, 1]`.
    pub fn exposure_probability(&self, n_infected: usize) -> f64 {
        let prob = self.raw_probability(n_infected);
        if prob.is_nan() { 0.0 } else { prob.clamp(0.0, 1.0) }
    }

    /// Draw whether a susceptible agent gets exposed.
    pub fn is_exposed<R: Rng + ?Sized>(&self, rng: &mut R, n_infected: usize) -> bool {
        random::chance(rng, self.exposure_probability(n_infected))
    }

    fn raw_probability(&self, n_infected: usize) -> f64 {
        let phi = n_infected as f64 * self.quanta_production;
        (self.pulmonary_ventilation_rate * phi) / (self.room_volume * self.room_ventilation_rate)
    }
}
