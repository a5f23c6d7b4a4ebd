use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Identifier of a tunable model parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamId {
    AverageRoomVentilationRate,
    InfectionProbability,
    MeanDiagnosisDelay,
    TreatmentDropoutRate,
}

impl ParamId {
    pub const ALL: [ParamId; 4] = [
        ParamId::AverageRoomVentilationRate,
        ParamId::InfectionProbability,
        ParamId::MeanDiagnosisDelay,
        ParamId::TreatmentDropoutRate,
    ];
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamId::AverageRoomVentilationRate => "averageRoomVentilationRate",
            ParamId::InfectionProbability => "infectionProbability",
            ParamId::MeanDiagnosisDelay => "meanDiagnosisDelay",
            ParamId::TreatmentDropoutRate => "treatmentDropoutRate",
        };
        f.write_str(name)
    }
}

/// Current values of the tunable parameters.
///
/// This is the parameter store handed to the disease model; the calibrator
/// owns the authoritative copy and refreshes the engine's copy between runs.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct TunableValues {
    /// Air changes of a typical room (unit: per hour).
    pub average_room_ventilation_rate: f64,
    /// Base probability that an exposure progresses to active disease.
    pub infection_probability: f64,
    /// Mean delay from infection to diagnosis (unit: days).
    pub mean_diagnosis_delay: f64,
    /// Probability of dropping out of treatment.
    pub treatment_dropout_rate: f64,
}

impl TunableValues {
    pub fn get(&self, id: ParamId) -> f64 {
        match id {
            ParamId::AverageRoomVentilationRate => self.average_room_ventilation_rate,
            ParamId::InfectionProbability => self.infection_probability,
            ParamId::MeanDiagnosisDelay => self.mean_diagnosis_delay,
            ParamId::TreatmentDropoutRate => self.treatment_dropout_rate,
        }
    }

    pub fn set(&mut self, id: ParamId, val: f64) {
        match id {
            ParamId::AverageRoomVentilationRate => self.average_room_ventilation_rate = val,
            ParamId::InfectionProbability => self.infection_probability = val,
            ParamId::MeanDiagnosisDelay => self.mean_diagnosis_delay = val,
            ParamId::TreatmentDropoutRate => self.treatment_dropout_rate = val,
        }
    }

    pub fn to_map(&self) -> BTreeMap<ParamId, f64> {
        ParamId::ALL.iter().map(|&id| (id, self.get(id))).collect()
    }
}

/// Search range of one tunable parameter.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CalibrationParameter {
    pub id: ParamId,
    pub tolerance: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl CalibrationParameter {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            bail!("tolerance must be in (0, 1), but is {}", self.tolerance);
        }
        if !(self.lower_bound < self.upper_bound) {
            bail!(
                "lower bound must be below upper bound, but bounds are [{}, {}]",
                self.lower_bound,
                self.upper_bound
            );
        }
        Ok(())
    }

    /// Distance between two consecutive candidate values.
    pub fn step(&self) -> f64 {
        2.0 * self.tolerance * (self.upper_bound - self.lower_bound)
    }

    pub fn n_actions(&self) -> usize {
        ((self.upper_bound - self.lower_bound) / self.step()).round() as usize + 1
    }

    /// Candidate values `lower_bound + i * step` for every action index,
    /// capped at `upper_bound`.
    pub fn actions(&self) -> Vec<f64> {
        let step = self.step();
        (0..self.n_actions())
            .map(|i| (self.lower_bound + i as f64 * step).min(self.upper_bound))
            .collect()
    }
}

/// Calibration parameters keyed by id.
pub type CalibrationSetup = BTreeMap<ParamId, CalibrationParameter>;

#[cfg(test)]
mod tests {
    use super::*;

    fn param(tolerance: f64, lower_bound: f64, upper_bound: f64) -> CalibrationParameter {
        CalibrationParameter {
            id: ParamId::InfectionProbability,
            tolerance,
            lower_bound,
            upper_bound,
        }
    }

    #[test]
    fn discretizes_range() {
        let par = param(0.1, 0.0, 10.0);
        assert!((par.step() - 2.0).abs() < 1e-12);
        assert_eq!(par.n_actions(), 6);

        let expected = [0.0, 2.0, 4.0, 6.0, 8.0, 10.0];
        for (val, exp) in par.actions().iter().zip(expected) {
            assert!((val - exp).abs() < 1e-12, "{val} != {exp}");
        }
    }

    #[test]
    fn rounds_uneven_ranges() {
        // step = 0.3, range / step = 3.33 -> 3 steps, 4 actions
        let par = param(0.15, 0.0, 1.0);
        assert_eq!(par.n_actions(), 4);
        assert_eq!(par.actions().len(), 4);

        // step = 0.6 -> 2 steps, the last one past the upper bound
        let par = param(0.3, 0.0, 1.0);
        let actions = par.actions();
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|val| (0.0..=1.0).contains(val)));
        assert_eq!(actions[2], 1.0);
    }

    #[test]
    fn rejects_malformed_bounds() {
        assert!(param(0.1, 1.0, 1.0).validate().is_err());
        assert!(param(0.1, 2.0, 1.0).validate().is_err());
        assert!(param(0.0, 0.0, 1.0).validate().is_err());
        assert!(param(1.0, 0.0, 1.0).validate().is_err());
        assert!(param(0.05, 0.0, 1.0).validate().is_ok());
    }

    #[test]
    fn tunable_values_round_trip_by_id() {
        let mut vals = TunableValues {
            average_room_ventilation_rate: 6.0,
            infection_probability: 0.1,
            mean_diagnosis_delay: 60.0,
            treatment_dropout_rate: 0.05,
        };
        vals.set(ParamId::MeanDiagnosisDelay, 45.0);
        assert_eq!(vals.get(ParamId::MeanDiagnosisDelay), 45.0);
        assert_eq!(vals.to_map().len(), ParamId::ALL.len());
        assert_eq!(ParamId::TreatmentDropoutRate.to_string(), "treatmentDropoutRate");
    }
}
