use crate::calibration::{Calibrator, RunMetrics};
use crate::config::Config;
use crate::engine::Engine;
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::path::{Path, PathBuf};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    /// Load `config.toml` from `sim_dir`, with `seed` overriding the configured seed.
    pub fn new<P: AsRef<Path>>(sim_dir: P, seed: Option<u64>) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let mut cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        if seed.is_some() {
            cfg.simulation.seed = seed;
        }
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Perform `n_runs` runs with the configured parameter values.
    pub fn simulate(&self, n_runs: usize) -> Result<()> {
        let rng = self.make_rng().context("failed to make rng")?;
        let mut engine =
            Engine::new(self.cfg.clone(), rng).context("failed to construct engine")?;
        log::info!("simulating with {:?}", engine.tunable_values());

        let mut metrics: Vec<RunMetrics> = Vec::with_capacity(n_runs);
        engine
            .run(n_runs, &mut metrics)
            .context("failed to run simulation")?;

        let mut incidence = Accumulator::new();
        let mut exposure = Accumulator::new();
        for run in &metrics {
            incidence.add(run.incidence_rate);
            exposure.add(run.exposure_rate);
        }
        let (incidence, exposure) = (incidence.report(), exposure.report());
        log::info!(
            "{} runs in {:?}: incidence rate {:.5} ± {:.5}, exposure rate {:.5} ± {:.5}",
            engine.n_runs_done(),
            self.sim_dir,
            incidence.mean,
            incidence.std_dev,
            exposure.mean,
            exposure.std_dev
        );

        Ok(())
    }

    /// Run the whole calibration and report the final parameter values.
    pub fn calibrate(&self) -> Result<()> {
        let mut rng = self.make_rng().context("failed to make rng")?;
        let tuner_rng = ChaCha12Rng::from_rng(&mut rng);

        let cal_cfg = self.cfg.calibration.clone();
        let n_runs = cal_cfg.n_runs();
        let mut calibrator = Calibrator::initialize(cal_cfg, self.cfg.model.initial, tuner_rng)
            .context("failed to initialize calibration")?;

        let mut engine =
            Engine::new(self.cfg.clone(), rng).context("failed to construct engine")?;
        engine
            .run(n_runs, &mut calibrator)
            .context("failed to run calibration")?;

        for (id, val) in calibrator.current_parameter_values() {
            log::info!("calibrated {id} = {val}");
        }
        let tuner = calibrator.tuner();
        for id in self.cfg.calibration.tuned_ids() {
            let q_vals: Vec<_> = tuner
                .actions(id)
                .iter()
                .map(|a| format!("{}: {:.5}", a.value(), a.q()))
                .collect();
            log::debug!("Q-values of {id}: [{}]", q_vals.join(", "));
        }
        for setup in tuner.pareto_front().setups() {
            log::info!(
                "pareto optimal {} = {}: incidence error {:.5}, exposure error {:.5}",
                setup.param,
                setup.value,
                setup.incidence_error,
                setup.exposure_error
            );
        }
        log::info!(
            "completed {} steps with best error {:.5}",
            calibrator.history().len(),
            calibrator.best_error()
        );

        Ok(())
    }

    fn make_rng(&self) -> Result<ChaCha12Rng> {
        match self.cfg.simulation.seed {
            Some(seed) => Ok(ChaCha12Rng::seed_from_u64(seed)),
            None => ChaCha12Rng::try_from_os_rng().context("failed to seed rng from os"),
        }
    }
}
