//! Forward model pipeline
//!
//! Chains the stages strictly forward:
//!
//! ```text
//! Stimulus → Neurodynamics → Hemodynamics → Optics → (Noise)
//! ```
//!
//! Every stage method takes the previous stage's output by reference and
//! returns a fresh owned value; [`ForwardModel`] itself is never mutated by a
//! run, so repeated runs give identical clean outputs.

use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::{BalloonConstants, OpticalConstants};
use crate::error::SimulationResult;
use crate::hemo::{self, HemodynamicState, RegionalBalloon};
use crate::neuro::{self, NeurodynamicState};
use crate::noise::{NoiseInjector, NoiseSpecification, NoisyHemoglobin, NoisySignal, TraceSupplier};
use crate::optics::{compute_optical_response, hemoglobin_changes, HemoglobinChanges};
use crate::params::SimulationParameters;
use crate::stimulus::StimulusSignal;

/// Signal that receives the configured noise
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseTarget {
    /// Optical output Y, calibrated against Y's peak
    #[default]
    Optical,
    /// Δq and Δh, calibrated jointly; Y is recomputed from the noisy values
    Hemoglobin,
}

/// Run-level options
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Noise to inject, if any
    #[serde(default)]
    pub noise: Option<NoiseSpecification>,
    /// Where the noise goes
    #[serde(default)]
    pub target: NoiseTarget,
    /// RNG seed; `None` seeds from the OS
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Clean outputs of every stage
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationOutput {
    /// Input channels and timestamps
    pub stimulus: StimulusSignal,
    /// Neural activity (time × regions)
    pub neuro: NeurodynamicState,
    /// Balloon-model trajectories (region × time)
    pub hemo: HemodynamicState,
    /// Concentration changes (region × time)
    pub changes: HemoglobinChanges,
    /// Optical density (2·regions × time, deoxy/oxy interleaved)
    pub optical: Array2<f64>,
}

/// Clean outputs plus their noise-augmented variants
#[derive(Clone, Debug, PartialEq)]
pub struct NoisySimulation {
    /// Noise-free run
    pub clean: SimulationOutput,
    /// Noisy optical output; for [`NoiseTarget::Hemoglobin`] its `noise` is
    /// the difference the hemoglobin noise made to Y
    pub optical: Option<NoisySignal>,
    /// Noisy hemoglobin changes, only for [`NoiseTarget::Hemoglobin`]
    pub hemoglobin: Option<NoisyHemoglobin>,
}

/// The complete forward model for one parameter set.
#[derive(Clone, Debug)]
pub struct ForwardModel {
    params: SimulationParameters,
    balloon: BalloonConstants,
    optics: OpticalConstants,
}

impl ForwardModel {
    /// Create a model with literature constants.
    ///
    /// # Errors
    ///
    /// Whatever [`SimulationParameters::validate`] reports.
    pub fn new(params: SimulationParameters) -> SimulationResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            balloon: BalloonConstants::default(),
            optics: OpticalConstants::default(),
        })
    }

    /// Replace the balloon-model constants
    #[must_use]
    pub fn with_balloon(mut self, balloon: BalloonConstants) -> Self {
        self.balloon = balloon;
        self
    }

    /// Replace the optical constants
    #[must_use]
    pub fn with_optics(mut self, optics: OpticalConstants) -> Self {
        self.optics = optics;
        self
    }

    /// Parameter bundle
    #[must_use]
    pub fn parameters(&self) -> &SimulationParameters {
        &self.params
    }

    /// Generate the stimulus for the configured protocol.
    ///
    /// # Errors
    ///
    /// Protocol validation errors.
    pub fn stimulus(&self) -> SimulationResult<StimulusSignal> {
        self.params
            .protocol()
            .generate(self.params.frequency(), self.params.inputs())
    }

    /// Integrate neural activity for `stimulus`.
    ///
    /// # Errors
    ///
    /// See [`neuro::integrate`].
    pub fn neurodynamics(&self, stimulus: &StimulusSignal) -> SimulationResult<NeurodynamicState> {
        neuro::integrate(
            self.params.connectivity(),
            self.params.modulation(),
            self.params.input_effect(),
            stimulus,
            self.params.step(),
        )
    }

    /// Integrate the balloon model driven by `neuro`.
    ///
    /// The Euler step is the sample spacing `1/frequency`, so sample `t` of
    /// the output lines up with `neuro`'s timestamp `t`.
    ///
    /// # Errors
    ///
    /// See [`hemo::integrate`].
    pub fn hemodynamics(&self, neuro: &NeurodynamicState) -> SimulationResult<HemodynamicState> {
        let balloon = RegionalBalloon::derive(
            &self.balloon,
            self.params.physiology(),
            self.params.regions(),
        )?;
        hemo::integrate(neuro.activity().view(), &balloon, 1.0 / self.params.frequency())
    }

    /// Concentration changes and optical density for `hemo`.
    ///
    /// # Errors
    ///
    /// Shape errors from the optics stage.
    pub fn optics(
        &self,
        hemo: &HemodynamicState,
    ) -> SimulationResult<(HemoglobinChanges, Array2<f64>)> {
        let changes = hemoglobin_changes(hemo.deoxy().view(), hemo.total().view(), &self.optics)?;
        let optical = compute_optical_response(
            changes.delta_q.view(),
            changes.delta_h.view(),
            &self.optics,
        )?;
        Ok((changes, optical))
    }

    /// Run every stage without noise.
    ///
    /// # Errors
    ///
    /// The first stage error.
    pub fn simulate(&self) -> SimulationResult<SimulationOutput> {
        let started = Instant::now();

        let stimulus = self.stimulus()?;
        debug!(
            channels = stimulus.channels(),
            samples = stimulus.len(),
            "Stimulus generated"
        );

        let neuro = self.neurodynamics(&stimulus)?;
        debug!(
            regions = neuro.regions(),
            elapsed_us = started.elapsed().as_micros(),
            "Neurodynamics integrated"
        );

        let hemo = self.hemodynamics(&neuro)?;
        debug!(
            regions = hemo.regions(),
            elapsed_us = started.elapsed().as_micros(),
            "Hemodynamics integrated"
        );

        let (changes, optical) = self.optics(&hemo)?;
        debug!(
            rows = optical.nrows(),
            samples = optical.ncols(),
            elapsed_us = started.elapsed().as_micros(),
            "Optical response computed"
        );

        Ok(SimulationOutput {
            stimulus,
            neuro,
            hemo,
            changes,
            optical,
        })
    }

    /// Run every stage and inject noise per `config`.
    ///
    /// # Errors
    ///
    /// Stage errors, or noise errors from [`NoiseInjector`].
    pub fn simulate_with_config(
        &self,
        config: &SimulationConfig,
        supplier: Option<&mut dyn TraceSupplier>,
    ) -> SimulationResult<NoisySimulation> {
        let clean = self.simulate()?;

        let Some(spec) = config.noise.clone() else {
            return Ok(NoisySimulation {
                clean,
                optical: None,
                hemoglobin: None,
            });
        };

        let mut rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let mut injector = NoiseInjector::new(spec)?;
        let timestamps = clean.stimulus.timestamps().view();

        let (optical, hemoglobin) = match config.target {
            NoiseTarget::Optical => {
                let noisy = injector.inject(clean.optical.view(), timestamps, supplier, &mut rng)?;
                (noisy, None)
            }
            NoiseTarget::Hemoglobin => {
                let noisy =
                    injector.inject_hemoglobin(&clean.changes, timestamps, supplier, &mut rng)?;
                let signal = compute_optical_response(
                    noisy.changes.delta_q.view(),
                    noisy.changes.delta_h.view(),
                    &self.optics,
                )?;
                let noise = &signal - &clean.optical;
                (NoisySignal { signal, noise }, Some(noisy))
            }
        };

        info!(
            target = ?config.target,
            seeded = config.seed.is_some(),
            "Noise injected"
        );

        Ok(NoisySimulation {
            clean,
            optical: Some(optical),
            hemoglobin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::{peak_amplitude, NoiseKind};
    use crate::params::presets;

    fn two_region_model() -> ForwardModel {
        ForwardModel::new(presets::two_region().unwrap()).unwrap()
    }

    #[test]
    fn test_two_region_scenario() {
        let output = two_region_model().simulate().unwrap();

        assert_eq!(output.stimulus.inputs().dim(), (2, 600));
        assert_eq!(output.stimulus.timestamps().len(), 600);
        assert!((output.stimulus.timestamps()[599] - 59.9).abs() < 1e-9);

        assert_eq!(output.neuro.activity().dim(), (600, 2));
        assert_eq!(output.neuro.activity()[[0, 0]], 0.0);
        assert_eq!(output.neuro.activity()[[0, 1]], 0.0);

        assert_eq!(output.hemo.deoxy().dim(), (2, 600));
        assert_eq!(output.changes.delta_q.dim(), (2, 600));
        assert_eq!(output.optical.dim(), (4, 600));
        assert!(output.optical.iter().all(|v| v.is_finite()));
        assert!(peak_amplitude(&output.optical) > 0.0);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let model = two_region_model();
        let first = model.simulate().unwrap();
        let second = model.simulate().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_presets_run_end_to_end() {
        for name in ["three-region", "five-region"] {
            let model = ForwardModel::new(presets::by_name(name).unwrap()).unwrap();
            let output = model.simulate().unwrap();
            let regions = model.parameters().regions();
            assert_eq!(output.optical.nrows(), 2 * regions);
            assert!(output.optical.iter().all(|v| v.is_finite()), "{name}");
        }
    }

    #[test]
    fn test_stage_methods_compose() {
        let model = two_region_model();
        let stimulus = model.stimulus().unwrap();
        let neuro = model.neurodynamics(&stimulus).unwrap();
        let hemo = model.hemodynamics(&neuro).unwrap();
        let (_, optical) = model.optics(&hemo).unwrap();
        assert_eq!(optical, model.simulate().unwrap().optical);
    }

    #[test]
    fn test_without_noise_config() {
        let result = two_region_model()
            .simulate_with_config(&SimulationConfig::default(), None)
            .unwrap();
        assert!(result.optical.is_none());
        assert!(result.hemoglobin.is_none());
    }

    #[test]
    fn test_seeded_optical_noise() {
        let model = two_region_model();
        let config = SimulationConfig {
            noise: Some(NoiseSpecification::new(vec![NoiseKind::White, NoiseKind::Heart], 10.0)),
            target: NoiseTarget::Optical,
            seed: Some(17),
        };
        let a = model.simulate_with_config(&config, None).unwrap();
        let b = model.simulate_with_config(&config, None).unwrap();
        assert_eq!(a, b);

        let noisy = a.optical.unwrap();
        let ratio = peak_amplitude(&noisy.noise) / peak_amplitude(&a.clean.optical);
        assert!((ratio - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_hemoglobin_noise_target() {
        let model = two_region_model();
        let config = SimulationConfig {
            noise: Some(NoiseSpecification::new(vec![NoiseKind::Breathing], 5.0)),
            target: NoiseTarget::Hemoglobin,
            seed: Some(3),
        };
        let result = model.simulate_with_config(&config, None).unwrap();
        let hemoglobin = result.hemoglobin.unwrap();
        let optical = result.optical.unwrap();

        assert_eq!(hemoglobin.changes.delta_q.dim(), (2, 600));
        assert_eq!(optical.signal.dim(), (4, 600));
        let restored = &optical.signal - &optical.noise;
        for (a, b) in restored.iter().zip(result.clean.optical.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_config_serde() {
        let json = r#"{"noise":{"sources":["white","heart"],"percent_error":5.0},"seed":1}"#;
        let config: SimulationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.target, NoiseTarget::Optical);
        let spec = config.noise.unwrap();
        assert_eq!(spec.sources, vec![NoiseKind::White, NoiseKind::Heart]);
        assert_eq!(spec.white_std, 1.0);
    }
}
