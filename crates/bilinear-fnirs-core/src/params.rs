//! Simulation parameters
//!
//! [`SimulationParameters`] is the immutable bundle every stage reads from:
//! connectivity `A` (n×n), modulation `B` (n×n×m), input effect `C` (n×m),
//! physiological deviations `P` (4×k), sampling frequency, integration step
//! and stimulus protocol.

use ndarray::{array, s, Array2, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{require_positive, SimulationError, SimulationResult};
use crate::stimulus::StimulusProtocol;

/// Rows of the physiological deviation matrix: p_K, p_γ, p_τ, p_τv
pub const PHYSIOLOGY_ROWS: usize = 4;

/// Immutable parameter bundle for one forward simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationParameters {
    connectivity: Array2<f64>,
    modulation: Array3<f64>,
    input_effect: Array2<f64>,
    physiology: Array2<f64>,
    frequency: f64,
    #[serde(default)]
    step: Option<f64>,
    protocol: StimulusProtocol,
}

impl SimulationParameters {
    /// Assemble and validate a parameter bundle.
    ///
    /// The integration step defaults to `1 / frequency`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` or `InvalidConfig` as described in
    /// [`Self::validate`].
    pub fn new(
        connectivity: Array2<f64>,
        modulation: Array3<f64>,
        input_effect: Array2<f64>,
        physiology: Array2<f64>,
        frequency: f64,
        protocol: StimulusProtocol,
    ) -> SimulationResult<Self> {
        let params = Self {
            connectivity,
            modulation,
            input_effect,
            physiology,
            frequency,
            step: None,
            protocol,
        };
        params.validate()?;
        Ok(params)
    }

    /// Override the integration step.
    ///
    /// # Errors
    ///
    /// Fails if `step` is not finite and positive.
    pub fn with_step(mut self, step: f64) -> SimulationResult<Self> {
        require_positive("step", step)?;
        self.step = Some(step);
        Ok(self)
    }

    /// Check every shape and domain invariant.
    ///
    /// Deserialized parameters bypass [`Self::new`], so the pipeline calls
    /// this again before running.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if A is not square, B is not n×n×m, C is not n×m,
    ///   P does not have 4 rows and at least one column, or a per-region
    ///   protocol does not list m timings.
    /// - `InvalidConfig` for a non-positive frequency or step, or any
    ///   non-finite matrix entry.
    pub fn validate(&self) -> SimulationResult<()> {
        let (rows, cols) = self.connectivity.dim();
        if rows != cols || rows == 0 {
            return Err(SimulationError::shape(
                "connectivity A",
                "non-empty square matrix",
                format!("{rows}×{cols}"),
            ));
        }
        let n = rows;

        let (c_rows, m) = self.input_effect.dim();
        if c_rows != n {
            return Err(SimulationError::shape("input effect C rows", n, c_rows));
        }

        let (b0, b1, b2) = self.modulation.dim();
        if (b0, b1) != (n, n) {
            return Err(SimulationError::shape(
                "modulation B regions",
                format!("{n}×{n}"),
                format!("{b0}×{b1}"),
            ));
        }
        if b2 != m {
            return Err(SimulationError::shape("modulation B input slices", m, b2));
        }

        let (p_rows, p_cols) = self.physiology.dim();
        if p_rows != PHYSIOLOGY_ROWS || p_cols == 0 {
            return Err(SimulationError::shape(
                "physiology P",
                format!("{PHYSIOLOGY_ROWS}×k (k ≥ 1)"),
                format!("{p_rows}×{p_cols}"),
            ));
        }

        require_positive("frequency", self.frequency)?;
        if let Some(step) = self.step {
            require_positive("step", step)?;
        }

        let finite = self.connectivity.iter().all(|v| v.is_finite())
            && self.modulation.iter().all(|v| v.is_finite())
            && self.input_effect.iter().all(|v| v.is_finite())
            && self.physiology.iter().all(|v| v.is_finite());
        if !finite {
            return Err(SimulationError::config("parameters", "matrices must be finite"));
        }

        if let StimulusProtocol::PerRegion { action_s, .. } = &self.protocol {
            if action_s.len() != m {
                return Err(SimulationError::shape(
                    "per-region protocol channels",
                    m,
                    action_s.len(),
                ));
            }
        }

        Ok(())
    }

    /// Number of regions n
    #[must_use]
    pub fn regions(&self) -> usize {
        self.connectivity.nrows()
    }

    /// Number of stimulus input channels m
    #[must_use]
    pub fn inputs(&self) -> usize {
        self.input_effect.ncols()
    }

    /// Connectivity matrix A
    #[must_use]
    pub fn connectivity(&self) -> ArrayView2<'_, f64> {
        self.connectivity.view()
    }

    /// Modulation tensor B
    #[must_use]
    pub fn modulation(&self) -> ArrayView3<'_, f64> {
        self.modulation.view()
    }

    /// Input effect matrix C
    #[must_use]
    pub fn input_effect(&self) -> ArrayView2<'_, f64> {
        self.input_effect.view()
    }

    /// Physiological deviation matrix P
    #[must_use]
    pub fn physiology(&self) -> ArrayView2<'_, f64> {
        self.physiology.view()
    }

    /// Sampling frequency (Hz)
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Integration step (s)
    #[must_use]
    pub fn step(&self) -> f64 {
        self.step.unwrap_or(1.0 / self.frequency)
    }

    /// Stimulus timing
    #[must_use]
    pub fn protocol(&self) -> &StimulusProtocol {
        &self.protocol
    }
}

/// Parameter sets used in the reference experiments.
pub mod presets {
    use super::*;

    /// Region-specific balloon deviations shared by all reference sets
    fn reference_physiology() -> Array2<f64> {
        array![
            [0.0775, -0.0087],
            [-0.1066, 0.0299],
            [0.0440, -0.0129],
            [0.8043, -0.7577],
        ]
    }

    /// Stack modulation slices into an n×n×m tensor, one slice per input.
    fn stack(slices: &[Array2<f64>]) -> Array3<f64> {
        let n = slices.first().map_or(0, Array2::nrows);
        let mut b = Array3::zeros((n, n, slices.len()));
        for (i, slice) in slices.iter().enumerate() {
            b.slice_mut(s![.., .., i]).assign(slice);
        }
        b
    }

    /// Two regions at 10 Hz, 5 s task / 25 s rest, two cycles.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in values; the `Result` comes from
    /// [`SimulationParameters::new`].
    pub fn two_region() -> SimulationResult<SimulationParameters> {
        let a = array![[-0.16, -0.49], [-0.02, -0.33]];
        let b2 = array![[-0.02, -1.0], [0.0, -1.31]];
        let c = array![[0.08, 0.0], [0.06, 0.0]];

        SimulationParameters::new(
            a,
            stack(&[Array2::zeros((2, 2)), b2]),
            c,
            reference_physiology(),
            10.0,
            StimulusProtocol::Uniform { action_s: 5.0, rest_s: 25.0, cycles: 2 },
        )
    }

    /// Three regions at 10.84 Hz with a per-region protocol and one input
    /// per region.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in values.
    pub fn three_region() -> SimulationResult<SimulationParameters> {
        let a = array![
            [-0.16, -0.49, -0.25],
            [-0.02, -0.33, -0.15],
            [-0.1, -0.2, -0.3],
        ];
        let b2 = array![
            [-0.02, -1.0, -0.5],
            [0.0, -1.31, -0.6],
            [0.1, -0.7, -1.2],
        ];
        let c = array![[0.08, 0.0, 0.0], [0.0, 0.06, 0.0], [0.0, 0.0, 0.07]];

        SimulationParameters::new(
            a,
            stack(&[Array2::zeros((3, 3)), b2, Array2::zeros((3, 3))]),
            c,
            reference_physiology(),
            10.84,
            StimulusProtocol::PerRegion {
                action_s: vec![5.0; 3],
                rest_s: vec![25.0; 3],
                cycles: vec![5; 3],
            },
        )
    }

    /// Five regions at 10 Hz, 10 s task / 50 s rest, three cycles, driven
    /// through the first input only.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in values.
    pub fn five_region() -> SimulationResult<SimulationParameters> {
        let a = array![
            [-0.16, -0.49, -0.25, -0.2, -0.15],
            [-0.02, -0.33, -0.15, -0.1, -0.05],
            [-0.1, -0.2, -0.3, -0.25, -0.2],
            [-0.05, -0.1, -0.15, -0.2, -0.25],
            [-0.1, -0.05, -0.1, -0.15, -0.2],
        ];
        let b2 = array![
            [-0.02, -1.0, -0.5, -0.4, -0.3],
            [0.0, -1.31, -0.6, -0.5, -0.4],
            [0.1, -0.7, -1.2, -1.1, -1.0],
            [0.05, -0.6, -1.1, -1.0, -0.9],
            [0.05, -0.5, -1.0, -0.9, -0.8],
        ];
        let mut c = Array2::zeros((5, 5));
        c.column_mut(0).assign(&array![0.08, 0.06, 0.05, 0.07, 0.01]);

        let zero = Array2::zeros((5, 5));
        SimulationParameters::new(
            a,
            stack(&[zero.clone(), b2, zero.clone(), zero.clone(), zero]),
            c,
            reference_physiology(),
            10.0,
            StimulusProtocol::Uniform { action_s: 10.0, rest_s: 50.0, cycles: 3 },
        )
    }

    /// Look a preset up by name (`two-region`, `three-region`, `five-region`).
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an unknown name.
    pub fn by_name(name: &str) -> SimulationResult<SimulationParameters> {
        match name {
            "two-region" => two_region(),
            "three-region" => three_region(),
            "five-region" => five_region(),
            other => Err(SimulationError::config(
                "preset",
                format!("unknown preset '{other}'"),
            )),
        }
    }
}
