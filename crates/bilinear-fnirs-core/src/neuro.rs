//! Neurodynamic Integrator
//!
//! Bilinear state-space model of regional neural activity:
//!
//! ```text
//! dZ/dt = J(t)·Z(t) + C·u(t)
//! J(t)  = A′ + Σₖ uₖ(t)·B[:, :, k]
//! ```
//!
//! `A′` is `A` after the self-inhibition transform: every diagonal entry
//! `aᵢᵢ` is reduced by `exp(aᵢᵢ)/2 + aᵢᵢ`, which leaves `-exp(aᵢᵢ)/2 < 0`
//! on the diagonal. Each isolated region therefore relaxes back to rest
//! whatever sign its raw self-connection had. `A` itself is never modified;
//! `A′` and `J(t)` are fresh values.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{require_positive, SimulationError, SimulationResult, Stage};
use crate::stimulus::StimulusSignal;

/// Tolerance when counting Euler sub-steps between two timestamps
const SUBSTEP_EPSILON: f64 = 1e-9;

/// Neural activity over time.
#[derive(Clone, Debug, PartialEq)]
pub struct NeurodynamicState {
    /// Activity, one row per timestamp and one column per region
    z: Array2<f64>,
    /// Time of each row (s)
    timestamps: Array1<f64>,
}

impl NeurodynamicState {
    /// Activity matrix (time × regions)
    #[must_use]
    pub fn activity(&self) -> &Array2<f64> {
        &self.z
    }

    /// Time of each row (s)
    #[must_use]
    pub fn timestamps(&self) -> &Array1<f64> {
        &self.timestamps
    }

    /// Number of regions
    #[must_use]
    pub fn regions(&self) -> usize {
        self.z.ncols()
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.z.nrows()
    }

    /// True if no samples were produced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Give up ownership of the activity matrix
    #[must_use]
    pub fn into_activity(self) -> Array2<f64> {
        self.z
    }
}

/// Self-inhibited connectivity `A′`.
#[must_use]
pub fn self_inhibited(a: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut a_prime = a.to_owned();
    for (i, &self_connection) in a.diag().iter().enumerate() {
        a_prime[[i, i]] -= self_connection.exp() / 2.0 + self_connection;
    }
    a_prime
}

/// Effective connectivity `J = A′ + Σₖ uₖ·B[:, :, k]` for one input sample.
#[must_use]
pub fn effective_connectivity(
    a_prime: ArrayView2<'_, f64>,
    b: ArrayView3<'_, f64>,
    u: ArrayView1<'_, f64>,
) -> Array2<f64> {
    let mut j = a_prime.to_owned();
    for (k, &uk) in u.iter().enumerate() {
        if uk != 0.0 {
            j.scaled_add(uk, &b.index_axis(Axis(2), k));
        }
    }
    j
}

/// Right-hand side `J·z + C·u` of the state equation.
#[must_use]
pub fn state_derivative(
    a_prime: ArrayView2<'_, f64>,
    b: ArrayView3<'_, f64>,
    c: ArrayView2<'_, f64>,
    z: ArrayView1<'_, f64>,
    u: ArrayView1<'_, f64>,
) -> Array1<f64> {
    effective_connectivity(a_prime, b, u).dot(&z) + c.dot(&u)
}

fn check_shapes(
    a: ArrayView2<'_, f64>,
    b: ArrayView3<'_, f64>,
    c: ArrayView2<'_, f64>,
    stimulus: &StimulusSignal,
) -> SimulationResult<usize> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(SimulationError::shape(
            "connectivity A",
            format!("{n}×{n}"),
            format!("{n}×{}", a.ncols()),
        ));
    }
    let m = stimulus.channels();
    if c.dim() != (n, m) {
        return Err(SimulationError::shape(
            "input effect C",
            format!("{n}×{m}"),
            format!("{}×{}", c.nrows(), c.ncols()),
        ));
    }
    let (b0, b1, b2) = b.dim();
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
    if stimulus.timestamps().len() != stimulus.len() {
        return Err(SimulationError::shape(
            "stimulus timestamps",
            stimulus.len(),
            stimulus.timestamps().len(),
        ));
    }
    Ok(n)
}

/// Integrate the bilinear model over the stimulus time axis.
///
/// Row `k` of the result is the state at `stimulus.timestamps()[k]`, and row
/// 0 is the resting state (all zeros). Each interval between timestamps is
/// covered by the smallest number of equal explicit Euler sub-steps no longer
/// than `step`; every sub-step rebuilds `J` from the input sample active at
/// its start time (floor alignment at the stimulus' native rate).
///
/// # Errors
///
/// - `ShapeMismatch` if A, B, C and the stimulus channel count disagree.
/// - `InvalidConfig` if `step` is not positive.
/// - `NumericalDegeneracy` if the state stops being finite.
pub fn integrate(
    a: ArrayView2<'_, f64>,
    b: ArrayView3<'_, f64>,
    c: ArrayView2<'_, f64>,
    stimulus: &StimulusSignal,
    step: f64,
) -> SimulationResult<NeurodynamicState> {
    let n = check_shapes(a, b, c, stimulus)?;
    integrate_from(Array1::zeros(n), a, b, c, stimulus, step)
}

fn integrate_from(
    initial: Array1<f64>,
    a: ArrayView2<'_, f64>,
    b: ArrayView3<'_, f64>,
    c: ArrayView2<'_, f64>,
    stimulus: &StimulusSignal,
    step: f64,
) -> SimulationResult<NeurodynamicState> {
    require_positive("step", step)?;

    let samples = stimulus.len();
    let timestamps = stimulus.timestamps().clone();
    let mut z = Array2::zeros((samples, initial.len()));
    if samples == 0 {
        return Ok(NeurodynamicState { z, timestamps });
    }

    let a_prime = self_inhibited(a);
    let mut state = initial;
    z.row_mut(0).assign(&state);

    for k in 1..samples {
        let t0 = timestamps[k - 1];
        let span = timestamps[k] - t0;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let substeps = ((span / step) - SUBSTEP_EPSILON).ceil().max(1.0) as usize;
        let h = span / substeps as f64;

        for i in 0..substeps {
            let t = t0 + i as f64 * h;
            let index = stimulus.sample_index(t).unwrap_or(0);
            let u = stimulus.inputs().column(index);
            let dz = state_derivative(a_prime.view(), b, c, state.view(), u);
            state.scaled_add(h, &dz);
        }

        if let Some(region) = state.iter().position(|v| !v.is_finite()) {
            return Err(SimulationError::NumericalDegeneracy {
                stage: Stage::Neurodynamics,
                region,
                step: k,
                reason: format!("z = {}", state[region]),
            });
        }

        z.row_mut(k).assign(&state);
    }

    tracing::debug!(
        regions = z.ncols(),
        samples,
        step,
        "Integrated neurodynamics"
    );

    Ok(NeurodynamicState { z, timestamps })
}
