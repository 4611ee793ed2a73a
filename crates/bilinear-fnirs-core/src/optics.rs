//! Optical Forward Model
//!
//! Converts normalized balloon-model outputs into concentration changes and
//! then into optical density on two channels per region:
//!
//! ```text
//! Δp = (p - 1)·P₀
//! Δq = (q - 1)·P₀·(1 - ρ)
//! Δh = Δp - Δq
//!
//! [Y_deoxy]   [F₀₀ F₀₁] [Δq]
//! [Y_oxy  ] = [F₁₀ F₁₁] [Δh]
//! ```
//!
//! Output rows are interleaved: row `2r` is the deoxy channel of region `r`,
//! row `2r+1` its oxy channel.

use ndarray::{Array2, ArrayView2, Axis};

use crate::constants::OpticalConstants;
use crate::error::{SimulationError, SimulationResult};

/// Determinants below this are treated as singular
const SINGULARITY_EPSILON: f64 = 1e-12;

/// Hemoglobin concentration changes in µM, each region × time
#[derive(Clone, Debug, PartialEq)]
pub struct HemoglobinChanges {
    /// Δq: deoxyhemoglobin change
    pub delta_q: Array2<f64>,
    /// Δp: total hemoglobin change
    pub delta_p: Array2<f64>,
    /// Δh: oxyhemoglobin change (Δp - Δq)
    pub delta_h: Array2<f64>,
}

impl HemoglobinChanges {
    /// Number of regions
    #[must_use]
    pub fn regions(&self) -> usize {
        self.delta_q.nrows()
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.delta_q.ncols()
    }

    /// True if there are no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scale normalized q and p into concentration changes.
///
/// # Errors
///
/// `ShapeMismatch` if `q` and `p` differ in shape.
pub fn hemoglobin_changes(
    q: ArrayView2<'_, f64>,
    p: ArrayView2<'_, f64>,
    constants: &OpticalConstants,
) -> SimulationResult<HemoglobinChanges> {
    if q.dim() != p.dim() {
        return Err(SimulationError::shape(
            "q and p",
            format!("{:?}", q.dim()),
            format!("{:?}", p.dim()),
        ));
    }

    let delta_p = p.mapv(|v| (v - 1.0) * constants.baseline_total_hb);
    let delta_q = q.mapv(|v| (v - 1.0) * constants.baseline_deoxy_hb());
    let delta_h = &delta_p - &delta_q;

    Ok(HemoglobinChanges { delta_q, delta_p, delta_h })
}

/// Map Δq and Δh (region × time) to optical density (2·regions × time).
///
/// # Errors
///
/// `ShapeMismatch` if `delta_q` and `delta_h` differ in shape.
pub fn compute_optical_response(
    delta_q: ArrayView2<'_, f64>,
    delta_h: ArrayView2<'_, f64>,
    constants: &OpticalConstants,
) -> SimulationResult<Array2<f64>> {
    if delta_q.dim() != delta_h.dim() {
        return Err(SimulationError::shape(
            "Δq and Δh",
            format!("{:?}", delta_q.dim()),
            format!("{:?}", delta_h.dim()),
        ));
    }

    let (regions, samples) = delta_q.dim();
    let f = &constants.absorption;
    let mut y = Array2::zeros((2 * regions, samples));

    for r in 0..regions {
        let dq = delta_q.row(r);
        let dh = delta_h.row(r);
        for t in 0..samples {
            y[[2 * r, t]] = f[0][0] * dq[t] + f[0][1] * dh[t];
            y[[2 * r + 1, t]] = f[1][0] * dq[t] + f[1][1] * dh[t];
        }
    }

    tracing::trace!(regions, samples, "Computed optical response");

    Ok(y)
}

/// Invert the optical map, recovering `(Δq, Δh)` from interleaved optical
/// density.
///
/// # Errors
///
/// - `ShapeMismatch` if `y` has an odd row count.
/// - `SingularAbsorption` if the absorption matrix has no inverse.
pub fn recover_hemoglobin(
    y: ArrayView2<'_, f64>,
    constants: &OpticalConstants,
) -> SimulationResult<(Array2<f64>, Array2<f64>)> {
    let rows = y.nrows();
    if rows % 2 != 0 {
        return Err(SimulationError::shape("optical rows", "an even count", rows));
    }

    let det = constants.determinant();
    if !det.is_finite() || det.abs() < SINGULARITY_EPSILON {
        return Err(SimulationError::SingularAbsorption { determinant: det });
    }

    let f = &constants.absorption;
    let inv = [
        [f[1][1] / det, -f[0][1] / det],
        [-f[1][0] / det, f[0][0] / det],
    ];

    let regions = rows / 2;
    let samples = y.ncols();
    let mut delta_q = Array2::zeros((regions, samples));
    let mut delta_h = Array2::zeros((regions, samples));

    for (r, pair) in y.axis_chunks_iter(Axis(0), 2).enumerate() {
        for t in 0..samples {
            let deoxy = pair[[0, t]];
            let oxy = pair[[1, t]];
            delta_q[[r, t]] = inv[0][0] * deoxy + inv[0][1] * oxy;
            delta_h[[r, t]] = inv[1][0] * deoxy + inv[1][1] * oxy;
        }
    }

    Ok((delta_q, delta_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_baseline_gives_zero_changes() {
        let ones = Array2::from_elem((2, 10), 1.0);
        let changes =
            hemoglobin_changes(ones.view(), ones.view(), &OpticalConstants::default()).unwrap();
        assert!(changes.delta_q.iter().all(|&v| v == 0.0));
        assert!(changes.delta_h.iter().all(|&v| v == 0.0));
        assert_eq!(changes.regions(), 2);
        assert_eq!(changes.len(), 10);
    }

    #[test]
    fn test_concentration_scaling() {
        let q = array![[0.9]];
        let p = array![[1.1]];
        let changes = hemoglobin_changes(q.view(), p.view(), &OpticalConstants::default()).unwrap();
        assert!((changes.delta_p[[0, 0]] - 7.1).abs() < 1e-9);
        assert!((changes.delta_q[[0, 0]] + 2.485).abs() < 1e-9);
        assert!((changes.delta_h[[0, 0]] - 9.585).abs() < 1e-9);
    }

    #[test]
    fn test_rows_are_interleaved() {
        let constants = OpticalConstants::default();
        let dq = array![[1.0], [0.0]];
        let dh = array![[0.0], [1.0]];
        let y = compute_optical_response(dq.view(), dh.view(), &constants).unwrap();
        let f = constants.absorption;
        assert_eq!(y.dim(), (4, 1));
        assert_eq!(y[[0, 0]], f[0][0]);
        assert_eq!(y[[1, 0]], f[1][0]);
        assert_eq!(y[[2, 0]], f[0][1]);
        assert_eq!(y[[3, 0]], f[1][1]);
    }

    #[test]
    fn test_inverse_recovers_changes() {
        let constants = OpticalConstants::default();
        let dq = array![[-1.2, 0.3, 0.0], [0.5, -0.7, 2.0]];
        let dh = array![[3.4, -0.1, 0.0], [1.5, 0.2, -4.0]];
        let y = compute_optical_response(dq.view(), dh.view(), &constants).unwrap();
        let (rq, rh) = recover_hemoglobin(y.view(), &constants).unwrap();
        for (a, b) in rq.iter().zip(dq.iter()).chain(rh.iter().zip(dh.iter())) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_singular_absorption() {
        let mut constants = OpticalConstants::default();
        constants.absorption = [[1.0, 2.0], [2.0, 4.0]];
        let y = Array2::zeros((2, 3));
        assert!(matches!(
            recover_hemoglobin(y.view(), &constants),
            Err(SimulationError::SingularAbsorption { .. })
        ));
    }

    #[test]
    fn test_shape_errors() {
        let constants = OpticalConstants::default();
        let a = Array2::zeros((2, 3));
        let b = Array2::zeros((2, 4));
        assert!(compute_optical_response(a.view(), b.view(), &constants).is_err());
        assert!(recover_hemoglobin(Array2::zeros((3, 4)).view(), &constants).is_err());
    }
}
