//! Hemodynamic Integrator (balloon model)
//!
//! Maps neural activity to blood flow, volume and oxygenation through five
//! coupled state variables per region:
//!
//! | Symbol | Field     | Meaning                          | Rest |
//! |--------|-----------|----------------------------------|------|
//! | S      | `signal`  | vasodilatory signal              | 0    |
//! | f_in   | `inflow`  | normalized inflow                | 1    |
//! | V      | `volume`  | normalized blood volume          | 1    |
//! | q      | `deoxy`   | normalized deoxyhemoglobin       | 1    |
//! | p      | `total`   | normalized total hemoglobin      | 1    |
//!
//! The equations divide by `f_in`, `V` and `q`. With 0/1 stimulus amplitudes
//! and literature-range deviations these stay well above zero; if a caller
//! pushes them out of that regime the integrator stops with
//! [`SimulationError::NumericalDegeneracy`] instead of clamping.

use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::constants::BalloonConstants;
use crate::error::{require_positive, SimulationError, SimulationResult, Stage};
use crate::params::PHYSIOLOGY_ROWS;

/// Smallest admissible value of a state variable used as a denominator
pub const DEGENERACY_EPSILON: f64 = 1e-12;

/// Instantaneous balloon-model state of one region
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalloonState {
    /// Vasodilatory signal S
    pub signal: f64,
    /// Normalized inflow f_in
    pub inflow: f64,
    /// Normalized blood volume V
    pub volume: f64,
    /// Normalized deoxyhemoglobin q
    pub deoxy: f64,
    /// Normalized total hemoglobin p
    pub total: f64,
}

impl BalloonState {
    /// Resting baseline: S = 0, everything else exp(0) = 1
    pub const REST: Self = Self {
        signal: 0.0,
        inflow: 1.0,
        volume: 1.0,
        deoxy: 1.0,
        total: 1.0,
    };

    /// Explicit Euler update `x + h·ẋ`
    #[must_use]
    pub fn advance(&self, rates: &Self, h: f64) -> Self {
        Self {
            signal: self.signal + h * rates.signal,
            inflow: self.inflow + h * rates.inflow,
            volume: self.volume + h * rates.volume,
            deoxy: self.deoxy + h * rates.deoxy,
            total: self.total + h * rates.total,
        }
    }

    /// First variable that left the admissible regime, if any
    fn degeneracy(&self) -> Option<String> {
        let denominators = [("f_in", self.inflow), ("V", self.volume), ("q", self.deoxy)];
        for (name, value) in denominators {
            if !value.is_finite() || value <= DEGENERACY_EPSILON {
                return Some(format!("{name} = {value}"));
            }
        }
        for (name, value) in [("S", self.signal), ("p", self.total)] {
            if !value.is_finite() {
                return Some(format!("{name} = {value}"));
            }
        }
        None
    }
}

impl Default for BalloonState {
    fn default() -> Self {
        Self::REST
    }
}

/// Balloon constants of a single region after log-normal scaling
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionConstants {
    /// K = κ₀·exp(p_K)
    pub signal_decay: f64,
    /// Γ = γ₀·exp(p_γ)
    pub autoregulation: f64,
    /// τ = τ₀·exp(p_τ)
    pub transit_time: f64,
    /// τv = τv₀·exp(p_τv)
    pub viscoelastic_time: f64,
    /// φ (shared)
    pub stiffness: f64,
    /// ρ (shared)
    pub resting_extraction: f64,
}

impl RegionConstants {
    /// Apply log-scale deviations `[p_K, p_γ, p_τ, p_τv]` to the baseline.
    #[must_use]
    pub fn scaled(base: &BalloonConstants, deviations: [f64; 4]) -> Self {
        let [p_k, p_gamma, p_tau, p_tau_v] = deviations;
        Self {
            signal_decay: base.signal_decay * p_k.exp(),
            autoregulation: base.autoregulation * p_gamma.exp(),
            transit_time: base.transit_time * p_tau.exp(),
            viscoelastic_time: base.viscoelastic_time * p_tau_v.exp(),
            stiffness: base.stiffness,
            resting_extraction: base.resting_extraction,
        }
    }

    /// Volume-driven outflow f_v = V^(1/φ)
    #[inline]
    #[must_use]
    pub fn volume_outflow(&self, volume: f64) -> f64 {
        volume.powf(1.0 / self.stiffness)
    }

    /// Oxygen extraction E(f_in) = (1 - (1-ρ)^(1/f_in)) / ρ
    #[inline]
    #[must_use]
    pub fn extraction(&self, inflow: f64) -> f64 {
        let rho = self.resting_extraction;
        (1.0 - (1.0 - rho).powf(1.0 / inflow)) / rho
    }

    /// Volume rate and total outflow `(V̇, f_out)` for a state.
    #[inline]
    #[must_use]
    pub fn volume_rate_and_outflow(&self, state: &BalloonState) -> (f64, f64) {
        let f_v = self.volume_outflow(state.volume);
        let volume_rate =
            (state.inflow - f_v) / (self.transit_time * self.viscoelastic_time * state.volume);
        (volume_rate, f_v + self.viscoelastic_time * volume_rate)
    }

    /// Time derivatives of all five variables under neural drive `neural`.
    #[must_use]
    pub fn rates(&self, state: &BalloonState, neural: f64) -> BalloonState {
        let (volume_rate, f_out) = self.volume_rate_and_outflow(state);
        let tau = self.transit_time;

        BalloonState {
            signal: neural
                - self.signal_decay * state.signal
                - self.autoregulation * (state.inflow - 1.0),
            inflow: state.signal,
            volume: volume_rate,
            deoxy: (state.inflow * self.extraction(state.inflow) - f_out * state.deoxy)
                / (state.volume * tau * state.deoxy),
            total: (state.inflow - f_out * state.total / state.volume) / tau,
        }
    }
}

/// Per-region balloon constants.
///
/// Region 0 is the reference and keeps the baseline constants. Region
/// `r ≥ 1` takes its deviations from column `min(r-1, k-1)` of the 4×k
/// physiological matrix, so a single column applies to every non-reference
/// region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionalBalloon {
    regions: Vec<RegionConstants>,
}

impl RegionalBalloon {
    /// Derive constants for `regions` regions.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `physiology` is not 4×k with k ≥ 1 while more than
    /// one region needs deviations.
    pub fn derive(
        base: &BalloonConstants,
        physiology: ArrayView2<'_, f64>,
        regions: usize,
    ) -> SimulationResult<Self> {
        let (rows, cols) = physiology.dim();
        if regions > 1 && (rows != PHYSIOLOGY_ROWS || cols == 0) {
            return Err(SimulationError::shape(
                "physiology P",
                format!("{PHYSIOLOGY_ROWS}×k (k ≥ 1)"),
                format!("{rows}×{cols}"),
            ));
        }

        let regions = (0..regions)
            .map(|r| {
                if r == 0 {
                    return RegionConstants::scaled(base, [0.0; 4]);
                }
                let column = physiology.column((r - 1).min(cols - 1));
                RegionConstants::scaled(base, [column[0], column[1], column[2], column[3]])
            })
            .collect();

        Ok(Self { regions })
    }

    /// Constants of region `r`
    #[must_use]
    pub fn region(&self, r: usize) -> Option<&RegionConstants> {
        self.regions.get(r)
    }

    /// Number of regions
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if there are no regions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Trajectories of the five balloon variables, each region × time.
#[derive(Clone, Debug, PartialEq)]
pub struct HemodynamicState {
    signal: Array2<f64>,
    inflow: Array2<f64>,
    volume: Array2<f64>,
    deoxy: Array2<f64>,
    total: Array2<f64>,
}

impl HemodynamicState {
    /// Vasodilatory signal S
    #[must_use]
    pub fn signal(&self) -> &Array2<f64> {
        &self.signal
    }

    /// Normalized inflow f_in
    #[must_use]
    pub fn inflow(&self) -> &Array2<f64> {
        &self.inflow
    }

    /// Normalized blood volume V
    #[must_use]
    pub fn volume(&self) -> &Array2<f64> {
        &self.volume
    }

    /// Normalized deoxyhemoglobin q
    #[must_use]
    pub fn deoxy(&self) -> &Array2<f64> {
        &self.deoxy
    }

    /// Normalized total hemoglobin p
    #[must_use]
    pub fn total(&self) -> &Array2<f64> {
        &self.total
    }

    /// Number of regions
    #[must_use]
    pub fn regions(&self) -> usize {
        self.deoxy.nrows()
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.deoxy.ncols()
    }

    /// True if no samples were produced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// State of region `r` at sample `t`
    #[must_use]
    pub fn at(&self, r: usize, t: usize) -> BalloonState {
        BalloonState {
            signal: self.signal[[r, t]],
            inflow: self.inflow[[r, t]],
            volume: self.volume[[r, t]],
            deoxy: self.deoxy[[r, t]],
            total: self.total[[r, t]],
        }
    }

    /// Total venous outflow f_out at every sample (region × time).
    #[must_use]
    pub fn outflow(&self, balloon: &RegionalBalloon) -> Array2<f64> {
        Array2::from_shape_fn(self.deoxy.dim(), |(r, t)| {
            balloon
                .region(r)
                .map_or(f64::NAN, |c| c.volume_rate_and_outflow(&self.at(r, t)).1)
        })
    }
}

/// Integrate the balloon model with explicit Euler.
///
/// `neural` is the neurodynamic activity, time × regions. Sample 0 of every
/// output is [`BalloonState::REST`]; sample `t` is computed from sample
/// `t-1` and `neural[t-1]`.
///
/// # Errors
///
/// - `ShapeMismatch` if `neural` has a different region count than `balloon`.
/// - `InvalidConfig` if `step` is not positive.
/// - `NumericalDegeneracy` if f_in, V or q reaches zero or any variable
///   stops being finite.
pub fn integrate(
    neural: ArrayView2<'_, f64>,
    balloon: &RegionalBalloon,
    step: f64,
) -> SimulationResult<HemodynamicState> {
    require_positive("step", step)?;

    let (samples, regions) = neural.dim();
    if regions != balloon.len() {
        return Err(SimulationError::shape("hemodynamic regions", balloon.len(), regions));
    }

    let mut out = HemodynamicState {
        signal: Array2::zeros((regions, samples)),
        inflow: Array2::zeros((regions, samples)),
        volume: Array2::zeros((regions, samples)),
        deoxy: Array2::zeros((regions, samples)),
        total: Array2::zeros((regions, samples)),
    };

    for (r, constants) in balloon.regions.iter().enumerate() {
        let mut state = BalloonState::REST;
        for t in 0..samples {
            if t > 0 {
                let rates = constants.rates(&state, neural[[t - 1, r]]);
                state = state.advance(&rates, step);
                if let Some(reason) = state.degeneracy() {
                    return Err(SimulationError::NumericalDegeneracy {
                        stage: Stage::Hemodynamics,
                        region: r,
                        step: t,
                        reason,
                    });
                }
            }
            out.signal[[r, t]] = state.signal;
            out.inflow[[r, t]] = state.inflow;
            out.volume[[r, t]] = state.volume;
            out.deoxy[[r, t]] = state.deoxy;
            out.total[[r, t]] = state.total;
        }
    }

    tracing::debug!(regions, samples, step, "Integrated balloon model");

    Ok(out)
}

/// Peak absolute deviation of q and p from rest, per region.
#[must_use]
pub fn peak_deviation(state: &HemodynamicState) -> Array1<f64> {
    Array1::from_shape_fn(state.regions(), |r| {
        let q = state.deoxy.row(r).fold(0.0f64, |m, v| m.max((v - 1.0).abs()));
        let p = state.total.row(r).fold(0.0f64, |m, v| m.max((v - 1.0).abs()));
        q.max(p)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_region_balloon() -> RegionalBalloon {
        let physiology = array![
            [0.0775, -0.0087],
            [-0.1066, 0.0299],
            [0.0440, -0.0129],
            [0.8043, -0.7577],
        ];
        RegionalBalloon::derive(&BalloonConstants::default(), physiology.view(), 2).unwrap()
    }

    #[test]
    fn test_reference_region_uses_baseline() {
        let balloon = two_region_balloon();
        let reference = balloon.region(0).unwrap();
        assert_eq!(reference.signal_decay, 0.64);
        assert_eq!(reference.autoregulation, 0.32);
        assert_eq!(reference.transit_time, 2.0);
        assert_eq!(reference.viscoelastic_time, 2.0);

        let second = balloon.region(1).unwrap();
        assert!((second.signal_decay - 0.64 * 0.0775f64.exp()).abs() < 1e-15);
        assert!((second.viscoelastic_time - 2.0 * 0.8043f64.exp()).abs() < 1e-15);
    }

    #[test]
    fn test_single_column_broadcasts() {
        let physiology = array![[0.1], [0.2], [0.3], [0.4]];
        let balloon =
            RegionalBalloon::derive(&BalloonConstants::default(), physiology.view(), 4).unwrap();
        assert_eq!(balloon.region(1), balloon.region(3));
        assert_ne!(balloon.region(0), balloon.region(1));
    }

    #[test]
    fn test_rest_is_fixed_point() {
        let balloon = two_region_balloon();
        for r in 0..2 {
            let rates = balloon.region(r).unwrap().rates(&BalloonState::REST, 0.0);
            assert_eq!(rates.signal, 0.0);
            assert_eq!(rates.inflow, 0.0);
            assert!(rates.volume.abs() < 1e-15);
            assert!(rates.deoxy.abs() < 1e-15);
            assert!(rates.total.abs() < 1e-15);
        }
    }

    #[test]
    fn test_initial_sample_is_rest() {
        let neural = Array2::from_elem((50, 2), 0.3);
        let state = integrate(neural.view(), &two_region_balloon(), 0.1).unwrap();
        for r in 0..2 {
            assert_eq!(state.at(r, 0), BalloonState::REST);
        }
        assert_eq!(state.deoxy().dim(), (2, 50));
    }

    #[test]
    fn test_initial_sample_ignores_physiology() {
        let neural = Array2::from_elem((50, 2), 0.3);
        let other = RegionalBalloon::derive(
            &BalloonConstants::default(),
            array![[0.5], [-0.4], [0.3], [-0.9]].view(),
            2,
        )
        .unwrap();

        let reference = integrate(neural.view(), &two_region_balloon(), 0.1).unwrap();
        let shifted = integrate(neural.view(), &other, 0.1).unwrap();

        for r in 0..2 {
            assert_eq!(reference.at(r, 0), BalloonState::REST);
            assert_eq!(shifted.at(r, 0), BalloonState::REST);
        }
        // Region 0 never reads P; region 1 does after the first step
        assert_eq!(reference.at(0, 49), shifted.at(0, 49));
        assert_ne!(reference.at(1, 49), shifted.at(1, 49));
    }

    #[test]
    fn test_no_input_stays_at_baseline() {
        let neural = Array2::zeros((300, 2));
        let state = integrate(neural.view(), &two_region_balloon(), 0.1).unwrap();
        assert!(peak_deviation(&state).iter().all(|&d| d < 1e-12));
        assert!(state.signal().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_activation_raises_flow_and_lowers_deoxy() {
        let mut neural = Array2::zeros((300, 1));
        for t in 0..50 {
            neural[[t, 0]] = 0.1;
        }
        let balloon =
            RegionalBalloon::derive(&BalloonConstants::default(), Array2::zeros((4, 1)).view(), 1)
                .unwrap();
        let state = integrate(neural.view(), &balloon, 0.1).unwrap();

        let peak_flow = state.inflow().row(0).fold(f64::MIN, |m, &v| m.max(v));
        let min_deoxy = state.deoxy().row(0).fold(f64::MAX, |m, &v| m.min(v));
        let peak_total = state.total().row(0).fold(f64::MIN, |m, &v| m.max(v));
        assert!(peak_flow > 1.0);
        assert!(min_deoxy < 1.0);
        assert!(peak_total > 1.0);
    }

    #[test]
    fn test_degenerate_drive_is_reported() {
        let neural = Array2::from_elem((400, 1), -50.0);
        let balloon =
            RegionalBalloon::derive(&BalloonConstants::default(), Array2::zeros((4, 1)).view(), 1)
                .unwrap();
        assert!(matches!(
            integrate(neural.view(), &balloon, 0.1),
            Err(SimulationError::NumericalDegeneracy { stage: Stage::Hemodynamics, .. })
        ));
    }

    #[test]
    fn test_region_mismatch() {
        let neural = Array2::zeros((10, 3));
        assert!(matches!(
            integrate(neural.view(), &two_region_balloon(), 0.1),
            Err(SimulationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_outflow_at_rest_is_one() {
        let balloon = two_region_balloon();
        let state = integrate(Array2::zeros((5, 2)).view(), &balloon, 0.1).unwrap();
        let outflow = state.outflow(&balloon);
        assert!(outflow.iter().all(|&f| (f - 1.0).abs() < 1e-15));
    }
}
