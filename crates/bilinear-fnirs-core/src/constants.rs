//! Physiological and optical constant tables
//!
//! The literature values below are grouped into immutable structs that are
//! passed by reference into the stage functions. Nothing here is mutable
//! global state; callers that want different values build their own table.

use serde::{Deserialize, Serialize};

/// Raw literature values
pub mod literature {
    /// Vasodilatory signal decay rate κ₀ (s⁻¹)
    pub const SIGNAL_DECAY: f64 = 0.64;

    /// Autoregulatory feedback rate γ₀ (s⁻¹)
    pub const AUTOREGULATION: f64 = 0.32;

    /// Hemodynamic transit time τ₀ (s)
    pub const TRANSIT_TIME: f64 = 2.00;

    /// Grubb's stiffness exponent φ
    pub const STIFFNESS: f64 = 0.32;

    /// Resting oxygen extraction fraction ρ used by the balloon model
    pub const RESTING_EXTRACTION: f64 = 0.32;

    /// Viscoelastic time constant τv₀ (s)
    pub const VISCOELASTIC_TIME: f64 = 2.00;

    /// Baseline total hemoglobin concentration P₀ (µM)
    pub const BASELINE_TOTAL_HB: f64 = 71.0;

    /// Saturation convention ρ used when scaling deoxyhemoglobin to µM
    pub const OPTICAL_SATURATION: f64 = 0.65;

    /// Deoxy-channel coefficient for Δ[HbR]
    pub const E_DEOXY_HBR: f64 = 0.000_735_825_1;

    /// Deoxy-channel coefficient for Δ[HbO]
    pub const E_DEOXY_HBO: f64 = 0.001_104_715;

    /// Oxy-channel coefficient for Δ[HbR]
    pub const E_OXY_HBR: f64 = 0.001_159_306;

    /// Oxy-channel coefficient for Δ[HbO]
    pub const E_OXY_HBO: f64 = 0.000_785_899_3;

    /// Effective pathlength applied to the Δ[HbR] column
    pub const PATHLENGTH_HBR: f64 = 7.5;

    /// Effective pathlength applied to the Δ[HbO] column
    pub const PATHLENGTH_HBO: f64 = 6.5;
}

// ============================================================================
// Balloon model
// ============================================================================

/// Baseline balloon-model constants shared by all regions.
///
/// Per-region rate constants are derived from these by log-normal scaling
/// (see [`crate::hemo::RegionalBalloon`]); `stiffness` and
/// `resting_extraction` are shared as-is.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalloonConstants {
    /// κ₀: vasodilatory signal decay (s⁻¹)
    pub signal_decay: f64,
    /// γ₀: flow-dependent elimination (s⁻¹)
    pub autoregulation: f64,
    /// τ₀: transit time (s)
    pub transit_time: f64,
    /// φ: stiffness exponent
    pub stiffness: f64,
    /// ρ: resting oxygen extraction fraction
    pub resting_extraction: f64,
    /// τv₀: viscoelastic time constant (s)
    pub viscoelastic_time: f64,
}

impl BalloonConstants {
    /// Standard literature values
    #[must_use]
    pub const fn literature() -> Self {
        Self {
            signal_decay: literature::SIGNAL_DECAY,
            autoregulation: literature::AUTOREGULATION,
            transit_time: literature::TRANSIT_TIME,
            stiffness: literature::STIFFNESS,
            resting_extraction: literature::RESTING_EXTRACTION,
            viscoelastic_time: literature::VISCOELASTIC_TIME,
        }
    }
}

impl Default for BalloonConstants {
    fn default() -> Self {
        Self::literature()
    }
}

// ============================================================================
// Optics
// ============================================================================

/// Constants of the optical forward map.
///
/// `absorption` maps `[Δq, Δh]` to `[deoxy channel, oxy channel]` optical
/// density by matrix product.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpticalConstants {
    /// P₀: baseline total hemoglobin (µM)
    pub baseline_total_hb: f64,
    /// ρ used to scale normalized deoxyhemoglobin: Δq = (q-1)·P₀·(1-ρ)
    pub saturation: f64,
    /// 2×2 absorption matrix F
    pub absorption: [[f64; 2]; 2],
}

impl OpticalConstants {
    /// Standard values
    #[must_use]
    pub const fn literature() -> Self {
        use literature::*;

        Self {
            baseline_total_hb: BASELINE_TOTAL_HB,
            saturation: OPTICAL_SATURATION,
            absorption: [
                [E_DEOXY_HBR * PATHLENGTH_HBR, E_DEOXY_HBO * PATHLENGTH_HBO],
                [E_OXY_HBR * PATHLENGTH_HBR, E_OXY_HBO * PATHLENGTH_HBO],
            ],
        }
    }

    /// Baseline deoxyhemoglobin concentration P₀·(1-ρ)
    #[inline]
    #[must_use]
    pub fn baseline_deoxy_hb(&self) -> f64 {
        self.baseline_total_hb * (1.0 - self.saturation)
    }

    /// Determinant of the absorption matrix
    #[inline]
    #[must_use]
    pub fn determinant(&self) -> f64 {
        let f = &self.absorption;
        f[0][0] * f[1][1] - f[0][1] * f[1][0]
    }
}

impl Default for OpticalConstants {
    fn default() -> Self {
        Self::literature()
    }
}

// ============================================================================
// Physiological rhythms
// ============================================================================

/// Base frequency distribution of a physiological noise rhythm
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysiologicalRhythm {
    /// Mean base frequency (Hz)
    pub mean_hz: f64,
    /// Standard deviation of the base frequency (Hz)
    pub std_hz: f64,
}

impl PhysiologicalRhythm {
    /// Cardiac pulsation
    pub const HEART: Self = Self { mean_hz: 1.08, std_hz: 0.16 };

    /// Respiration
    pub const BREATHING: Self = Self { mean_hz: 0.22, std_hz: 0.07 };

    /// Mayer waves / vasomotion
    pub const VASOMOTION: Self = Self { mean_hz: 0.082, std_hz: 0.016 };
}

/// Number of harmonic overtones added to a physiological rhythm
pub const HARMONIC_COUNT: usize = 5;

/// Amplitude ratio between successive harmonics
pub const HARMONIC_DECAY: f64 = 0.5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optical_defaults() {
        let optics = OpticalConstants::default();
        assert!((optics.baseline_deoxy_hb() - 24.85).abs() < 1e-9);
        assert!((optics.absorption[0][0] - 0.000_735_825_1 * 7.5).abs() < 1e-15);
        assert!((optics.absorption[1][1] - 0.000_785_899_3 * 6.5).abs() < 1e-15);
        assert!(optics.determinant().abs() > 1e-9);
    }

    #[test]
    fn test_balloon_defaults() {
        let balloon = BalloonConstants::default();
        assert_eq!(balloon.signal_decay, 0.64);
        assert_eq!(balloon.viscoelastic_time, 2.0);
        assert_eq!(balloon, BalloonConstants::literature());
    }
}
