//! Noise Injector
//!
//! Synthesizes additive noise and superimposes it on hemodynamic or optical
//! signals at a calibrated amplitude:
//!
//! - **White**: zero-mean Gaussian with a configured standard deviation.
//! - **Physiological** (heart, breathing, vasomotion): a sinusoid at a
//!   randomly drawn base frequency, five decaying harmonics and a pink-noise
//!   floor normalized to the sinusoid's standard deviation.
//! - **Empirical**: recorded traces from a [`TraceSupplier`], resampled in
//!   the Fourier domain to the signal length.
//!
//! The injected noise peak is calibrated to `percent_error/100` of the
//! reference signal's peak. Under [`GainPolicy::Pooled`] that holds for the
//! sum of all sources, whatever their number.

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Data, Dimension};
use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::constants::{PhysiologicalRhythm, HARMONIC_COUNT, HARMONIC_DECAY};
use crate::error::{require_non_negative, SimulationError, SimulationResult};
use crate::optics::HemoglobinChanges;
use crate::spectral::{standard_deviation, Spectral};

// ============================================================================
// Noise kinds
// ============================================================================

/// Noise family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseKind {
    /// Gaussian white noise
    White,
    /// Cardiac pulsation
    Heart,
    /// Respiration
    Breathing,
    /// Mayer waves
    Vasomotion,
    /// Recorded traces, resampled
    Empirical,
}

impl NoiseKind {
    /// All kinds
    pub const ALL: [Self; 5] = [
        Self::White,
        Self::Heart,
        Self::Breathing,
        Self::Vasomotion,
        Self::Empirical,
    ];

    /// Selection string
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Heart => "heart",
            Self::Breathing => "breathing",
            Self::Vasomotion => "vasomotion",
            Self::Empirical => "empirical",
        }
    }

    /// Base-frequency distribution for physiological kinds
    #[must_use]
    pub const fn rhythm(self) -> Option<PhysiologicalRhythm> {
        match self {
            Self::Heart => Some(PhysiologicalRhythm::HEART),
            Self::Breathing => Some(PhysiologicalRhythm::BREATHING),
            Self::Vasomotion => Some(PhysiologicalRhythm::VASOMOTION),
            Self::White | Self::Empirical => None,
        }
    }
}

impl fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NoiseKind {
    type Err = SimulationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == needle)
            .ok_or_else(|| {
                SimulationError::config(
                    "noise kind",
                    format!("unknown noise kind '{s}' (white|heart|breathing|vasomotion|empirical)"),
                )
            })
    }
}

// ============================================================================
// Producers
// ============================================================================

/// Gaussian white noise, `n` samples with standard deviation `std_dev`.
///
/// # Errors
///
/// `InvalidConfig` if `std_dev` is negative or not finite.
pub fn white_noise<R: Rng + ?Sized>(
    n: usize,
    std_dev: f64,
    rng: &mut R,
) -> SimulationResult<Vec<f64>> {
    require_non_negative("white noise std", std_dev)?;
    let normal = Normal::new(0.0, std_dev)
        .map_err(|e| SimulationError::config("white noise std", e.to_string()))?;
    Ok((0..n).map(|_| normal.sample(rng)).collect())
}

/// Harmonic overtones of `base_hz`: the i-th (1-based) sits at
/// `(i+1)·base_hz` with amplitude `0.5^(i+1)`.
#[must_use]
pub fn harmonic_noise(base_hz: f64, timestamps: ArrayView1<'_, f64>) -> Vec<f64> {
    timestamps
        .iter()
        .map(|&t| {
            (1..=HARMONIC_COUNT)
                .map(|i| {
                    let order = (i + 1) as f64;
                    HARMONIC_DECAY.powi(i as i32 + 1) * (2.0 * PI * order * base_hz * t).sin()
                })
                .sum()
        })
        .collect()
}

/// Physiological noise for one rhythm at the given timestamps.
///
/// # Errors
///
/// `InvalidConfig` if the rhythm's standard deviation is invalid.
pub fn physiological_noise<R: Rng + ?Sized>(
    rhythm: PhysiologicalRhythm,
    timestamps: ArrayView1<'_, f64>,
    spectral: &mut Spectral,
    rng: &mut R,
) -> SimulationResult<Vec<f64>> {
    let distribution = Normal::new(rhythm.mean_hz, rhythm.std_hz)
        .map_err(|e| SimulationError::config("rhythm std", e.to_string()))?;
    let base_hz = distribution.sample(rng).abs();

    let primary: Vec<f64> = timestamps.iter().map(|&t| (2.0 * PI * base_hz * t).sin()).collect();
    let harmonics = harmonic_noise(base_hz, timestamps);
    let mut pink = spectral.pink_noise(timestamps.len(), rng);

    let pink_std = standard_deviation(&pink);
    let scale = if pink_std > 0.0 {
        standard_deviation(&primary) / pink_std
    } else {
        0.0
    };
    pink.iter_mut().for_each(|v| *v *= scale);

    Ok(primary
        .iter()
        .zip(&harmonics)
        .zip(&pink)
        .map(|((p, h), k)| p + h + k)
        .collect())
}

/// Largest absolute value in `values` (0 for an empty array)
#[must_use]
pub fn peak_amplitude<S, D>(values: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    values.fold(0.0_f64, |peak, v| peak.max(v.abs()))
}

// ============================================================================
// Empirical traces
// ============================================================================

/// Source of raw empirical noise traces, one per signal row.
///
/// Implementations own whatever I/O produced the traces; the injector only
/// resamples and scales what they return.
pub trait TraceSupplier {
    /// Raw trace for signal row `row`, any length
    ///
    /// # Errors
    ///
    /// Implementation-defined; propagated unchanged by the injector.
    fn trace(&mut self, row: usize, rng: &mut dyn RngCore) -> SimulationResult<Vec<f64>>;
}

/// In-memory bank of recorded traces (samples × recordings).
///
/// Every request draws one recording uniformly at random.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TraceBankRaw")]
pub struct TraceBank {
    traces: Array2<f64>,
}

#[derive(Deserialize)]
struct TraceBankRaw {
    traces: Array2<f64>,
}

impl TryFrom<TraceBankRaw> for TraceBank {
    type Error = SimulationError;

    fn try_from(raw: TraceBankRaw) -> SimulationResult<Self> {
        Self::new(raw.traces)
    }
}

impl TraceBank {
    /// Wrap a samples × recordings matrix.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the bank has no samples or no recordings.
    pub fn new(traces: Array2<f64>) -> SimulationResult<Self> {
        if traces.is_empty() {
            return Err(SimulationError::config(
                "trace bank",
                format!("needs at least one sample and one recording, got {:?}", traces.dim()),
            ));
        }
        Ok(Self { traces })
    }

    /// Number of recordings
    #[must_use]
    pub fn recordings(&self) -> usize {
        self.traces.ncols()
    }

    /// Recording `index`
    #[must_use]
    pub fn recording(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.recordings()).then(|| self.traces.column(index))
    }
}

impl TraceSupplier for TraceBank {
    fn trace(&mut self, _row: usize, rng: &mut dyn RngCore) -> SimulationResult<Vec<f64>> {
        let index = rng.gen_range(0..self.recordings());
        Ok(self.traces.column(index).to_vec())
    }
}

/// Paired deoxy/oxy banks, dispatched by the interleaved row layout of the
/// optical output: even rows draw from `deoxy`, odd rows from `oxy`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HemoglobinTraceBank {
    /// Deoxyhemoglobin recordings
    pub deoxy: TraceBank,
    /// Oxyhemoglobin recordings
    pub oxy: TraceBank,
}

impl TraceSupplier for HemoglobinTraceBank {
    fn trace(&mut self, row: usize, rng: &mut dyn RngCore) -> SimulationResult<Vec<f64>> {
        if row % 2 == 0 {
            self.deoxy.trace(row, rng)
        } else {
            self.oxy.trace(row, rng)
        }
    }
}

// ============================================================================
// Specification
// ============================================================================

/// How the calibration target is distributed over several sources
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainPolicy {
    /// Sum all sources, then scale the sum to the target peak
    #[default]
    Pooled,
    /// Scale every source to the target peak, then sum
    Independent,
}

fn default_white_std() -> f64 {
    1.0
}

/// Which noise to inject and how strongly
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseSpecification {
    /// Noise sources to combine
    pub sources: Vec<NoiseKind>,
    /// Target noise peak as a percentage of the reference peak
    pub percent_error: f64,
    /// Gain calibration policy
    #[serde(default)]
    pub policy: GainPolicy,
    /// Standard deviation of raw white noise before calibration
    #[serde(default = "default_white_std")]
    pub white_std: f64,
}

impl NoiseSpecification {
    /// Pooled-gain specification
    #[must_use]
    pub fn new(sources: Vec<NoiseKind>, percent_error: f64) -> Self {
        Self {
            sources,
            percent_error,
            policy: GainPolicy::Pooled,
            white_std: default_white_std(),
        }
    }

    /// Same specification with another gain policy
    #[must_use]
    pub fn with_policy(mut self, policy: GainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Check ranges.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an empty source list, a negative percent error or
    /// an invalid white-noise deviation.
    pub fn validate(&self) -> SimulationResult<()> {
        if self.sources.is_empty() {
            return Err(SimulationError::config("noise sources", "at least one source is required"));
        }
        require_non_negative("percent_error", self.percent_error)?;
        require_non_negative("white noise std", self.white_std)
    }

    /// True if any source needs a [`TraceSupplier`]
    #[must_use]
    pub fn needs_traces(&self) -> bool {
        self.sources.contains(&NoiseKind::Empirical)
    }
}

impl Default for NoiseSpecification {
    fn default() -> Self {
        Self::new(vec![NoiseKind::White], 5.0)
    }
}

// ============================================================================
// Injection
// ============================================================================

/// A signal with calibrated noise added, and that noise
#[derive(Clone, Debug, PartialEq)]
pub struct NoisySignal {
    /// `clean + noise`
    pub signal: Array2<f64>,
    /// Calibrated noise that was added
    pub noise: Array2<f64>,
}

/// Hemoglobin changes with calibrated noise, and that noise
#[derive(Clone, Debug, PartialEq)]
pub struct NoisyHemoglobin {
    /// Noisy Δq, Δh and their sum Δp
    pub changes: HemoglobinChanges,
    /// Noise added to Δq and Δh (`delta_p` holds their sum)
    pub noise: HemoglobinChanges,
}

/// Applies a [`NoiseSpecification`] to signals.
#[derive(Debug)]
pub struct NoiseInjector {
    spec: NoiseSpecification,
    spectral: Spectral,
}

impl NoiseInjector {
    /// Create an injector.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the specification is invalid.
    pub fn new(spec: NoiseSpecification) -> SimulationResult<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            spectral: Spectral::new(),
        })
    }

    /// The specification in use
    #[must_use]
    pub fn specification(&self) -> &NoiseSpecification {
        &self.spec
    }

    /// Add noise calibrated against the signal's own peak.
    ///
    /// `signal` is rows × samples; `timestamps` gives the sample times.
    ///
    /// # Errors
    ///
    /// See [`NoiseInjector::inject_with_reference`].
    pub fn inject<R: Rng>(
        &mut self,
        signal: ArrayView2<'_, f64>,
        timestamps: ArrayView1<'_, f64>,
        supplier: Option<&mut dyn TraceSupplier>,
        rng: &mut R,
    ) -> SimulationResult<NoisySignal> {
        self.inject_with_reference(signal, signal, timestamps, supplier, rng)
    }

    /// Add noise calibrated against `reference`'s peak.
    ///
    /// # Errors
    ///
    /// - `ShapeMismatch` if `timestamps` disagrees with the sample count.
    /// - `InvalidConfig` if empirical noise is requested without a supplier,
    ///   or if the noise to be scaled has zero peak.
    /// - Any error returned by the supplier.
    pub fn inject_with_reference<R: Rng>(
        &mut self,
        signal: ArrayView2<'_, f64>,
        reference: ArrayView2<'_, f64>,
        timestamps: ArrayView1<'_, f64>,
        supplier: Option<&mut dyn TraceSupplier>,
        rng: &mut R,
    ) -> SimulationResult<NoisySignal> {
        check_samples(signal.ncols(), timestamps.len())?;
        let noise = self.calibrated_noise(
            signal.nrows(),
            peak_amplitude(&reference),
            timestamps,
            supplier,
            |_| false,
            rng,
        )?;

        tracing::debug!(
            rows = signal.nrows(),
            samples = signal.ncols(),
            percent_error = self.spec.percent_error,
            policy = ?self.spec.policy,
            "Injected noise"
        );

        Ok(NoisySignal {
            signal: &signal + &noise,
            noise,
        })
    }

    /// Add noise jointly to Δq and Δh with one calibration against
    /// `max(peak Δq, peak Δh)`.
    ///
    /// Rows are laid out like the optical output (row `2r` deoxy, `2r+1`
    /// oxy), so a [`HemoglobinTraceBank`] feeds each quantity from its own
    /// bank. White noise is shared between Δq and Δh of the same region.
    ///
    /// # Errors
    ///
    /// As [`NoiseInjector::inject_with_reference`].
    pub fn inject_hemoglobin<R: Rng>(
        &mut self,
        changes: &HemoglobinChanges,
        timestamps: ArrayView1<'_, f64>,
        supplier: Option<&mut dyn TraceSupplier>,
        rng: &mut R,
    ) -> SimulationResult<NoisyHemoglobin> {
        if changes.delta_q.dim() != changes.delta_h.dim() {
            return Err(SimulationError::shape(
                "Δq and Δh",
                format!("{:?}", changes.delta_q.dim()),
                format!("{:?}", changes.delta_h.dim()),
            ));
        }

        check_samples(changes.len(), timestamps.len())?;

        let regions = changes.regions();
        let reference = peak_amplitude(&changes.delta_q).max(peak_amplitude(&changes.delta_h));
        let noise = self.calibrated_noise(
            2 * regions,
            reference,
            timestamps,
            supplier,
            |row| row % 2 == 1,
            rng,
        )?;

        let mut noise_q = Array2::zeros(changes.delta_q.dim());
        let mut noise_h = Array2::zeros(changes.delta_h.dim());
        for r in 0..regions {
            noise_q.row_mut(r).assign(&noise.row(2 * r));
            noise_h.row_mut(r).assign(&noise.row(2 * r + 1));
        }

        let delta_q = &changes.delta_q + &noise_q;
        let delta_h = &changes.delta_h + &noise_h;
        let noisy = HemoglobinChanges {
            delta_p: &delta_q + &delta_h,
            delta_q,
            delta_h,
        };

        tracing::debug!(regions, reference, "Injected hemoglobin noise");

        Ok(NoisyHemoglobin {
            changes: noisy,
            noise: HemoglobinChanges {
                delta_p: &noise_q + &noise_h,
                delta_q: noise_q,
                delta_h: noise_h,
            },
        })
    }

    /// Build every source, then scale per the gain policy.
    ///
    /// `shares_white(row)` marks rows that reuse the white-noise realization
    /// of the row above.
    fn calibrated_noise<R: Rng>(
        &mut self,
        rows: usize,
        reference_peak: f64,
        timestamps: ArrayView1<'_, f64>,
        mut supplier: Option<&mut dyn TraceSupplier>,
        shares_white: impl Fn(usize) -> bool,
        rng: &mut R,
    ) -> SimulationResult<Array2<f64>> {
        let samples = timestamps.len();
        let target = self.spec.percent_error / 100.0 * reference_peak;
        if reference_peak == 0.0 {
            tracing::warn!("Noise calibrated against a zero-amplitude reference");
        }

        let sources = self.spec.sources.clone();
        let mut combined: Array2<f64> = Array2::zeros((rows, samples));
        for kind in sources {
            let mut source = Array2::zeros((rows, samples));
            for row in 0..rows {
                if kind == NoiseKind::White && row > 0 && shares_white(row) {
                    let previous = source.row(row - 1).to_owned();
                    source.row_mut(row).assign(&previous);
                    continue;
                }
                let realization =
                    self.realize(kind, row, timestamps, supplier.as_deref_mut(), rng)?;
                source.row_mut(row).assign(&Array1::from_vec(realization));
            }

            match self.spec.policy {
                GainPolicy::Pooled => combined += &source,
                GainPolicy::Independent => {
                    combined.scaled_add(gain_for(&source, target)?, &source);
                }
            }
        }

        if self.spec.policy == GainPolicy::Pooled {
            combined *= gain_for(&combined, target)?;
        }
        Ok(combined)
    }

    /// One raw realization of `kind` for signal row `row`
    fn realize<R: Rng>(
        &mut self,
        kind: NoiseKind,
        row: usize,
        timestamps: ArrayView1<'_, f64>,
        supplier: Option<&mut (dyn TraceSupplier + '_)>,
        rng: &mut R,
    ) -> SimulationResult<Vec<f64>> {
        let samples = timestamps.len();
        match kind {
            NoiseKind::White => white_noise(samples, self.spec.white_std, rng),
            NoiseKind::Heart | NoiseKind::Breathing | NoiseKind::Vasomotion => {
                let rhythm = kind.rhythm().ok_or_else(|| {
                    SimulationError::config("noise kind", format!("{kind} has no rhythm"))
                })?;
                physiological_noise(rhythm, timestamps, &mut self.spectral, rng)
            }
            NoiseKind::Empirical => {
                let supplier = supplier.ok_or_else(|| {
                    SimulationError::config("noise sources", "empirical noise needs a trace supplier")
                })?;
                let raw = supplier.trace(row, rng)?;
                Ok(self.spectral.resample(&raw, samples))
            }
        }
    }
}

fn check_samples(signal: usize, timestamps: usize) -> SimulationResult<()> {
    if signal == timestamps {
        Ok(())
    } else {
        Err(SimulationError::shape("noise timestamps", signal, timestamps))
    }
}

/// Gain that brings `noise`'s peak to `target`.
fn gain_for(noise: &Array2<f64>, target: f64) -> SimulationResult<f64> {
    let peak = peak_amplitude(noise);
    if !peak.is_finite() || peak <= 0.0 {
        return Err(SimulationError::config(
            "percent_error",
            format!("cannot scale noise with peak amplitude {peak}"),
        ));
    }
    Ok(target / peak)
}

// ============================================================================
// SNR-based white noise
// ============================================================================

/// Signal power convention for [`add_white_noise_snr`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalPower {
    /// Mean square of the signal
    #[default]
    Measured,
    /// Assume unit power
    Unit,
}

/// Add white Gaussian noise at a target SNR in dB.
///
/// # Errors
///
/// `InvalidConfig` if `snr_db` is not finite.
pub fn add_white_noise_snr<R: Rng + ?Sized>(
    signal: ArrayView2<'_, f64>,
    snr_db: f64,
    power: SignalPower,
    rng: &mut R,
) -> SimulationResult<Array2<f64>> {
    if !snr_db.is_finite() {
        return Err(SimulationError::config("snr_db", format!("must be finite, got {snr_db}")));
    }
    let signal_power = match power {
        SignalPower::Measured => signal.mapv(|v| v * v).mean().unwrap_or(0.0),
        SignalPower::Unit => 1.0,
    };
    let noise_std = (signal_power / 10f64.powf(snr_db / 10.0)).sqrt();
    let normal = Normal::new(0.0, noise_std)
        .map_err(|e| SimulationError::config("snr_db", e.to_string()))?;

    Ok(signal.mapv(|v| v + normal.sample(rng)))
}
