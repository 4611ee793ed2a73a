//! Stimulus Generator
//!
//! Builds binary block-design pulse trains (task on / rest off) together with
//! their time axis.
//!
//! ```text
//!         action    rest       action    rest
//! u(t)  ┌───────┐          ┌───────┐
//!       │       │          │       │
//!  ─────┘       └──────────┘       └──────────
//!       |<------ cycle ---->|
//! ```

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{require_non_negative, require_positive, SimulationError, SimulationResult};

/// Tolerance added before flooring `t·f` so that `k/f·f` maps back to `k`
const INDEX_EPSILON: f64 = 1e-9;

/// Binary input signal with its time axis.
///
/// `inputs` has one row per input channel and one column per sample;
/// `timestamps[k]` is the time of column `k`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StimulusSignalRaw")]
pub struct StimulusSignal {
    inputs: Array2<f64>,
    timestamps: Array1<f64>,
    frequency: f64,
}

/// Unchecked wire form of [`StimulusSignal`]
#[derive(Deserialize)]
struct StimulusSignalRaw {
    inputs: Array2<f64>,
    timestamps: Array1<f64>,
    frequency: f64,
}

impl TryFrom<StimulusSignalRaw> for StimulusSignal {
    type Error = SimulationError;

    fn try_from(raw: StimulusSignalRaw) -> SimulationResult<Self> {
        Self::new(raw.inputs, raw.timestamps, raw.frequency)
    }
}

impl StimulusSignal {
    /// Wrap an existing input matrix.
    ///
    /// # Errors
    ///
    /// Fails if the timestamp count differs from the number of columns, if
    /// any value is not exactly 0 or 1, or if `frequency` is not positive.
    pub fn new(
        inputs: Array2<f64>,
        timestamps: Array1<f64>,
        frequency: f64,
    ) -> SimulationResult<Self> {
        require_positive("frequency", frequency)?;

        if timestamps.len() != inputs.ncols() {
            return Err(SimulationError::shape(
                "stimulus timestamps",
                inputs.ncols(),
                timestamps.len(),
            ));
        }

        if let Some(bad) = inputs.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(SimulationError::config(
                "stimulus",
                format!("values must be 0 or 1, found {bad}"),
            ));
        }

        if (1..timestamps.len()).any(|k| timestamps[k] <= timestamps[k - 1]) {
            return Err(SimulationError::config(
                "timestamps",
                "must be strictly increasing",
            ));
        }

        Ok(Self { inputs, timestamps, frequency })
    }

    /// Input matrix (channels × samples)
    #[must_use]
    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    /// Time of each sample (s)
    #[must_use]
    pub fn timestamps(&self) -> &Array1<f64> {
        &self.timestamps
    }

    /// Native sampling frequency (Hz)
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Number of input channels
    #[must_use]
    pub fn channels(&self) -> usize {
        self.inputs.nrows()
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.ncols()
    }

    /// True if the signal has no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column holding the input active at time `t`.
    ///
    /// Uses floor alignment at the native rate,
    /// `min(floor(t·f), last)`, so an integrator sampling at any other rate
    /// always sees the most recent native sample. Returns `None` only for an
    /// empty signal.
    #[must_use]
    pub fn sample_index(&self, t: f64) -> Option<usize> {
        let last = self.len().checked_sub(1)?;
        let raw = (t * self.frequency + INDEX_EPSILON).floor();
        if raw <= 0.0 {
            return Some(0);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = raw as usize;
        Some(index.min(last))
    }
}

/// Largest sample count a single track may hold
const MAX_TRACK_SAMPLES: f64 = (1u64 << 48) as f64;

/// Number of samples covering `duration_s` at `frequency`.
///
/// The product is nudged by [`INDEX_EPSILON`] so that decimal durations such
/// as 0.29 s at 100 Hz give 29 samples instead of 28.
fn samples_for(duration_s: f64, frequency: f64) -> SimulationResult<usize> {
    let raw = (duration_s * frequency + INDEX_EPSILON).floor();
    if !raw.is_finite() || raw > MAX_TRACK_SAMPLES {
        return Err(SimulationError::config(
            "stimulus duration",
            format!("{duration_s} s at {frequency} Hz exceeds {MAX_TRACK_SAMPLES} samples"),
        ));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n = raw as usize;
    Ok(n)
}

/// Time axis `k / frequency` for `k in 0..samples`.
fn time_axis(samples: usize, frequency: f64) -> Array1<f64> {
    Array1::from_shape_fn(samples, |k| k as f64 / frequency)
}

/// One region's pulse train.
fn pulse_track(
    frequency: f64,
    action_s: f64,
    rest_s: f64,
    cycles: usize,
) -> SimulationResult<Array1<f64>> {
    let active = samples_for(action_s, frequency)?;
    let total = active
        .checked_add(samples_for(rest_s, frequency)?)
        .and_then(|cycle| cycle.checked_mul(cycles).map(|total| (cycle, total)))
        .filter(|&(_, total)| total as f64 <= MAX_TRACK_SAMPLES);
    let Some((cycle, total)) = total else {
        return Err(SimulationError::config(
            "stimulus protocol",
            format!("{cycles} cycles at {frequency} Hz exceed {MAX_TRACK_SAMPLES} samples"),
        ));
    };
    let mut track = Array1::zeros(total);

    for i in 0..cycles {
        let start = i * cycle;
        track.slice_mut(s![start..start + active]).fill(1.0);
    }

    Ok(track)
}

/// Same block design for every region.
///
/// Produces `regions × (floor(action·f) + floor(rest·f))·cycles` samples.
///
/// # Errors
///
/// Fails on a non-positive frequency, negative durations, or a train too
/// long to allocate.
pub fn generate_uniform(
    frequency: f64,
    action_s: f64,
    rest_s: f64,
    cycles: usize,
    regions: usize,
) -> SimulationResult<StimulusSignal> {
    require_positive("frequency", frequency)?;
    require_non_negative("action duration", action_s)?;
    require_non_negative("rest duration", rest_s)?;

    let track = pulse_track(frequency, action_s, rest_s, cycles)?;
    let samples = track.len();
    let inputs = Array2::from_shape_fn((regions, samples), |(_, k)| track[k]);

    tracing::debug!(regions, samples, cycles, "Generated uniform stimulus train");

    Ok(StimulusSignal {
        inputs,
        timestamps: time_axis(samples, frequency),
        frequency,
    })
}

/// Individual block design per region.
///
/// Region `r` uses `action_s[r]`, `rest_s[r]` and `cycles[r]`. Shorter tracks
/// are zero-padded on the right up to the longest one; a region with zero
/// cycles is all zeros.
///
/// # Errors
///
/// Fails if the three lists differ in length, on a non-positive frequency,
/// on any negative duration, or on a train too long to allocate.
pub fn generate_per_region(
    frequency: f64,
    action_s: &[f64],
    rest_s: &[f64],
    cycles: &[usize],
) -> SimulationResult<StimulusSignal> {
    require_positive("frequency", frequency)?;

    if action_s.len() != rest_s.len() || action_s.len() != cycles.len() {
        return Err(SimulationError::config(
            "per-region protocol",
            format!(
                "list lengths differ: {} action, {} rest, {} cycles",
                action_s.len(),
                rest_s.len(),
                cycles.len()
            ),
        ));
    }

    for (&action, &rest) in action_s.iter().zip(rest_s) {
        require_non_negative("action duration", action)?;
        require_non_negative("rest duration", rest)?;
    }

    let tracks = action_s
        .iter()
        .zip(rest_s)
        .zip(cycles)
        .map(|((&action, &rest), &n)| pulse_track(frequency, action, rest, n))
        .collect::<SimulationResult<Vec<_>>>()?;

    let samples = tracks.iter().map(Array1::len).max().unwrap_or(0);
    let mut inputs = Array2::zeros((tracks.len(), samples));
    for (r, track) in tracks.iter().enumerate() {
        inputs.slice_mut(s![r, ..track.len()]).assign(track);
    }

    tracing::debug!(regions = tracks.len(), samples, "Generated per-region stimulus train");

    Ok(StimulusSignal {
        inputs,
        timestamps: time_axis(samples, frequency),
        frequency,
    })
}

/// Block-design timing, either shared or per region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StimulusProtocol {
    /// Same timing on every channel
    Uniform {
        /// Task duration (s)
        action_s: f64,
        /// Rest duration (s)
        rest_s: f64,
        /// Number of task/rest cycles
        cycles: usize,
    },
    /// One timing per channel
    PerRegion {
        /// Task duration per channel (s)
        action_s: Vec<f64>,
        /// Rest duration per channel (s)
        rest_s: Vec<f64>,
        /// Cycle count per channel
        cycles: Vec<usize>,
    },
}

impl StimulusProtocol {
    /// Build the stimulus for `channels` input channels.
    ///
    /// # Errors
    ///
    /// Propagates generator errors; a per-region protocol must list exactly
    /// `channels` timings.
    pub fn generate(&self, frequency: f64, channels: usize) -> SimulationResult<StimulusSignal> {
        match self {
            Self::Uniform { action_s, rest_s, cycles } => {
                generate_uniform(frequency, *action_s, *rest_s, *cycles, channels)
            }
            Self::PerRegion { action_s, rest_s, cycles } => {
                if action_s.len() != channels {
                    return Err(SimulationError::shape(
                        "per-region protocol channels",
                        channels,
                        action_s.len(),
                    ));
                }
                generate_per_region(frequency, action_s, rest_s, cycles)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_shape_and_pattern() {
        let (freq, action, rest, cycles, regions) = (1.0, 5.0, 100.0, 4, 5);
        let stim = generate_uniform(freq, action, rest, cycles, regions).unwrap();

        assert_eq!(stim.inputs().dim(), (5, 420));
        assert_eq!(stim.timestamps().len(), 420);

        let cycle = 105;
        for i in 0..cycles {
            let on = stim.inputs().slice(s![.., i * cycle..i * cycle + 5]);
            assert!(on.iter().all(|&v| v == 1.0));
            let off = stim.inputs().slice(s![.., i * cycle + 5..(i + 1) * cycle]);
            assert!(off.iter().all(|&v| v == 0.0));
        }

        for (k, &t) in stim.timestamps().iter().enumerate() {
            assert_eq!(t, k as f64);
        }
    }

    #[test]
    fn test_uniform_ten_hz_scenario() {
        let stim = generate_uniform(10.0, 5.0, 25.0, 2, 2).unwrap();
        assert_eq!(stim.inputs().dim(), (2, 600));
        assert_eq!(stim.timestamps()[0], 0.0);
        assert!((stim.timestamps()[599] - 59.9).abs() < 1e-12);
        assert_eq!(stim.inputs()[[0, 49]], 1.0);
        assert_eq!(stim.inputs()[[0, 50]], 0.0);
        assert_eq!(stim.inputs()[[1, 300]], 1.0);
    }

    #[test]
    fn test_fractional_durations_floor() {
        // 0.25 s at 10 Hz floors to 2 samples, 0.99 s to 9
        let stim = generate_uniform(10.0, 0.25, 0.99, 3, 1).unwrap();
        assert_eq!(stim.len(), 33);
        assert_eq!(stim.inputs().row(0).sum(), 6.0);

        // 0.29·100 is 28.999… in binary; the count still lands on 29
        assert_eq!(generate_uniform(100.0, 0.29, 0.0, 1, 1).unwrap().len(), 29);
    }

    #[test]
    fn test_per_region_padding() {
        let stim =
            generate_per_region(10.0, &[0.0, 3.0, 5.0], &[0.0, 27.0, 25.0], &[0, 2, 3]).unwrap();

        // Longest track: 3 cycles of 300 samples
        assert_eq!(stim.inputs().dim(), (3, 900));
        assert_eq!(stim.timestamps().len(), 900);

        assert_eq!(stim.inputs().row(0).sum(), 0.0);
        assert_eq!(stim.inputs().row(1).sum(), 60.0);
        assert!(stim.inputs().slice(s![1, 600..]).iter().all(|&v| v == 0.0));
        assert_eq!(stim.inputs().row(2).sum(), 150.0);
    }

    #[test]
    fn test_per_region_all_zero_cycles() {
        let stim = generate_per_region(10.0, &[1.0, 2.0], &[1.0, 2.0], &[0, 0]).unwrap();
        assert_eq!(stim.inputs().dim(), (2, 0));
        assert!(stim.is_empty());
    }

    #[test]
    fn test_generator_errors() {
        assert!(matches!(
            generate_uniform(0.0, 5.0, 25.0, 2, 2),
            Err(SimulationError::InvalidConfig { .. })
        ));
        assert!(generate_uniform(10.0, -1.0, 25.0, 2, 2).is_err());
        assert!(generate_uniform(10.0, 5.0, -25.0, 2, 2).is_err());
        assert!(matches!(
            generate_per_region(10.0, &[1.0, 2.0], &[1.0], &[1, 1]),
            Err(SimulationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_oversized_train_rejected() {
        assert!(matches!(
            generate_uniform(10.0, 1e20, 1e20, 1, 1),
            Err(SimulationError::InvalidConfig { .. })
        ));
        assert!(matches!(
            generate_uniform(10.0, 5.0, 25.0, usize::MAX, 1),
            Err(SimulationError::InvalidConfig { .. })
        ));
        assert!(matches!(
            generate_per_region(10.0, &[1.0, f64::MAX], &[1.0, 1.0], &[1, 1]),
            Err(SimulationError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_sample_index_floor_alignment() {
        let stim = generate_uniform(10.0, 1.0, 1.0, 1, 1).unwrap();
        assert_eq!(stim.sample_index(0.0), Some(0));
        assert_eq!(stim.sample_index(-0.5), Some(0));
        assert_eq!(stim.sample_index(0.3), Some(3));
        assert_eq!(stim.sample_index(0.35), Some(3));
        assert_eq!(stim.sample_index(100.0), Some(19));

        // k/f·f must land back on k
        for (k, &t) in stim.timestamps().iter().enumerate() {
            assert_eq!(stim.sample_index(t), Some(k));
        }
    }

    #[test]
    fn test_signal_validation() {
        let u = Array2::from_elem((1, 3), 1.0);
        assert!(matches!(
            StimulusSignal::new(u.clone(), Array1::from(vec![0.0, 0.1]), 10.0),
            Err(SimulationError::ShapeMismatch { .. })
        ));
        assert!(StimulusSignal::new(u, Array1::from(vec![0.0, 0.1, 0.2]), 10.0).is_ok());

        let u = Array2::from_elem((1, 2), 0.5);
        assert!(StimulusSignal::new(u, Array1::from(vec![0.0, 0.1]), 10.0).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let stim = generate_uniform(10.0, 0.5, 0.5, 2, 2).unwrap();
        let json = serde_json::to_string(&stim).unwrap();
        let back: StimulusSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stim);

        let mismatched = r#"{
            "inputs": {"v": 1, "dim": [1, 3], "data": [0.0, 1.0, 0.0]},
            "timestamps": {"v": 1, "dim": [2], "data": [0.0, 0.1]},
            "frequency": 10.0
        }"#;
        let err = serde_json::from_str::<StimulusSignal>(mismatched).unwrap_err();
        assert!(err.to_string().contains("stimulus timestamps"));

        let non_binary = r#"{
            "inputs": {"v": 1, "dim": [1, 2], "data": [0.0, 0.5]},
            "timestamps": {"v": 1, "dim": [2], "data": [0.0, 0.1]},
            "frequency": 10.0
        }"#;
        assert!(serde_json::from_str::<StimulusSignal>(non_binary).is_err());

        let zero_frequency = r#"{
            "inputs": {"v": 1, "dim": [1, 2], "data": [0.0, 1.0]},
            "timestamps": {"v": 1, "dim": [2], "data": [0.0, 0.1]},
            "frequency": 0.0
        }"#;
        assert!(serde_json::from_str::<StimulusSignal>(zero_frequency).is_err());
    }

    #[test]
    fn test_protocol_dispatch() {
        let protocol = StimulusProtocol::PerRegion {
            action_s: vec![5.0, 5.0],
            rest_s: vec![25.0, 25.0],
            cycles: vec![1, 2],
        };
        assert_eq!(protocol.generate(10.0, 2).unwrap().len(), 600);
        assert!(protocol.generate(10.0, 3).is_err());

        let protocol = StimulusProtocol::Uniform { action_s: 5.0, rest_s: 25.0, cycles: 2 };
        assert_eq!(protocol.generate(10.0, 4).unwrap().channels(), 4);
    }
}
