//! Bilinear fNIRS Core - Forward model of the fNIRS signal
//!
//! Predicts the optical signal an fNIRS sensor would observe for a block
//! design stimulus, by chaining three coupled models and optional noise:
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────────┐   ┌────────┐   ┌───────┐
//! │ Stimulus │──▶│ Neurodynamics │──▶│ Hemodynamics  │──▶│ Optics │──▶│ Noise │
//! │ U (m×T)  │   │ Z (T×n)       │   │ q, p (n×T)    │   │ Y(2n×T)│   │       │
//! └──────────┘   └───────────────┘   └───────────────┘   └────────┘   └───────┘
//! ```
//!
//! # Modules
//!
//! - [`stimulus`]: block-design input trains
//! - [`neuro`]: bilinear neural state integration
//! - [`hemo`]: balloon-model hemodynamics
//! - [`optics`]: concentration changes and optical density
//! - [`noise`]: calibrated white, physiological and empirical noise
//! - [`pipeline`]: [`ForwardModel`] chaining the stages
//!
//! # Example
//!
//! ```no_run
//! use bilinear_fnirs_core::{presets, ForwardModel};
//!
//! let model = ForwardModel::new(presets::two_region()?)?;
//! let output = model.simulate()?;
//! assert_eq!(output.optical.dim(), (4, 600));
//! # Ok::<(), bilinear_fnirs_core::SimulationError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod constants;
pub mod error;
pub mod hemo;
pub mod neuro;
pub mod noise;
pub mod optics;
pub mod params;
pub mod pipeline;
pub mod spectral;
pub mod stimulus;

pub use constants::{BalloonConstants, OpticalConstants, PhysiologicalRhythm};
pub use error::{SimulationError, SimulationResult, Stage};
pub use hemo::{HemodynamicState, RegionalBalloon};
pub use neuro::NeurodynamicState;
pub use noise::{
    GainPolicy, HemoglobinTraceBank, NoiseInjector, NoiseKind, NoiseSpecification, NoisySignal,
    TraceBank, TraceSupplier,
};
pub use optics::HemoglobinChanges;
pub use params::{presets, SimulationParameters};
pub use pipeline::{ForwardModel, NoiseTarget, NoisySimulation, SimulationConfig, SimulationOutput};
pub use stimulus::{StimulusProtocol, StimulusSignal};
