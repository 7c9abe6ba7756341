//! Spectral measurement engine.
//!
//! The orchestrator only talks to an engine through [`SpectralEngine`]. One
//! engine instance is reused for a whole batch, so every implementation must
//! treat a successful [`load`](SpectralEngine::load) as a full reset: nothing
//! derived from the previous spectrum (rest wavelengths, guess, normalization)
//! may survive it. A failed load leaves the engine with no spectrum at all.

mod error;
pub mod template;

use std::path::Path;

pub use error::EngineError;
pub use template::{Template, TemplateEngine, TemplateGrid};

use crate::data::model::Guess;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KMS: f64 = 299_792.458;

/// Stateful per-spectrum processor.
pub trait SpectralEngine {
    /// Replace the current spectrum with the one at `path`. On error the
    /// message is a human-readable diagnostic.
    fn load(&mut self, path: &Path, format_tag: &str) -> Result<(), EngineError>;

    /// Scalar quality metric of the loaded spectrum.
    fn signal_to_noise(&self) -> Result<f64, EngineError>;

    /// Rescale the flux to the reference normalization point. Idempotent.
    fn normalize(&mut self) -> Result<(), EngineError>;

    /// Classify the spectrum on its current wavelength scale and store the
    /// result as the engine's current guess.
    fn classify(&mut self) -> Result<Guess, EngineError>;

    /// Radial velocity (km/s) that brings the observed spectrum to rest,
    /// anchored on the current guess. Independent of earlier shifts.
    fn estimate_velocity_shift(&self) -> Result<f64, EngineError>;

    /// Move the working wavelength scale to rest frame for `shift_kms`.
    fn apply_shift(&mut self, shift_kms: f64) -> Result<(), EngineError>;

    /// The most recent guess for the loaded spectrum, if classified.
    fn guess(&self) -> Option<Guess>;
}

/// Doppler-correct an observed wavelength for a radial velocity in km/s.
pub fn to_rest_frame(observed: f64, shift_kms: f64) -> f64 {
    observed / (1.0 + shift_kms / SPEED_OF_LIGHT_KMS)
}
