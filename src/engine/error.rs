use thiserror::Error;

/// Failures reported by a [`SpectralEngine`](super::SpectralEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The file could not be read, parsed, or its format tag is unknown.
    #[error("{0}")]
    Load(String),

    /// An operation that needs a loaded spectrum was called without one.
    #[error("no spectrum is loaded")]
    NotLoaded,

    /// Velocity estimation was requested before any classification pass.
    #[error("spectrum has not been classified yet")]
    NotClassified,

    /// S/N is undefined for this spectrum (no variance, or no usable pixel).
    #[error("signal-to-noise cannot be computed: {0}")]
    SignalToNoiseUnavailable(String),

    /// The spectrum shares too few pixels with the template grid.
    #[error("spectrum does not overlap the template grid ({0})")]
    NoTemplateOverlap(String),

    /// No template matches the guess used to anchor the velocity search.
    #[error("no template for {0}")]
    MissingTemplate(String),
}
