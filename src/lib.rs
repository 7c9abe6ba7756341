//! Batch spectral classification.
//!
//! Each spectrum listed in a manifest is loaded, quality-gated, normalized,
//! classified, Doppler-corrected using that first guess, and classified
//! again. Results and rejects go to two CSV files; a reviewer can then
//! confirm or override every guess.

pub mod config;
pub mod data;
pub mod engine;
pub mod manifest;
pub mod pipeline;
pub mod review;

pub use config::RunConfig;
pub use engine::{SpectralEngine, TemplateEngine, TemplateGrid};
pub use pipeline::{run, BatchSummary, RunOutcome};
