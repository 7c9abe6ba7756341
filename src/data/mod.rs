/// Data layer: spectrum types and per-format loading.
///
/// Architecture:
/// ```text
///  .csv / .json / .parquet   (+ format tag from the manifest)
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Spectrum
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ Spectrum  │  wavelength, flux, optional variance
///   └──────────┘
///        │
///        ▼
///     engine      normalize, classify (→ Guess), velocity shift
/// ```

pub mod loader;
pub mod model;
