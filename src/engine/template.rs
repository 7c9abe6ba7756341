use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{to_rest_frame, EngineError, SpectralEngine};
use crate::data::loader::load_spectrum;
use crate::data::model::{Guess, SpectralType, Spectrum};

/// Wavelength (Å) at which spectra and templates are normalized.
pub const NORMALIZATION_POINT: f64 = 8000.0;
/// Half-width (Å) of the window averaged around the normalization point.
const NORMALIZATION_HALF_WIDTH: f64 = 10.0;

/// Velocity search range and step, km/s.
pub const MAX_VELOCITY_KMS: f64 = 1000.0;
pub const VELOCITY_STEP_KMS: f64 = 5.0;

/// Pixels a spectrum must share with a template for a comparison to count.
const MIN_OVERLAP: usize = 20;

// ---------------------------------------------------------------------------
// Template grid
// ---------------------------------------------------------------------------

/// One reference spectrum of known type and metallicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub spec_type: SpectralType,
    pub sub_type: u8,
    pub metal: f64,
    pub wavelength: Vec<f64>,
    pub flux: Vec<f64>,
}

impl Template {
    pub fn guess(&self) -> Guess {
        Guess {
            spec_type: self.spec_type,
            sub_type: self.sub_type,
            metal: self.metal,
        }
    }
}

/// The fixed set of templates spectra are classified against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateGrid {
    templates: Vec<Template>,
}

impl TemplateGrid {
    /// Build a grid, normalizing every template at [`NORMALIZATION_POINT`].
    pub fn new(templates: Vec<Template>) -> Result<Self> {
        if templates.is_empty() {
            bail!("template grid is empty");
        }
        let mut normalized = Vec::with_capacity(templates.len());
        for template in templates {
            let Template {
                spec_type,
                sub_type,
                metal,
                wavelength,
                flux,
            } = template;
            // Templates obey the same array invariants as observed spectra.
            let checked = Spectrum::new(wavelength, flux, None)
                .with_context(|| format!("template {spec_type}{sub_type} [Fe/H]={metal:+.1}"))?;
            let mut flux = checked.flux;
            if let Some(scale) = normalization_scale(&checked.wavelength, &flux) {
                flux.iter_mut().for_each(|f| *f /= scale);
            }
            normalized.push(Template {
                spec_type,
                sub_type,
                metal,
                wavelength: checked.wavelength,
                flux,
            });
        }
        Ok(TemplateGrid {
            templates: normalized,
        })
    }

    /// Read a grid written as
    /// `{ "templates": [ {spec_type, sub_type, metal, wavelength, flux}, ... ] }`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading template grid {}", path.display()))?;
        let raw: TemplateGrid = serde_json::from_str(&text)
            .with_context(|| format!("parsing template grid {}", path.display()))?;
        Self::new(raw.templates)
    }

    /// A small analytic grid: flat continuum with Gaussian absorption lines
    /// whose depths vary smoothly with type and metallicity. Good enough to
    /// exercise the pipeline end to end; not a physical model.
    pub fn synthetic() -> Self {
        let wavelength: Vec<f64> = (0..=1200).map(|i| 7700.0 + i as f64 * 0.5).collect();
        let mut templates = Vec::new();
        for spec_type in SpectralType::ALL {
            for sub_type in [0u8, 5] {
                for metal in [-1.0, 0.0] {
                    let lines = synthetic_lines(spec_type, sub_type, metal);
                    // Unit continuum, so already normalized at 8000 Å.
                    templates.push(Template {
                        spec_type,
                        sub_type,
                        metal,
                        flux: absorption_profile(&wavelength, &lines, SYNTHETIC_LINE_WIDTH),
                        wavelength: wavelength.clone(),
                    });
                }
            }
        }
        TemplateGrid { templates }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template with the guess's class and sub-type, closest in metallicity.
    pub fn closest(&self, guess: &Guess) -> Option<&Template> {
        self.templates
            .iter()
            .filter(|t| t.spec_type == guess.spec_type && t.sub_type == guess.sub_type)
            .min_by(|a, b| {
                (a.metal - guess.metal)
                    .abs()
                    .total_cmp(&(b.metal - guess.metal).abs())
            })
    }
}

/// Gaussian sigma (Å) of the synthetic grid's lines.
pub const SYNTHETIC_LINE_WIDTH: f64 = 3.0;

/// `(centre, depth)` pairs for the synthetic grid.
pub fn synthetic_lines(spec_type: SpectralType, sub_type: u8, metal: f64) -> Vec<(f64, f64)> {
    // 0.0 for O0, 1.0 for L5.
    let coolness = (spec_type.index() as f64 * 10.0 + sub_type as f64) / 75.0;
    vec![
        (7850.0, 0.6 * (1.0 - coolness)),
        (7950.0, 0.6 * coolness),
        (8100.0, 0.3 + 0.3 * (std::f64::consts::PI * coolness).sin()),
        (8200.0, 0.25 * (1.0 + 0.5 * metal)),
    ]
}

/// Unit continuum with Gaussian absorption lines.
pub fn absorption_profile(wavelength: &[f64], lines: &[(f64, f64)], sigma: f64) -> Vec<f64> {
    wavelength
        .iter()
        .map(|&w| {
            let absorbed: f64 = lines
                .iter()
                .map(|&(mu, depth)| depth * (-(w - mu).powi(2) / (2.0 * sigma.powi(2))).exp())
                .sum();
            1.0 - absorbed
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

/// Everything the engine knows about the spectrum it currently holds.
/// Built from scratch on every successful load.
#[derive(Debug, Clone)]
struct LoadedState {
    observed_wavelength: Vec<f64>,
    /// Working wavelength scale; equals `observed_wavelength` until shifted.
    rest_wavelength: Vec<f64>,
    flux: Vec<f64>,
    variance: Option<Vec<f64>>,
    normalized: bool,
    guess: Option<Guess>,
}

impl LoadedState {
    fn from_spectrum(spectrum: Spectrum) -> Self {
        LoadedState {
            rest_wavelength: spectrum.wavelength.clone(),
            observed_wavelength: spectrum.wavelength,
            flux: spectrum.flux,
            variance: spectrum.variance,
            normalized: false,
            guess: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Chi-square template matcher over a [`TemplateGrid`].
pub struct TemplateEngine {
    grid: TemplateGrid,
    current: Option<LoadedState>,
}

impl TemplateEngine {
    pub fn new(grid: TemplateGrid) -> Self {
        TemplateEngine {
            grid,
            current: None,
        }
    }

    pub fn grid(&self) -> &TemplateGrid {
        &self.grid
    }

    fn state(&self) -> Result<&LoadedState, EngineError> {
        self.current.as_ref().ok_or(EngineError::NotLoaded)
    }

    fn state_mut(&mut self) -> Result<&mut LoadedState, EngineError> {
        self.current.as_mut().ok_or(EngineError::NotLoaded)
    }
}

impl SpectralEngine for TemplateEngine {
    fn load(&mut self, path: &Path, format_tag: &str) -> Result<(), EngineError> {
        // Drop the previous spectrum first so a failed load never leaves it behind.
        self.current = None;
        let spectrum =
            load_spectrum(path, format_tag).map_err(|e| EngineError::Load(format!("{e:#}")))?;
        debug!("loaded {} ({} pixels)", path.display(), spectrum.len());
        self.current = Some(LoadedState::from_spectrum(spectrum));
        Ok(())
    }

    fn signal_to_noise(&self) -> Result<f64, EngineError> {
        let state = self.state()?;
        let Some(variance) = &state.variance else {
            return Err(EngineError::SignalToNoiseUnavailable(
                "spectrum has no variance".into(),
            ));
        };
        let mut ratios: Vec<f64> = state
            .flux
            .iter()
            .zip(variance)
            .filter(|(f, v)| f.is_finite() && v.is_finite() && **v > 0.0)
            .map(|(f, v)| f / v.sqrt())
            .collect();
        median(&mut ratios).ok_or_else(|| {
            EngineError::SignalToNoiseUnavailable("no pixel has a positive finite variance".into())
        })
    }

    fn normalize(&mut self) -> Result<(), EngineError> {
        let state = self.state_mut()?;
        if state.normalized {
            return Ok(());
        }
        match normalization_scale(&state.rest_wavelength, &state.flux) {
            Some(scale) => {
                state.flux.iter_mut().for_each(|f| *f /= scale);
                if let Some(var) = state.variance.as_mut() {
                    var.iter_mut().for_each(|v| *v /= scale * scale);
                }
            }
            None => warn!("flux has no usable level to normalize by; leaving it unscaled"),
        }
        state.normalized = true;
        Ok(())
    }

    fn classify(&mut self) -> Result<Guess, EngineError> {
        let grid = &self.grid;
        let state = self.current.as_mut().ok_or(EngineError::NotLoaded)?;

        let mut best: Option<(f64, &Template)> = None;
        for template in grid.templates() {
            let Some(score) = mean_chi_square(
                &state.rest_wavelength,
                &state.flux,
                state.variance.as_deref(),
                template,
            ) else {
                continue;
            };
            if best.map_or(true, |(b, _)| score < b) {
                best = Some((score, template));
            }
        }

        let (score, template) = best.ok_or_else(|| {
            EngineError::NoTemplateOverlap(format!("{} templates tried", grid.len()))
        })?;
        let guess = template.guess();
        debug!("classified as {guess} (mean chi2 {score:.4})");
        state.guess = Some(guess);
        Ok(guess)
    }

    fn estimate_velocity_shift(&self) -> Result<f64, EngineError> {
        let state = self.state()?;
        let guess = state.guess.ok_or(EngineError::NotClassified)?;
        let template = self
            .grid
            .closest(&guess)
            .ok_or_else(|| EngineError::MissingTemplate(guess.to_string()))?;

        let steps = (2.0 * MAX_VELOCITY_KMS / VELOCITY_STEP_KMS).round() as usize;
        let mut trial = vec![0.0; state.observed_wavelength.len()];
        let mut best: Option<(f64, f64)> = None;
        for i in 0..=steps {
            let v = -MAX_VELOCITY_KMS + i as f64 * VELOCITY_STEP_KMS;
            for (t, &w) in trial.iter_mut().zip(&state.observed_wavelength) {
                *t = to_rest_frame(w, v);
            }
            let Some(score) =
                mean_chi_square(&trial, &state.flux, state.variance.as_deref(), template)
            else {
                continue;
            };
            if best.map_or(true, |(b, _)| score < b) {
                best = Some((score, v));
            }
        }

        let (_, shift) = best.ok_or_else(|| {
            EngineError::NoTemplateOverlap(format!("template {}", guess.type_label()))
        })?;
        Ok(shift)
    }

    fn apply_shift(&mut self, shift_kms: f64) -> Result<(), EngineError> {
        let state = self.state_mut()?;
        state.rest_wavelength = state
            .observed_wavelength
            .iter()
            .map(|&w| to_rest_frame(w, shift_kms))
            .collect();
        Ok(())
    }

    fn guess(&self) -> Option<Guess> {
        self.current.as_ref().and_then(|s| s.guess)
    }
}

// ---------------------------------------------------------------------------
// Numeric helpers
// ---------------------------------------------------------------------------

/// Median of the finite values; reorders `values`.
fn median(values: &mut Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Flux level at the normalization point, or the overall median when the
/// spectrum does not cover it. `None` if no positive level exists.
fn normalization_scale(wavelength: &[f64], flux: &[f64]) -> Option<f64> {
    let mut window: Vec<f64> = wavelength
        .iter()
        .zip(flux)
        .filter(|(w, _)| (**w - NORMALIZATION_POINT).abs() <= NORMALIZATION_HALF_WIDTH)
        .map(|(_, f)| *f)
        .collect();
    let level = median(&mut window).or_else(|| median(&mut flux.to_vec()))?;
    (level > 0.0).then_some(level)
}

/// Linear interpolation of `(xs, ys)` at `x`; `None` outside the range.
fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> Option<f64> {
    let first = *xs.first()?;
    let last = *xs.last()?;
    if x < first || x > last {
        return None;
    }
    let hi = xs.partition_point(|&v| v < x);
    if hi == 0 {
        return Some(ys[0]);
    }
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    let t = (x - xs[lo]) / span;
    Some(ys[lo] + t * (ys[hi] - ys[lo]))
}

/// Mean (variance-weighted when available) squared residual between the
/// spectrum and the template over the pixels they share.
fn mean_chi_square(
    wavelength: &[f64],
    flux: &[f64],
    variance: Option<&[f64]>,
    template: &Template,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for (i, (&w, &f)) in wavelength.iter().zip(flux).enumerate() {
        if !f.is_finite() {
            continue;
        }
        let weight = match variance {
            Some(var) if var[i].is_finite() && var[i] > 0.0 => 1.0 / var[i],
            Some(_) => continue,
            None => 1.0,
        };
        let Some(model) = interpolate(&template.wavelength, &template.flux, w) else {
            continue;
        };
        sum += weight * (f - model).powi(2);
        n += 1;
    }
    (n >= MIN_OVERLAP).then(|| sum / n as f64)
}
