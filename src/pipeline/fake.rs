//! Scripted engine for orchestrator tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use crate::data::model::Guess;
use crate::engine::{EngineError, SpectralEngine};

#[derive(Debug, Clone)]
pub struct FakeSpectrum {
    pub sn: Option<f64>,
    /// Returned by `classify` before any shift is applied.
    pub coarse: Guess,
    /// Returned by `classify` after `apply_shift`.
    pub fine: Guess,
    pub shift: f64,
    pub velocity_error: Option<String>,
}

impl FakeSpectrum {
    pub fn new(coarse: Guess, fine: Guess, shift: f64) -> Self {
        FakeSpectrum {
            sn: Some(10.0),
            coarse,
            fine,
            shift,
            velocity_error: None,
        }
    }

    pub fn sn(mut self, sn: Option<f64>) -> Self {
        self.sn = sn;
        self
    }
}

/// Serves spectra keyed by file name; anything else fails to load.
#[derive(Debug, Default)]
pub struct FakeEngine {
    spectra: BTreeMap<String, FakeSpectrum>,
    current: Option<FakeSpectrum>,
    shifted: bool,
    guess: Option<Guess>,
    calls: RefCell<Vec<String>>,
}

impl FakeEngine {
    pub fn with(mut self, name: &str, spectrum: FakeSpectrum) -> Self {
        self.spectra.insert(name.to_string(), spectrum);
        self
    }

    /// Every engine call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }

    fn current(&self) -> Result<&FakeSpectrum, EngineError> {
        self.current.as_ref().ok_or(EngineError::NotLoaded)
    }
}

impl SpectralEngine for FakeEngine {
    fn load(&mut self, path: &Path, _format_tag: &str) -> Result<(), EngineError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        self.record(format!("load {name}"));
        self.current = None;
        self.shifted = false;
        self.guess = None;
        let spectrum = self
            .spectra
            .get(&name)
            .cloned()
            .ok_or_else(|| EngineError::Load(format!("File not found: {name}")))?;
        self.current = Some(spectrum);
        Ok(())
    }

    fn signal_to_noise(&self) -> Result<f64, EngineError> {
        let spectrum = self.current()?;
        self.record("sn");
        spectrum
            .sn
            .ok_or_else(|| EngineError::SignalToNoiseUnavailable("no variance".into()))
    }

    fn normalize(&mut self) -> Result<(), EngineError> {
        self.current()?;
        self.record("normalize");
        Ok(())
    }

    fn classify(&mut self) -> Result<Guess, EngineError> {
        let spectrum = self.current()?;
        let guess = if self.shifted {
            spectrum.fine
        } else {
            spectrum.coarse
        };
        self.record("classify");
        self.guess = Some(guess);
        Ok(guess)
    }

    fn estimate_velocity_shift(&self) -> Result<f64, EngineError> {
        let spectrum = self.current()?;
        self.record("estimate");
        self.guess.ok_or(EngineError::NotClassified)?;
        match &spectrum.velocity_error {
            Some(msg) => Err(EngineError::NoTemplateOverlap(msg.clone())),
            None => Ok(spectrum.shift),
        }
    }

    fn apply_shift(&mut self, shift_kms: f64) -> Result<(), EngineError> {
        self.current()?;
        self.record(format!("shift {shift_kms}"));
        self.shifted = true;
        Ok(())
    }

    fn guess(&self) -> Option<Guess> {
        self.guess
    }
}
