//! Two-pass type/velocity refinement as an explicit state chain:
//!
//! ```text
//! Loaded ─classify→ CoarseClassified ─estimate→ VelocityEstimated
//!        ─shift→ RestFramed ─classify→ FinalClassified
//! ```
//!
//! Velocity templates depend on the type, and accurate sub-typing needs rest
//! wavelengths, so a coarse guess on the observed spectrum seeds exactly one
//! velocity estimate. There is no iteration to convergence.

use log::debug;

use crate::data::model::Guess;
use crate::engine::{EngineError, SpectralEngine};

/// A normalized spectrum sitting in the engine, still on observed wavelengths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loaded;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoarseClassified {
    pub coarse: Guess,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityEstimated {
    pub coarse: Guess,
    pub shift: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestFramed {
    pub coarse: Guess,
    pub shift: f64,
}

/// End state. `guess` is the reportable result; `coarse` is kept only for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FinalClassified {
    pub coarse: Guess,
    pub guess: Guess,
    pub shift: f64,
}

impl Loaded {
    pub fn classify<E: SpectralEngine + ?Sized>(
        self,
        engine: &mut E,
    ) -> Result<CoarseClassified, EngineError> {
        let coarse = engine.classify()?;
        debug!("coarse guess {coarse}");
        Ok(CoarseClassified { coarse })
    }
}

impl CoarseClassified {
    pub fn estimate_velocity<E: SpectralEngine + ?Sized>(
        self,
        engine: &E,
    ) -> Result<VelocityEstimated, EngineError> {
        let shift = engine.estimate_velocity_shift()?;
        debug!("radial velocity {shift} km/s");
        Ok(VelocityEstimated {
            coarse: self.coarse,
            shift,
        })
    }
}

impl VelocityEstimated {
    pub fn shift_to_rest<E: SpectralEngine + ?Sized>(
        self,
        engine: &mut E,
    ) -> Result<RestFramed, EngineError> {
        engine.apply_shift(self.shift)?;
        Ok(RestFramed {
            coarse: self.coarse,
            shift: self.shift,
        })
    }
}

impl RestFramed {
    pub fn classify<E: SpectralEngine + ?Sized>(
        self,
        engine: &mut E,
    ) -> Result<FinalClassified, EngineError> {
        let guess = engine.classify()?;
        debug!("final guess {guess}");
        Ok(FinalClassified {
            coarse: self.coarse,
            guess,
            shift: self.shift,
        })
    }
}

/// Run the whole chain on the engine's current spectrum.
pub fn refine<E: SpectralEngine + ?Sized>(engine: &mut E) -> Result<FinalClassified, EngineError> {
    Loaded
        .classify(engine)?
        .estimate_velocity(engine)?
        .shift_to_rest(engine)?
        .classify(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::SpectralType;
    use crate::pipeline::fake::{FakeEngine, FakeSpectrum};
    use std::path::Path;

    fn guess(spec_type: SpectralType, sub_type: u8, metal: f64) -> Guess {
        Guess {
            spec_type,
            sub_type,
            metal,
        }
    }

    #[test]
    fn final_state_carries_second_pass() {
        let coarse = guess(SpectralType::G, 0, 0.0);
        let fine = guess(SpectralType::K, 5, -0.5);
        let mut engine = FakeEngine::default().with("a.csv", FakeSpectrum::new(coarse, fine, 42.0));
        engine.load(Path::new("a.csv"), "csv").unwrap();

        let done = refine(&mut engine).unwrap();
        assert_eq!(done.coarse, coarse);
        assert_eq!(done.guess, fine);
        assert_eq!(done.shift, 42.0);
        assert_eq!(
            engine.calls(),
            vec!["load a.csv", "classify", "estimate", "shift 42", "classify"]
        );
    }

    #[test]
    fn each_step_can_be_driven_alone() {
        let coarse = guess(SpectralType::M, 0, 0.0);
        let fine = guess(SpectralType::M, 5, 0.0);
        let mut engine =
            FakeEngine::default().with("a.csv", FakeSpectrum::new(coarse, fine, -10.0));
        engine.load(Path::new("a.csv"), "csv").unwrap();

        let c = Loaded.classify(&mut engine).unwrap();
        assert_eq!(c.coarse, coarse);
        let v = c.estimate_velocity(&engine).unwrap();
        assert_eq!(v.shift, -10.0);
        let r = v.shift_to_rest(&mut engine).unwrap();
        assert_eq!(r.shift, -10.0);
        assert_eq!(r.classify(&mut engine).unwrap().guess, fine);
    }

    #[test]
    fn velocity_failure_stops_the_chain() {
        let g = guess(SpectralType::F, 5, 0.0);
        let mut spectrum = FakeSpectrum::new(g, g, 0.0);
        spectrum.velocity_error = Some("no overlap".into());
        let mut engine = FakeEngine::default().with("a.csv", spectrum);
        engine.load(Path::new("a.csv"), "csv").unwrap();

        assert!(refine(&mut engine).is_err());
        assert_eq!(engine.calls(), vec!["load a.csv", "classify", "estimate"]);
    }
}
