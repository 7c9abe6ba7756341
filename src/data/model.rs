use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SpectralType – the coarse MK class
// ---------------------------------------------------------------------------

/// Coarse spectral class, ordered from hottest to coolest.
///
/// The discriminant is the numeric type index used by the template grid
/// (`O = 0` … `L = 7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpectralType {
    O,
    B,
    A,
    F,
    G,
    K,
    M,
    L,
}

impl SpectralType {
    pub const ALL: [SpectralType; 8] = [
        SpectralType::O,
        SpectralType::B,
        SpectralType::A,
        SpectralType::F,
        SpectralType::G,
        SpectralType::K,
        SpectralType::M,
        SpectralType::L,
    ];

    /// Translate a numeric type index into its class.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Single-letter code written to the results file.
    pub fn letter(self) -> char {
        match self {
            SpectralType::O => 'O',
            SpectralType::B => 'B',
            SpectralType::A => 'A',
            SpectralType::F => 'F',
            SpectralType::G => 'G',
            SpectralType::K => 'K',
            SpectralType::M => 'M',
            SpectralType::L => 'L',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.letter() == c.to_ascii_uppercase())
    }
}

impl fmt::Display for SpectralType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

// ---------------------------------------------------------------------------
// Guess – one classification result
// ---------------------------------------------------------------------------

/// Best-matching template parameters for a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Guess {
    pub spec_type: SpectralType,
    pub sub_type: u8,
    /// [Fe/H] in dex.
    pub metal: f64,
}

impl Guess {
    /// `K5`, `M0`, …
    pub fn type_label(&self) -> String {
        format!("{}{}", self.spec_type.letter(), self.sub_type)
    }
}

impl fmt::Display for Guess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [Fe/H]={:+.1}", self.type_label(), self.metal)
    }
}

impl FromStr for Guess {
    type Err = anyhow::Error;

    /// Accepts `<letter><subtype>` with an optional whitespace-separated
    /// metallicity, e.g. `K5` or `M2 -0.5`. A missing metallicity is `0.0`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let label = match parts.next() {
            Some(l) => l,
            None => bail!("empty spectral type"),
        };
        let mut chars = label.chars();
        let letter = chars.next().unwrap_or(' ');
        let Some(spec_type) = SpectralType::from_letter(letter) else {
            bail!("unknown spectral class '{letter}' in '{label}'");
        };
        let sub: &str = chars.as_str();
        let sub_type: u8 = match sub.parse() {
            Ok(v) if v <= 9 => v,
            _ => bail!("sub-type must be a digit 0-9, got '{sub}'"),
        };
        let metal = match parts.next() {
            Some(m) => match m.parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => bail!("metallicity '{m}' is not a number"),
            },
            None => 0.0,
        };
        if parts.next().is_some() {
            bail!("expected '<type> [metal]', got '{s}'");
        }
        Ok(Guess {
            spec_type,
            sub_type,
            metal,
        })
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one observed 1-D spectrum
// ---------------------------------------------------------------------------

/// An observed spectrum on its own wavelength grid (Ångström, vacuum).
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Strictly increasing wavelengths.
    pub wavelength: Vec<f64>,
    /// Flux – same length as `wavelength`.
    pub flux: Vec<f64>,
    /// Per-pixel variance, when the file provides one.
    pub variance: Option<Vec<f64>>,
}

impl Spectrum {
    /// Build a spectrum, checking the array invariants every loader relies on.
    pub fn new(wavelength: Vec<f64>, flux: Vec<f64>, variance: Option<Vec<f64>>) -> Result<Self> {
        if wavelength.is_empty() {
            bail!("spectrum has no pixels");
        }
        if wavelength.len() != flux.len() {
            bail!(
                "wavelength has {} values but flux has {}",
                wavelength.len(),
                flux.len()
            );
        }
        if let Some(var) = &variance {
            if var.len() != wavelength.len() {
                bail!(
                    "wavelength has {} values but variance has {}",
                    wavelength.len(),
                    var.len()
                );
            }
        }
        if wavelength.iter().any(|w| !w.is_finite()) {
            bail!("wavelength contains non-finite values");
        }
        if wavelength.windows(2).any(|w| w[1] <= w[0]) {
            bail!("wavelength must be strictly increasing");
        }
        Ok(Spectrum {
            wavelength,
            flux,
            variance,
        })
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.wavelength.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelength.is_empty()
    }
}
