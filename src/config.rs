use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_ACCEPT_FILE: &str = "PyHammerResults.csv";
pub const DEFAULT_REJECT_FILE: &str = "RejectSpectra.csv";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("The input file cannot be found: {0}")]
    ManifestNotFound(PathBuf),
    #[error("The input file must be a text file: {0}")]
    ManifestNotText(PathBuf),
    #[error("There is no results file to review: {0}")]
    ResultsNotFound(PathBuf),
    #[error("The {which} file must be a csv file: {path}")]
    OutputNotCsv { which: &'static str, path: PathBuf },
    #[error("The path provided is not a valid directory: {0}")]
    SpectraRootNotDirectory(PathBuf),
    #[error("The S/N cut must be a non-negative number, got {0}")]
    InvalidSnFloor(f64),
    #[error("A S/N cut is unnecessary when skipping straight to review")]
    SnFloorWithSkip,
    #[error("The template grid cannot be found: {0}")]
    TemplatesNotFound(PathBuf),
}

/// Everything one run needs, checked once by [`RunConfig::validate`] and
/// read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub manifest_path: PathBuf,
    pub accept_path: PathBuf,
    pub reject_path: PathBuf,
    /// Prepended to relative manifest entries; `None` when the manifest
    /// already lists full paths.
    pub spectra_root: Option<PathBuf>,
    pub skip_to_review: bool,
    pub sn_floor: Option<f64>,
    /// Template grid JSON; the built-in synthetic grid is used when absent.
    pub templates_path: Option<PathBuf>,
}

impl RunConfig {
    /// Fill in defaults and extensions, then check every path and threshold.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.manifest_path = with_default_extension(&self.manifest_path, "txt");
        if !has_extension(&self.manifest_path, "txt") {
            return Err(ConfigError::ManifestNotText(self.manifest_path));
        }
        if !self.skip_to_review && !self.manifest_path.is_file() {
            return Err(ConfigError::ManifestNotFound(self.manifest_path));
        }

        self.accept_path = with_default_extension(&self.accept_path, "csv");
        if !has_extension(&self.accept_path, "csv") {
            return Err(ConfigError::OutputNotCsv {
                which: "results",
                path: self.accept_path,
            });
        }
        self.reject_path = with_default_extension(&self.reject_path, "csv");
        if !has_extension(&self.reject_path, "csv") {
            return Err(ConfigError::OutputNotCsv {
                which: "reject",
                path: self.reject_path,
            });
        }

        if let Some(root) = &self.spectra_root {
            if !root.is_dir() {
                return Err(ConfigError::SpectraRootNotDirectory(root.clone()));
            }
        }

        if let Some(floor) = self.sn_floor {
            if self.skip_to_review {
                return Err(ConfigError::SnFloorWithSkip);
            }
            if !floor.is_finite() || floor < 0.0 {
                return Err(ConfigError::InvalidSnFloor(floor));
            }
        }

        if self.skip_to_review && !self.accept_path.is_file() {
            return Err(ConfigError::ResultsNotFound(self.accept_path));
        }

        if let Some(templates) = &self.templates_path {
            if !self.skip_to_review && !templates.is_file() {
                return Err(ConfigError::TemplatesNotFound(templates.clone()));
            }
        }

        Ok(self)
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Append `.ext` when the file name has no extension at all.
fn with_default_extension(path: &Path, ext: &str) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        let mut os = path.as_os_str().to_owned();
        os.push(".");
        os.push(ext);
        PathBuf::from(os)
    }
}
