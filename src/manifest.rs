//! Input manifest: one spectrum per line, `<path> <formatTag>` or
//! `<path>,<formatTag>`.

use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use thiserror::Error;

/// Basename prefix that marks a manifest the program created itself and may delete.
pub const TRANSIENT_PREFIX: &str = "temp_input_";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest line {line}: expected '<path> <format>', got {text:?}")]
    MissingFormatTag { line: usize, text: String },
}

/// One line of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumDescriptor {
    /// Path as written in the manifest (relative to the spectra root, or full).
    pub path: String,
    pub format_tag: String,
}

impl SpectrumDescriptor {
    /// Resolve against the spectra root; absolute paths are kept as is.
    pub fn resolve(&self, spectra_root: Option<&Path>) -> PathBuf {
        match spectra_root {
            Some(root) => root.join(&self.path),
            None => PathBuf::from(&self.path),
        }
    }

    /// File name for progress messages.
    pub fn display_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// Parse one manifest line. Blank lines give `Ok(None)`.
///
/// Commas become whitespace, runs of whitespace collapse, the last token is
/// the format tag and everything before it (rejoined with single spaces) is
/// the path.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<SpectrumDescriptor>, ManifestError> {
    let normalized = line.trim().replace(',', " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    match tokens.split_last() {
        None => Ok(None),
        Some((_, [])) => Err(ManifestError::MissingFormatTag {
            line: line_no,
            text: line.trim().to_string(),
        }),
        Some((tag, path)) => Ok(Some(SpectrumDescriptor {
            path: path.join(" "),
            format_tag: tag.to_string(),
        })),
    }
}

/// Parse every line of a manifest, in order.
pub fn parse_manifest<R: BufRead>(reader: R) -> Result<Vec<SpectrumDescriptor>, ManifestError> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ManifestError::Io {
            path: PathBuf::from("<manifest>"),
            source,
        })?;
        if let Some(desc) = parse_line(&line, i + 1)? {
            out.push(desc);
        }
    }
    Ok(out)
}

pub fn read_manifest(path: &Path) -> Result<Vec<SpectrumDescriptor>, ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).map_err(io_err)?;
    let descriptors = parse_manifest(BufReader::new(file)).map_err(|e| match e {
        ManifestError::Io { source, .. } => io_err(source),
        other => other,
    })?;
    debug!("{} spectra listed in {}", descriptors.len(), path.display());
    Ok(descriptors)
}

// ---------------------------------------------------------------------------
// Transient manifests
// ---------------------------------------------------------------------------

pub fn is_transient(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TRANSIENT_PREFIX))
}

/// Write a transient manifest listing every regular file in `dir` (sorted by
/// name) with `format_tag`, and return its path. Entries are full paths.
pub fn write_directory_manifest(
    dir: &Path,
    format_tag: &str,
    out_dir: &Path,
) -> io::Result<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = out_dir.join(format!("{TRANSIENT_PREFIX}{stamp}.txt"));
    let mut out = io::BufWriter::new(fs::File::create(&path)?);
    for file in &files {
        writeln!(out, "{} {}", file.display(), format_tag)?;
    }
    out.flush()?;
    info!(
        "Listed {} files from {} in {}",
        files.len(),
        dir.display(),
        path.display()
    );
    Ok(path)
}

/// Delete `path` if it is a transient manifest. Returns whether it was removed.
pub fn cleanup_transient(path: &Path) -> io::Result<bool> {
    if !is_transient(path) || !path.exists() {
        return Ok(false);
    }
    fs::remove_file(path)?;
    debug!("removed transient manifest {}", path.display());
    Ok(true)
}
