use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use super::PipelineError;
use crate::data::model::Guess;

// ---------------------------------------------------------------------------
// File layouts
// ---------------------------------------------------------------------------

pub const ACCEPT_HEADER: [&str; 6] = [
    "#Filename",
    "Radial Velocity (km/s)",
    "Guessed Spectral Type",
    "Guessed Metallicity",
    "User Spectral Type",
    "User Metallicity",
];

pub const REJECT_HEADER: [&str; 3] = ["#Filename", "File Type", "Spectra S/N"];

/// Placeholder for values that have not been filled in.
pub const MISSING: &str = "nan";
/// S/N column value when no S/N was measured.
pub const NOT_AVAILABLE: &str = "N/A";

/// Shortest round-trip decimal, keeping a trailing `.0` on integral values
/// so `12` is written as `12.0`.
pub fn format_decimal(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

fn format_metal(metal: f64) -> String {
    format!("{metal:+.1}")
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One classified spectrum. `user` stays `None` until a reviewer confirms or
/// overrides the automatic guess.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub filename: String,
    /// Radial velocity shift, km/s.
    pub shift: f64,
    pub guess: Guess,
    pub user: Option<Guess>,
}

impl OutputRecord {
    pub fn to_row(&self) -> [String; 6] {
        let (user_type, user_metal) = match &self.user {
            Some(u) => (u.type_label(), format_metal(u.metal)),
            None => (MISSING.to_string(), MISSING.to_string()),
        };
        [
            self.filename.clone(),
            format_decimal(self.shift),
            self.guess.type_label(),
            format_metal(self.guess.metal),
            user_type,
            user_metal,
        ]
    }

    /// Parse a data row of the results file.
    pub fn from_row(row: &csv::StringRecord) -> Result<Self> {
        if row.len() != ACCEPT_HEADER.len() {
            bail!("expected {} columns, found {}", ACCEPT_HEADER.len(), row.len());
        }
        let field = |i: usize| row.get(i).unwrap_or("").trim();

        let shift: f64 = field(1)
            .parse()
            .with_context(|| format!("radial velocity '{}' is not a number", field(1)))?;
        let guess = parse_guess(field(2), field(3)).context("guessed type")?;
        let user = if field(4).eq_ignore_ascii_case(MISSING) {
            None
        } else {
            Some(parse_guess(field(4), field(5)).context("user type")?)
        };

        Ok(OutputRecord {
            filename: field(0).to_string(),
            shift,
            guess,
            user,
        })
    }
}

fn parse_guess(label: &str, metal: &str) -> Result<Guess> {
    let mut guess: Guess = label.parse()?;
    guess.metal = metal
        .parse()
        .with_context(|| format!("metallicity '{metal}' is not a number"))?;
    Ok(guess)
}

/// One spectrum that never made it to classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectRecord {
    pub filename: String,
    pub format_tag: String,
    /// `None` when the spectrum failed before (or instead of) an S/N measurement.
    pub sn: Option<f64>,
}

impl RejectRecord {
    pub fn to_row(&self) -> [String; 3] {
        [
            self.filename.clone(),
            self.format_tag.clone(),
            self.sn
                .map(format_decimal)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Append-only CSV sink that writes its header line on creation.
pub struct RecordWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: usize,
}

impl<W: Write> RecordWriter<W> {
    fn with_header(sink: W, header: &[&str]) -> Result<Self, PipelineError> {
        let mut inner = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(sink);
        inner.write_record(header)?;
        Ok(RecordWriter { inner, rows: 0 })
    }

    fn push<I, T>(&mut self, row: I) -> Result<(), PipelineError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.inner.write_record(row)?;
        self.rows += 1;
        Ok(())
    }

    /// Data rows written so far (header excluded).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying sink.
    pub fn finish(self) -> Result<W, PipelineError> {
        self.inner
            .into_inner()
            .map_err(|e| PipelineError::Sink(e.into_error()))
    }
}

/// Writer for the results (accepted) file.
pub struct ResultWriter<W: Write>(RecordWriter<W>);

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W) -> Result<Self, PipelineError> {
        RecordWriter::with_header(sink, &ACCEPT_HEADER).map(ResultWriter)
    }

    pub fn write(&mut self, record: &OutputRecord) -> Result<(), PipelineError> {
        self.0.push(record.to_row())
    }

    pub fn rows(&self) -> usize {
        self.0.rows()
    }

    pub fn finish(self) -> Result<W, PipelineError> {
        self.0.finish()
    }
}

impl ResultWriter<File> {
    /// Create (or truncate) the results file at `path`.
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        Self::new(create_file(path)?)
    }
}

/// Writer for the reject file.
pub struct RejectWriter<W: Write>(RecordWriter<W>);

impl<W: Write> RejectWriter<W> {
    pub fn new(sink: W) -> Result<Self, PipelineError> {
        RecordWriter::with_header(sink, &REJECT_HEADER).map(RejectWriter)
    }

    pub fn write(&mut self, record: &RejectRecord) -> Result<(), PipelineError> {
        self.0.push(record.to_row())
    }

    pub fn rows(&self) -> usize {
        self.0.rows()
    }

    pub fn finish(self) -> Result<W, PipelineError> {
        self.0.finish()
    }
}

impl RejectWriter<File> {
    pub fn create(path: &Path) -> Result<Self, PipelineError> {
        Self::new(create_file(path)?)
    }
}

fn create_file(path: &Path) -> Result<File, PipelineError> {
    File::create(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Reading results back
// ---------------------------------------------------------------------------

/// Read every data row of a results file. The `#` header is skipped.
pub fn read_results(path: &Path) -> Result<Vec<OutputRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("opening results file {}", path.display()))?;
    let mut out = Vec::new();
    for (i, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("results row {}", i + 1))?;
        out.push(OutputRecord::from_row(&row).with_context(|| format!("results row {}", i + 1))?);
    }
    Ok(out)
}

/// Replace the results file with `records`, writing to a sibling temporary
/// file first so a crash never leaves a half-written file behind.
pub fn rewrite_results(path: &Path, records: &[OutputRecord]) -> Result<(), PipelineError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let written = (|| {
        let mut writer = ResultWriter::create(&tmp)?;
        for record in records {
            writer.write(record)?;
        }
        writer.finish()?.sync_all().map_err(PipelineError::Sink)
    })();
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}
