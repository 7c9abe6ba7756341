use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float32Array, Float64Array};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use super::model::Spectrum;

// ---------------------------------------------------------------------------
// Format tags
// ---------------------------------------------------------------------------

/// On-disk layout of a spectrum, as named by the manifest's format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumFormat {
    Csv,
    Json,
    Parquet,
}

impl SpectrumFormat {
    /// Guess the format from a file extension (used when no tag is at hand,
    /// e.g. when the reviewer reloads a spectrum).
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        ext.parse().ok()
    }
}

impl FromStr for SpectrumFormat {
    type Err = anyhow::Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "csv" | "txt" => Ok(SpectrumFormat::Csv),
            "json" => Ok(SpectrumFormat::Json),
            "parquet" | "pq" => Ok(SpectrumFormat::Parquet),
            other => bail!("Unsupported spectrum format tag: '{other}'"),
        }
    }
}

impl fmt::Display for SpectrumFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            SpectrumFormat::Csv => "csv",
            SpectrumFormat::Json => "json",
            SpectrumFormat::Parquet => "parquet",
        };
        write!(f, "{tag}")
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one spectrum from `path`, interpreting it according to `format_tag`.
///
/// Supported tags:
/// * `csv`     – header row with `wavelength`, `flux` and optional `variance`
/// * `json`    – `{ "wavelength": [...], "flux": [...], "variance": [...] }`
/// * `parquet` – Float64/Float32 columns `wavelength`, `flux`, optional `variance`
pub fn load_spectrum(path: &Path, format_tag: &str) -> Result<Spectrum> {
    let format: SpectrumFormat = format_tag.parse()?;
    if !path.is_file() {
        bail!("File not found: {}", path.display());
    }
    match format {
        SpectrumFormat::Csv => load_csv(path),
        SpectrumFormat::Json => load_json(path),
        SpectrumFormat::Parquet => load_parquet(path),
    }
    .with_context(|| format!("reading {format} spectrum {}", path.display()))
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JsonSpectrum {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    #[serde(default)]
    variance: Option<Vec<f64>>,
}

fn load_json(path: &Path) -> Result<Spectrum> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let raw: JsonSpectrum = serde_json::from_str(&text).context("parsing JSON")?;
    Spectrum::new(raw.wavelength, raw.flux, raw.variance)
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, one pixel per row.
/// Lines starting with `#` are comments.
fn load_csv(path: &Path) -> Result<Spectrum> {
    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();

    let wave_idx = headers
        .iter()
        .position(|h| h == "wavelength")
        .context("CSV missing 'wavelength' column")?;
    let flux_idx = headers
        .iter()
        .position(|h| h == "flux")
        .context("CSV missing 'flux' column")?;
    let var_idx = headers.iter().position(|h| h == "variance");

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut variance = var_idx.map(|_| Vec::new());

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        wavelength.push(parse_cell(record.get(wave_idx), row_no, "wavelength")?);
        flux.push(parse_cell(record.get(flux_idx), row_no, "flux")?);
        if let (Some(idx), Some(var)) = (var_idx, variance.as_mut()) {
            var.push(parse_cell(record.get(idx), row_no, "variance")?);
        }
    }

    Spectrum::new(wavelength, flux, variance)
}

fn parse_cell(cell: Option<&str>, row: usize, col: &str) -> Result<f64> {
    let tok = cell.unwrap_or("");
    tok.parse::<f64>()
        .with_context(|| format!("Row {row}, {col}: '{tok}' is not a number"))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file holding one spectrum, one pixel per row.
///
/// Expected schema:
/// - `wavelength`: Float64 or Float32
/// - `flux`: Float64 or Float32
/// - `variance` (optional): Float64 or Float32
fn load_parquet(path: &Path) -> Result<Spectrum> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut variance: Option<Vec<f64>> = None;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let wave_idx = schema
            .index_of("wavelength")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'wavelength' column"))?;
        let flux_idx = schema
            .index_of("flux")
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'flux' column"))?;

        wavelength.extend(
            extract_f64_column(batch.column(wave_idx)).context("column 'wavelength'")?,
        );
        flux.extend(extract_f64_column(batch.column(flux_idx)).context("column 'flux'")?);

        if let Ok(var_idx) = schema.index_of("variance") {
            let values = extract_f64_column(batch.column(var_idx)).context("column 'variance'")?;
            variance.get_or_insert_with(Vec::new).extend(values);
        }
    }

    Spectrum::new(wavelength, flux, variance)
}

/// Extract a numeric column as `Vec<f64>`; nulls become NaN.
fn extract_f64_column(col: &Arc<dyn Array>) -> Result<Vec<f64>> {
    match col.data_type() {
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            Ok(arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            Ok(arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
        }
        other => bail!("Expected Float64 or Float32 column, got {other:?}"),
    }
}
