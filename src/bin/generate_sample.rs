//! Writes a small demo data set: a template grid, a handful of Doppler
//! shifted noisy spectra in every supported format, and a manifest that
//! lists them (plus one file that does not exist).
//!
//! Usage: `generate_sample [OUT_DIR]` (default `sample_data`).

use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::Float64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::json;

use rusty_hammer::data::model::SpectralType;
use rusty_hammer::engine::template::{absorption_profile, synthetic_lines, SYNTHETIC_LINE_WIDTH};
use rusty_hammer::engine::to_rest_frame;
use rusty_hammer::TemplateGrid;

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

struct Star {
    name: &'static str,
    spec_type: SpectralType,
    sub_type: u8,
    metal: f64,
    rv_kms: f64,
    /// Per-pixel noise sigma, relative to the continuum.
    noise: f64,
    format: &'static str,
}

const fn star(
    name: &'static str,
    (spec_type, sub_type): (SpectralType, u8),
    metal: f64,
    rv_kms: f64,
    noise: f64,
    format: &'static str,
) -> Star {
    Star {
        name,
        spec_type,
        sub_type,
        metal,
        rv_kms,
        noise,
        format,
    }
}

const STARS: [Star; 5] = [
    star("star_k5", (SpectralType::K, 5), 0.0, 120.0, 0.01, "csv"),
    star("star_g0", (SpectralType::G, 0), -1.0, -45.0, 0.02, "json"),
    star("star_m5", (SpectralType::M, 5), 0.0, 310.0, 0.01, "parquet"),
    star("star_a0", (SpectralType::A, 0), 0.0, 0.0, 0.015, "csv"),
    star("star_faint", (SpectralType::F, 5), 0.0, 60.0, 2.0, "json"),
];

/// Observed wavelength grid, 7750-8250 Å at 0.5 Å.
fn observed_grid() -> Vec<f64> {
    (0..=1000).map(|i| 7750.0 + i as f64 * 0.5).collect()
}

fn simulate(star: &Star, wavelength: &[f64], rng: &mut SimpleRng) -> (Vec<f64>, Vec<f64>) {
    let rest: Vec<f64> = wavelength.iter().map(|&w| to_rest_frame(w, star.rv_kms)).collect();
    let lines = synthetic_lines(star.spec_type, star.sub_type, star.metal);
    let continuum = 1000.0;
    let flux = absorption_profile(&rest, &lines, SYNTHETIC_LINE_WIDTH)
        .into_iter()
        .map(|f| continuum * (f + rng.gauss(0.0, star.noise)))
        .collect();
    let variance = vec![(continuum * star.noise).powi(2); wavelength.len()];
    (flux, variance)
}

fn write_csv(path: &Path, wavelength: &[f64], flux: &[f64], variance: &[f64]) -> Result<()> {
    let mut text = String::from("# synthetic spectrum\nwavelength,flux,variance\n");
    for ((w, f), v) in wavelength.iter().zip(flux).zip(variance) {
        writeln!(text, "{w},{f},{v}")?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

fn write_json(path: &Path, wavelength: &[f64], flux: &[f64], variance: &[f64]) -> Result<()> {
    let doc = json!({ "wavelength": wavelength, "flux": flux, "variance": variance });
    std::fs::write(path, serde_json::to_string(&doc)?)?;
    Ok(())
}

fn write_parquet(path: &Path, wavelength: &[f64], flux: &[f64], variance: &[f64]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("wavelength", DataType::Float64, false),
        Field::new("flux", DataType::Float64, false),
        Field::new("variance", DataType::Float64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Float64Array::from(wavelength.to_vec())),
            Arc::new(Float64Array::from(flux.to_vec())),
            Arc::new(Float64Array::from(variance.to_vec())),
        ],
    )
    .context("building record batch")?;

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let grid = TemplateGrid::synthetic();
    let templates_path = out_dir.join("templates.json");
    std::fs::write(&templates_path, serde_json::to_string_pretty(&grid)?)?;

    let mut rng = SimpleRng::new(42);
    let wavelength = observed_grid();
    let mut manifest = String::new();
    for star in &STARS {
        let (flux, variance) = simulate(star, &wavelength, &mut rng);
        let file_name = format!("{}.{}", star.name, star.format);
        let path = out_dir.join(&file_name);
        match star.format {
            "csv" => write_csv(&path, &wavelength, &flux, &variance)?,
            "json" => write_json(&path, &wavelength, &flux, &variance)?,
            _ => write_parquet(&path, &wavelength, &flux, &variance)?,
        }
        writeln!(manifest, "{file_name} {}", star.format)?;
    }
    writeln!(manifest, "star_missing.csv csv")?;
    std::fs::write(out_dir.join("manifest.txt"), manifest)?;

    println!(
        "Wrote {} spectra, {} templates and manifest.txt to {}",
        STARS.len(),
        grid.len(),
        out_dir.display()
    );
    println!(
        "Try: rusty-hammer -i {0}/manifest.txt -p {0} -t {1} -s 5 --no-review",
        out_dir.display(),
        templates_path.display()
    );
    Ok(())
}
