use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;

use rusty_hammer::config::RunConfig;
use rusty_hammer::data::model::{Guess, SpectralType};
use rusty_hammer::engine::template::{absorption_profile, synthetic_lines, SYNTHETIC_LINE_WIDTH};
use rusty_hammer::engine::{to_rest_frame, EngineError};
use rusty_hammer::manifest;
use rusty_hammer::pipeline::records::{read_results, ACCEPT_HEADER, REJECT_HEADER};
use rusty_hammer::pipeline::report::{ALL_REJECTED_NOTICE, REJECTION_PREAMBLE};
use rusty_hammer::review::{NoReview, ReviewError, ReviewSummary, Reviewer};
use rusty_hammer::{run, RunOutcome, SpectralEngine, TemplateEngine, TemplateGrid};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Write a synthetic spectrum as CSV. `variance` sets every pixel's variance;
/// continuum flux is 3.
fn write_star(
    dir: &Path,
    name: &str,
    (spec_type, sub_type): (SpectralType, u8),
    shift_kms: f64,
    variance: f64,
) -> PathBuf {
    let lines = synthetic_lines(spec_type, sub_type, 0.0);
    let observed: Vec<f64> = (0..=1000).map(|i| 7750.0 + i as f64 * 0.5).collect();
    let rest: Vec<f64> = observed.iter().map(|&w| to_rest_frame(w, shift_kms)).collect();
    let flux = absorption_profile(&rest, &lines, SYNTHETIC_LINE_WIDTH);

    let mut text = String::from("wavelength,flux,variance\n");
    for (w, f) in observed.iter().zip(&flux) {
        writeln!(text, "{w},{},{variance}", 3.0 * f).unwrap();
    }
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn config(dir: &Path, manifest_path: PathBuf, spectra_root: Option<PathBuf>) -> RunConfig {
    RunConfig {
        manifest_path,
        accept_path: dir.join("results.csv"),
        reject_path: dir.join("rejects.csv"),
        spectra_root,
        skip_to_review: false,
        sn_floor: Some(5.0),
        templates_path: None,
    }
}

fn header_line(header: &[&str]) -> String {
    format!("{}\n", header.join(","))
}

/// Reviewer that only counts how often it was started.
#[derive(Default)]
struct CountingReviewer {
    started: usize,
}

impl Reviewer for CountingReviewer {
    fn review(
        &mut self,
        _engine: &mut dyn SpectralEngine,
        _config: &RunConfig,
    ) -> Result<ReviewSummary, ReviewError> {
        self.started += 1;
        Ok(ReviewSummary::default())
    }
}

/// Engine wrapper counting loads.
struct CountingEngine {
    inner: TemplateEngine,
    loads: usize,
}

impl SpectralEngine for CountingEngine {
    fn load(&mut self, path: &Path, format_tag: &str) -> Result<(), EngineError> {
        self.loads += 1;
        self.inner.load(path, format_tag)
    }
    fn signal_to_noise(&self) -> Result<f64, EngineError> {
        self.inner.signal_to_noise()
    }
    fn normalize(&mut self) -> Result<(), EngineError> {
        self.inner.normalize()
    }
    fn classify(&mut self) -> Result<Guess, EngineError> {
        self.inner.classify()
    }
    fn estimate_velocity_shift(&self) -> Result<f64, EngineError> {
        self.inner.estimate_velocity_shift()
    }
    fn apply_shift(&mut self, shift_kms: f64) -> Result<(), EngineError> {
        self.inner.apply_shift(shift_kms)
    }
    fn guess(&self) -> Option<Guess> {
        self.inner.guess()
    }
}

// ---------------------------------------------------------------------------
// Whole runs
// ---------------------------------------------------------------------------

#[test]
fn mixed_batch_partitions_results_and_rejects() {
    let dir = tempfile::tempdir().unwrap();
    write_star(dir.path(), "k5.csv", (SpectralType::K, 5), 120.0, 0.0009);
    write_star(dir.path(), "faint.csv", (SpectralType::G, 0), 0.0, 100.0);
    let manifest_path = dir.path().join("input.txt");
    fs::write(&manifest_path, "k5.csv csv\n\nfaint.csv,csv\nmissing.csv csv\n").unwrap();
    let cfg = config(dir.path(), manifest_path, Some(dir.path().to_path_buf()))
        .validate()
        .unwrap();

    let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
    let mut notices: Vec<String> = Vec::new();
    let outcome = run(&cfg, &mut engine, &mut NoReview, &mut notices).unwrap();

    let RunOutcome::Reviewed { batch: Some(batch), review } = outcome else {
        panic!("expected a reviewed run, got {outcome:?}");
    };
    assert_eq!(batch.processed, 3);
    assert_eq!(batch.accepted, 1);
    assert_eq!(batch.rejections.len(), 2);
    assert_eq!(review.remaining, 1);

    let results = read_results(&cfg.accept_path).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].filename, "k5.csv");
    assert_eq!(results[0].guess.type_label(), "K5");
    assert!((results[0].shift - 120.0).abs() <= 10.0, "shift {}", results[0].shift);
    assert_eq!(results[0].user, None);

    let rejects = fs::read_to_string(&cfg.reject_path).unwrap();
    let mut lines = rejects.lines();
    assert_eq!(lines.next(), Some(header_line(&REJECT_HEADER).trim_end()));
    assert!(lines.next().unwrap().starts_with("faint.csv,csv,0."));
    assert_eq!(lines.next(), Some("missing.csv,csv,N/A"));
    assert_eq!(lines.next(), None);

    assert_eq!(notices.len(), 1, "one consolidated notice: {notices:?}");
    assert!(notices[0].starts_with(REJECTION_PREAMBLE));
    assert!(notices[0].contains("FILE: faint.csv  REASON: S/N = 0."));
    assert!(notices[0].contains("FILE: missing.csv  REASON: File not found"));
}

#[test]
fn all_rejected_skips_review_and_removes_transient_manifest() {
    let spectra = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_star(spectra.path(), "a.csv", (SpectralType::K, 5), 0.0, 100.0);
    write_star(spectra.path(), "b.csv", (SpectralType::M, 0), 0.0, 100.0);
    let manifest_path =
        manifest::write_directory_manifest(spectra.path(), "csv", out.path()).unwrap();
    assert!(manifest::is_transient(&manifest_path));
    let cfg = config(out.path(), manifest_path.clone(), None).validate().unwrap();

    let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
    let mut reviewer = CountingReviewer::default();
    let mut notices: Vec<String> = Vec::new();
    let outcome = run(&cfg, &mut engine, &mut reviewer, &mut notices).unwrap();

    let RunOutcome::NothingToReview(batch) = outcome else {
        panic!("expected no review, got {outcome:?}");
    };
    assert!(batch.all_rejected());
    assert_eq!(reviewer.started, 0);
    assert_eq!(
        fs::read_to_string(&cfg.accept_path).unwrap(),
        header_line(&ACCEPT_HEADER)
    );
    assert_eq!(notices.last().map(String::as_str), Some(ALL_REJECTED_NOTICE));
    assert!(!manifest_path.exists());
}

#[test]
fn transient_manifest_is_removed_after_review() {
    let spectra = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_star(spectra.path(), "k5.csv", (SpectralType::K, 5), -80.0, 0.0009);
    let manifest_path =
        manifest::write_directory_manifest(spectra.path(), "csv", out.path()).unwrap();
    let cfg = config(out.path(), manifest_path.clone(), None).validate().unwrap();

    let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
    let mut reviewer = CountingReviewer::default();
    let mut notices: Vec<String> = Vec::new();
    run(&cfg, &mut engine, &mut reviewer, &mut notices).unwrap();

    assert_eq!(reviewer.started, 1);
    assert!(notices.is_empty());
    assert!(!manifest_path.exists());
    // Full paths are written when the manifest came from a directory listing.
    let results = read_results(&cfg.accept_path).unwrap();
    assert_eq!(
        Path::new(&results[0].filename),
        spectra.path().join("k5.csv").as_path()
    );
}

#[test]
fn transient_manifest_is_removed_when_the_run_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_star(dir.path(), "k5.csv", (SpectralType::K, 5), 0.0, 0.0009);

    // A line without a format tag aborts before any spectrum is read.
    let malformed = dir.path().join(format!("{}1.txt", manifest::TRANSIENT_PREFIX));
    fs::write(&malformed, "k5.csv csv\nlonely\n").unwrap();
    let cfg = config(dir.path(), malformed.clone(), Some(dir.path().to_path_buf()))
        .validate()
        .unwrap();
    let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
    assert!(run(&cfg, &mut engine, &mut NoReview, &mut Vec::<String>::new()).is_err());
    assert!(!malformed.exists());

    // An output file that cannot be created.
    let listing = dir.path().join(format!("{}2.txt", manifest::TRANSIENT_PREFIX));
    fs::write(&listing, "k5.csv csv\n").unwrap();
    let mut cfg = config(dir.path(), listing.clone(), Some(dir.path().to_path_buf()));
    cfg.accept_path = dir.path().join("no/such/dir/results.csv");
    assert!(run(&cfg, &mut engine, &mut NoReview, &mut Vec::<String>::new()).is_err());
    assert!(!listing.exists());
}

#[test]
fn repeated_runs_write_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    write_star(dir.path(), "k5.csv", (SpectralType::K, 5), 200.0, 0.0009);
    write_star(dir.path(), "m5.csv", (SpectralType::M, 5), -150.0, 0.0009);
    write_star(dir.path(), "a0.csv", (SpectralType::A, 0), 35.0, 0.0009);
    let manifest_path = dir.path().join("input.txt");
    fs::write(&manifest_path, "k5.csv csv\nm5.csv csv\na0.csv csv\n").unwrap();
    let cfg = RunConfig {
        sn_floor: None,
        ..config(dir.path(), manifest_path, Some(dir.path().to_path_buf()))
    }
    .validate()
    .unwrap();

    let mut first = None;
    for _ in 0..2 {
        let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
        run(&cfg, &mut engine, &mut NoReview, &mut Vec::<String>::new()).unwrap();
        let bytes = fs::read(&cfg.accept_path).unwrap();
        match &first {
            None => first = Some(bytes),
            Some(previous) => assert_eq!(previous, &bytes),
        }
    }

    let labels: Vec<String> = read_results(&cfg.accept_path)
        .unwrap()
        .iter()
        .map(|r| r.guess.type_label())
        .collect();
    assert_eq!(labels, vec!["K5", "M5", "A0"]);
}

#[test]
fn every_listed_spectrum_lands_in_exactly_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut listing = String::new();
    for i in 0..6 {
        let name = format!("s{i}.csv");
        // Odd entries are too noisy, every third one is never written.
        let variance = if i % 2 == 1 { 100.0 } else { 0.0009 };
        if i % 3 != 2 {
            write_star(dir.path(), &name, (SpectralType::G, 5), 10.0 * i as f64, variance);
        }
        writeln!(listing, "{name} csv").unwrap();
    }
    let manifest_path = dir.path().join("input.txt");
    fs::write(&manifest_path, listing).unwrap();
    let cfg = config(dir.path(), manifest_path, Some(dir.path().to_path_buf()))
        .validate()
        .unwrap();

    let mut engine = TemplateEngine::new(TemplateGrid::synthetic());
    run(&cfg, &mut engine, &mut NoReview, &mut Vec::<String>::new()).unwrap();

    let accepted: Vec<String> = read_results(&cfg.accept_path)
        .unwrap()
        .into_iter()
        .map(|r| r.filename)
        .collect();
    let rejected: Vec<String> = fs::read_to_string(&cfg.reject_path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap().to_string())
        .collect();

    assert_eq!(accepted, vec!["s0.csv", "s4.csv"]);
    assert_eq!(rejected, vec!["s1.csv", "s2.csv", "s3.csv", "s5.csv"]);
}

#[test]
fn review_only_run_never_touches_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results.csv");
    fs::write(
        &results,
        format!("{}k5.csv,120.0,K5,+0.0,nan,nan\n", header_line(&ACCEPT_HEADER)),
    )
    .unwrap();
    let cfg = RunConfig {
        manifest_path: dir.path().join("unused.txt"),
        accept_path: results,
        reject_path: dir.path().join("rejects.csv"),
        spectra_root: None,
        skip_to_review: true,
        sn_floor: None,
        templates_path: None,
    }
    .validate()
    .unwrap();

    let mut engine = CountingEngine {
        inner: TemplateEngine::new(TemplateGrid::synthetic()),
        loads: 0,
    };
    let mut notices: Vec<String> = Vec::new();
    let outcome = run(&cfg, &mut engine, &mut NoReview, &mut notices).unwrap();

    assert_eq!(
        outcome,
        RunOutcome::Reviewed {
            batch: None,
            review: ReviewSummary {
                remaining: 1,
                ..ReviewSummary::default()
            },
        }
    );
    assert_eq!(engine.loads, 0);
    assert!(!cfg.reject_path.exists());
    assert!(notices.is_empty());
}
