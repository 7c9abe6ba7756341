//! Manual verification of automatic classifications.
//!
//! The reviewer reads the results file back, lets a person confirm or
//! override each guess, and persists the answers into the two `User …`
//! columns of the same file.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::config::RunConfig;
use crate::data::loader::SpectrumFormat;
use crate::data::model::Guess;
use crate::engine::SpectralEngine;
use crate::pipeline::records::{self, format_decimal};
use crate::pipeline::PipelineError;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("cannot read results file {path}: {message}")]
    Read { path: PathBuf, message: String },
    #[error("saving reviewed results: {0}")]
    Save(#[source] Box<PipelineError>),
    #[error("console: {0}")]
    Console(#[from] io::Error),
}

/// Tally of one review session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReviewSummary {
    /// Guesses confirmed as is.
    pub confirmed: usize,
    pub overridden: usize,
    pub skipped: usize,
    /// Rows still without a user answer after the session.
    pub remaining: usize,
}

/// Downstream manual-verification stage.
pub trait Reviewer {
    /// Review the results named by `config`, using `engine` to redisplay
    /// spectra when possible.
    fn review(
        &mut self,
        engine: &mut dyn SpectralEngine,
        config: &RunConfig,
    ) -> Result<ReviewSummary, ReviewError>;
}

/// Reviewer that does nothing; used when review is turned off.
#[derive(Debug, Default)]
pub struct NoReview;

impl Reviewer for NoReview {
    fn review(
        &mut self,
        _engine: &mut dyn SpectralEngine,
        config: &RunConfig,
    ) -> Result<ReviewSummary, ReviewError> {
        let pending = load_results(&config.accept_path)?
            .iter()
            .filter(|r| r.user.is_none())
            .count();
        info!(
            "Review skipped; {pending} results await review in {}",
            config.accept_path.display()
        );
        Ok(ReviewSummary {
            remaining: pending,
            ..ReviewSummary::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Console reviewer
// ---------------------------------------------------------------------------

enum Answer {
    Confirm,
    Override(Guess),
    Skip,
    Quit,
}

fn parse_answer(line: &str) -> Result<Answer, String> {
    match line.trim() {
        "" => Ok(Answer::Confirm),
        "s" | "S" => Ok(Answer::Skip),
        "q" | "Q" => Ok(Answer::Quit),
        other => other.parse().map(Answer::Override).map_err(|e| format!("{e}")),
    }
}

/// Line-oriented reviewer: one prompt per unreviewed row.
///
/// Answers: empty line accepts the guess, `<type> [metal]` (e.g. `K5 -0.5`)
/// overrides it, `s` skips the row, `q` stops and saves. End of input counts
/// as `q`.
pub struct ConsoleReviewer<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> ConsoleReviewer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        ConsoleReviewer { input, output }
    }

    fn ask(&mut self) -> Result<Answer, ReviewError> {
        loop {
            write!(
                self.output,
                "  [Enter] accept, <type> [metal] override, s skip, q quit: "
            )?;
            self.output.flush()?;
            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(Answer::Quit);
            }
            match parse_answer(&line) {
                Ok(answer) => return Ok(answer),
                Err(msg) => writeln!(self.output, "  {msg}")?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Reviewer for ConsoleReviewer<R, W> {
    fn review(
        &mut self,
        engine: &mut dyn SpectralEngine,
        config: &RunConfig,
    ) -> Result<ReviewSummary, ReviewError> {
        let mut results = load_results(&config.accept_path)?;
        let pending: Vec<usize> = (0..results.len())
            .filter(|&i| results[i].user.is_none())
            .collect();
        let mut summary = ReviewSummary::default();

        writeln!(
            self.output,
            "{} of {} spectra need review.",
            pending.len(),
            results.len()
        )?;

        for (n, &i) in pending.iter().enumerate() {
            let record = &results[i];
            writeln!(
                self.output,
                "[{}/{}] {}: {} [Fe/H]={:+.1}, RV {} km/s",
                n + 1,
                pending.len(),
                record.filename,
                record.guess.type_label(),
                record.guess.metal,
                format_decimal(record.shift)
            )?;
            if let Some(sn) = redisplay(engine, config.spectra_root.as_deref(), &record.filename) {
                writeln!(self.output, "  S/N {sn:.1}")?;
            }

            match self.ask()? {
                Answer::Confirm => {
                    results[i].user = Some(results[i].guess);
                    summary.confirmed += 1;
                }
                Answer::Override(guess) => {
                    results[i].user = Some(guess);
                    summary.overridden += 1;
                }
                Answer::Skip => summary.skipped += 1,
                Answer::Quit => break,
            }
        }

        if summary.confirmed + summary.overridden > 0 {
            records::rewrite_results(&config.accept_path, &results)
                .map_err(|e| ReviewError::Save(Box::new(e)))?;
        }
        summary.remaining = results.iter().filter(|r| r.user.is_none()).count();
        writeln!(
            self.output,
            "Reviewed {} ({} overridden), {} left.",
            summary.confirmed + summary.overridden,
            summary.overridden,
            summary.remaining
        )?;
        Ok(summary)
    }
}

fn load_results(path: &Path) -> Result<Vec<records::OutputRecord>, ReviewError> {
    records::read_results(path).map_err(|e| ReviewError::Read {
        path: path.to_path_buf(),
        message: format!("{e:#}"),
    })
}

/// Reload the spectrum into the engine when its format can be inferred from
/// the extension, returning its S/N for display.
fn redisplay(engine: &mut dyn SpectralEngine, root: Option<&Path>, filename: &str) -> Option<f64> {
    let path = match root {
        Some(root) => root.join(filename),
        None => PathBuf::from(filename),
    };
    let format = SpectrumFormat::from_extension(&path)?;
    if let Err(e) = engine.load(&path, &format.to_string()) {
        debug!("cannot redisplay {filename}: {e}");
        return None;
    }
    engine.signal_to_noise().ok()
}
