//! Batch orchestrator.
//!
//! ```text
//!   manifest ──► for each descriptor, in order:
//!                  load ─✗─► reject (N/A)
//!                  S/N gate (only with a floor) ─✗─► reject (S/N)
//!                  normalize
//!                  refine: coarse type → velocity → rest frame → final type
//!                  ─► results row
//!              ──► one consolidated rejection notice
//!              ──► reviewer (unless every spectrum was rejected)
//! ```

#[cfg(test)]
pub(crate) mod fake;
pub mod records;
pub mod refine;
pub mod report;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::config::RunConfig;
use crate::engine::SpectralEngine;
use crate::manifest::{self, ManifestError, SpectrumDescriptor};
use crate::review::{ReviewError, ReviewSummary, Reviewer};

pub use records::{OutputRecord, RejectRecord, RejectWriter, ResultWriter};
pub use refine::{refine, FinalClassified};
pub use report::{ConsoleNotifier, Notifier, RejectReason, Rejection};

/// Batch-level failures. Per-spectrum problems never end up here; they are
/// recorded as rejects.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("writing output: {0}")]
    Sink(#[source] io::Error),
    #[error("writing output: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Review(#[from] ReviewError),
}

// ---------------------------------------------------------------------------
// Run accounting
// ---------------------------------------------------------------------------

/// What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    /// Manifest lines processed.
    pub processed: usize,
    pub accepted: usize,
    /// Rejection narrative, in manifest order.
    pub rejections: Vec<Rejection>,
}

impl BatchSummary {
    /// True when spectra were listed and none of them was classified.
    pub fn all_rejected(&self) -> bool {
        self.processed > 0 && self.rejections.len() == self.processed
    }
}

/// Where a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Results were handed to the reviewer. `batch` is `None` when the run
    /// skipped straight to review.
    Reviewed {
        batch: Option<BatchSummary>,
        review: ReviewSummary,
    },
    /// Nothing was classified (every spectrum rejected, or none listed), so
    /// review was not started.
    NothingToReview(BatchSummary),
}

enum ItemOutcome {
    Accepted(OutputRecord),
    Rejected(RejectRecord, RejectReason),
}

// ---------------------------------------------------------------------------
// Per-item processing
// ---------------------------------------------------------------------------

fn process_one<E: SpectralEngine + ?Sized>(
    desc: &SpectrumDescriptor,
    spectra_root: Option<&Path>,
    sn_floor: Option<f64>,
    engine: &mut E,
) -> ItemOutcome {
    let reject = |sn: Option<f64>, reason: RejectReason| {
        ItemOutcome::Rejected(
            RejectRecord {
                filename: desc.path.clone(),
                format_tag: desc.format_tag.clone(),
                sn,
            },
            reason,
        )
    };

    let path = desc.resolve(spectra_root);
    if let Err(e) = engine.load(&path, &desc.format_tag) {
        return reject(None, RejectReason::LoadFailed(e.to_string()));
    }

    if let Some(floor) = sn_floor {
        match engine.signal_to_noise() {
            Ok(sn) if !sn.is_finite() => {
                return reject(
                    None,
                    RejectReason::SignalToNoiseUnavailable(format!("S/N is {sn}")),
                );
            }
            Ok(sn) if sn < floor => {
                return reject(Some(sn), RejectReason::BelowFloor { sn, floor });
            }
            Ok(sn) => debug!("S/N {sn:.2} >= {floor}"),
            Err(e) => {
                return reject(None, RejectReason::SignalToNoiseUnavailable(e.to_string()));
            }
        }
    }

    if let Err(e) = engine.normalize() {
        return reject(None, RejectReason::EngineFault(e.to_string()));
    }

    match refine(engine) {
        Ok(done) => ItemOutcome::Accepted(OutputRecord {
            filename: desc.path.clone(),
            shift: done.shift,
            guess: done.guess,
            user: None,
        }),
        Err(e) => reject(None, RejectReason::EngineFault(e.to_string())),
    }
}

/// Classify every descriptor exactly once, in order, writing each to exactly
/// one of the two sinks.
pub fn classify_batch<E, A, R>(
    descriptors: &[SpectrumDescriptor],
    spectra_root: Option<&Path>,
    sn_floor: Option<f64>,
    engine: &mut E,
    accept: &mut ResultWriter<A>,
    reject: &mut RejectWriter<R>,
) -> Result<BatchSummary, PipelineError>
where
    E: SpectralEngine + ?Sized,
    A: Write,
    R: Write,
{
    let mut summary = BatchSummary::default();

    for (i, desc) in descriptors.iter().enumerate() {
        info!("{}) Processing {}", i + 1, desc.display_name());

        match process_one(desc, spectra_root, sn_floor, engine) {
            ItemOutcome::Accepted(record) => {
                debug!(
                    "{} → {} at {} km/s",
                    desc.path,
                    record.guess,
                    record.shift
                );
                accept.write(&record)?;
                summary.accepted += 1;
            }
            ItemOutcome::Rejected(record, reason) => {
                warn!("{} rejected: {reason}", desc.path);
                reject.write(&record)?;
                summary.rejections.push(Rejection {
                    filename: desc.path.clone(),
                    reason,
                });
            }
        }
        summary.processed += 1;
    }

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Whole run
// ---------------------------------------------------------------------------

/// Run the batch described by `config` (unless it skips straight to review),
/// report rejections once, then hand the live engine to `reviewer`.
///
/// Both output files are flushed and closed before the reviewer starts or
/// the function returns. A transient manifest is removed on every exit,
/// including failed ones; the run's own error wins over a cleanup error.
pub fn run<E, Rv, N>(
    config: &RunConfig,
    engine: &mut E,
    reviewer: &mut Rv,
    notifier: &mut N,
) -> Result<RunOutcome, PipelineError>
where
    E: SpectralEngine,
    Rv: Reviewer + ?Sized,
    N: Notifier + ?Sized,
{
    let outcome = run_stages(config, engine, reviewer, notifier);
    let cleanup = remove_transient_manifest(&config.manifest_path);
    match (outcome, cleanup) {
        (Ok(outcome), cleanup) => cleanup.map(|()| outcome),
        (Err(e), cleanup) => {
            if let Err(c) = cleanup {
                warn!("{c}");
            }
            Err(e)
        }
    }
}

fn run_stages<E, Rv, N>(
    config: &RunConfig,
    engine: &mut E,
    reviewer: &mut Rv,
    notifier: &mut N,
) -> Result<RunOutcome, PipelineError>
where
    E: SpectralEngine,
    Rv: Reviewer + ?Sized,
    N: Notifier + ?Sized,
{
    let batch = if config.skip_to_review {
        info!("Skipping classification; reviewing {}", config.accept_path.display());
        None
    } else {
        let descriptors = manifest::read_manifest(&config.manifest_path)?;
        let summary = {
            let mut accept = ResultWriter::create(&config.accept_path)?;
            let mut reject = RejectWriter::create(&config.reject_path)?;
            let summary = classify_batch(
                &descriptors,
                config.spectra_root.as_deref(),
                config.sn_floor,
                engine,
                &mut accept,
                &mut reject,
            )?;
            accept.finish()?;
            reject.finish()?;
            summary
        };
        info!(
            "Classified {} of {} spectra",
            summary.accepted, summary.processed
        );

        if let Some(text) = report::render_rejections(&summary.rejections) {
            notifier.notify(&text);
        }
        if summary.processed == 0 || summary.all_rejected() {
            notifier.notify(if summary.processed == 0 {
                report::EMPTY_MANIFEST_NOTICE
            } else {
                report::ALL_REJECTED_NOTICE
            });
            return Ok(RunOutcome::NothingToReview(summary));
        }
        Some(summary)
    };

    let review = reviewer.review(engine, config)?;
    Ok(RunOutcome::Reviewed { batch, review })
}

fn remove_transient_manifest(path: &Path) -> Result<(), PipelineError> {
    manifest::cleanup_transient(path)
        .map(|_| ())
        .map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })
}
