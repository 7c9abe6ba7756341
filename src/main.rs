use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rusty_hammer::config::{RunConfig, DEFAULT_ACCEPT_FILE, DEFAULT_REJECT_FILE};
use rusty_hammer::manifest;
use rusty_hammer::pipeline::{self, ConsoleNotifier, RunOutcome};
use rusty_hammer::review::{ConsoleReviewer, NoReview, Reviewer};
use rusty_hammer::{TemplateEngine, TemplateGrid};

#[derive(Parser)]
#[command(name = "rusty-hammer")]
#[command(about = "Classify stellar spectra against a template grid", long_about = None)]
struct Cli {
    /// Text file listing one `<path> <format>` per line
    #[arg(short, long, required_unless_present = "from_dir")]
    infile: Option<PathBuf>,

    /// Results file
    #[arg(short, long, default_value = DEFAULT_ACCEPT_FILE)]
    outfile: PathBuf,

    /// Reject file
    #[arg(short, long, default_value = DEFAULT_REJECT_FILE)]
    rejectfile: PathBuf,

    /// The input file already gives the full path to each spectrum
    #[arg(short, long, conflicts_with = "path")]
    full: bool,

    /// Directory prepended to every spectrum in the input file
    #[arg(short, long)]
    path: Option<PathBuf>,

    /// Skip classification and go straight to reviewing the results file
    #[arg(short, long, conflicts_with_all = ["sncut", "no_review"])]
    eyecheck: bool,

    /// S/N a spectrum needs before it is classified (~3-5 recommended)
    #[arg(short, long)]
    sncut: Option<f64>,

    /// Template grid JSON (defaults to the built-in synthetic grid)
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Classify every file in this directory instead of reading an input file
    #[arg(long, conflicts_with = "infile", requires = "format")]
    from_dir: Option<PathBuf>,

    /// Format tag for `--from-dir` (csv, json, parquet)
    #[arg(long)]
    format: Option<String>,

    /// Do not start the interactive review after classifying
    #[arg(long)]
    no_review: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let manifest_path = match (&cli.infile, &cli.from_dir) {
        (Some(infile), _) => infile.clone(),
        (None, Some(dir)) => {
            anyhow::ensure!(
                dir.is_dir(),
                "The path provided is not a valid directory: {}",
                dir.display()
            );
            let tag = cli.format.as_deref().unwrap_or("csv");
            manifest::write_directory_manifest(dir, tag, &std::env::temp_dir())
                .with_context(|| format!("listing spectra in {}", dir.display()))?
        }
        (None, None) => unreachable!("clap requires --infile or --from-dir"),
    };

    let config = RunConfig {
        manifest_path,
        accept_path: cli.outfile,
        reject_path: cli.rejectfile,
        spectra_root: if cli.full || cli.from_dir.is_some() {
            None
        } else {
            cli.path
        },
        skip_to_review: cli.eyecheck,
        sn_floor: cli.sncut,
        templates_path: cli.templates,
    }
    .validate()?;

    let grid = match &config.templates_path {
        Some(path) => TemplateGrid::from_json_file(path)?,
        None => {
            info!("Using the built-in synthetic template grid");
            TemplateGrid::synthetic()
        }
    };
    let mut engine = TemplateEngine::new(grid);

    let stdin = io::stdin();
    let mut reviewer: Box<dyn Reviewer> = if cli.no_review {
        Box::new(NoReview)
    } else {
        Box::new(ConsoleReviewer::new(stdin.lock(), io::stdout()))
    };

    let outcome = pipeline::run(&config, &mut engine, reviewer.as_mut(), &mut ConsoleNotifier)?;
    match outcome {
        RunOutcome::Reviewed { batch, review } => {
            if let Some(batch) = batch {
                info!(
                    "{} classified, {} rejected",
                    batch.accepted,
                    batch.rejections.len()
                );
            }
            info!(
                "{} confirmed, {} overridden, {} awaiting review in {}",
                review.confirmed,
                review.overridden,
                review.remaining,
                config.accept_path.display()
            );
        }
        RunOutcome::NothingToReview(batch) => {
            info!("No spectra classified out of {}", batch.processed);
        }
    }
    Ok(())
}
