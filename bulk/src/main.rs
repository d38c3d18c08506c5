//! Batch driver for motion-capture solver and calibration runs.
//!
//! Scans an input tree, expands every accepted file against the configured
//! models and axes, and runs the external tool once per combination on a
//! bounded worker pool. Per-item failures are logged and reported; the exit
//! code only reflects whether the batch could start.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bulk::batch::{BatchPaths, run_calibration, run_ik};
use bulk::core::types::{BatchReport, Variant};
use bulk::exit_codes;
use bulk::io::collaborator::{CommandCalibrator, CommandSolver};
use bulk::io::config::{DEFAULT_CONFIG_FILE, load_config};
use bulk::io::report::write_report;
use bulk::io::run_log::RunLog;
use bulk::logging;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;

const USAGE: &str =
    "usage: bulk [--config <path>] <ik|calibrate> <input_dir> <models_dir> <output_dir>";

#[derive(Parser)]
#[command(
    name = "bulk",
    version,
    about = "Batch orchestrator for motion-capture solver and calibration runs"
)]
struct Cli {
    /// Batch configuration (TOML). Built-in defaults apply when it is missing.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Solve inverse kinematics for every (file, model, weighting) combination.
    Ik(DirArgs),
    /// Place sensors on every model for every calibration recording.
    Calibrate(DirArgs),
}

#[derive(Args)]
struct DirArgs {
    /// Root of the recordings tree.
    input_dir: PathBuf,
    /// Directory holding model and setup files.
    models_dir: PathBuf,
    /// Results root; created when absent.
    output_dir: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    logging::init();
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
}

fn run(cli: Cli) -> Result<()> {
    let (variant, dirs) = match cli.command {
        Command::Ik(dirs) => (Variant::Ik, dirs),
        Command::Calibrate(dirs) => (Variant::Calibrate, dirs),
    };
    validate_dirs(&dirs)?;

    let cfg = load_config(&cli.config)?;
    cfg.validate_for(variant)?;
    let cfg = Arc::new(cfg);

    fs::create_dir_all(&dirs.output_dir)
        .with_context(|| format!("create output directory {}", dirs.output_dir.display()))?;
    // Collaborators run inside result directories, so every path handed to them is absolute.
    let paths = BatchPaths {
        input_dir: absolute(&dirs.input_dir)?,
        models_dir: absolute(&dirs.models_dir)?,
        output_dir: absolute(&dirs.output_dir)?,
    };

    let started = Utc::now();
    let log = Arc::new(RunLog::open(Path::new("."), started)?);
    log.println(format_args!(
        "Run started {} ({} batch)",
        started.to_rfc3339(),
        variant.phase()
    ));
    info!(log = ?log.path(), "run log opened");

    let limits = cfg.command_limits(variant);
    let report = match variant {
        Variant::Ik => {
            let solver = Arc::new(CommandSolver::new(&cfg.solver.command, limits)?);
            run_ik(Arc::clone(&cfg), &paths, solver, Arc::clone(&log))?
        }
        Variant::Calibrate => {
            let calibrator = Arc::new(CommandCalibrator::new(&cfg.calibration.command, limits)?);
            run_calibration(Arc::clone(&cfg), &paths, calibrator, Arc::clone(&log))?
        }
    };

    record_report(&paths.output_dir, &report, &log);
    log.println("Finished Running without Error!");
    Ok(())
}

/// The batch already ran; a report that cannot be written is logged, not fatal.
fn record_report(output_dir: &Path, report: &BatchReport, log: &RunLog) {
    match write_report(output_dir, report) {
        Ok(path) => {
            info!(path = %path.display(), total = report.total(), "batch report written");
        }
        Err(err) => log.println(format_args!("Error writing batch report: {err:#}")),
    }
}

/// Reject missing roots before anything is scheduled.
fn validate_dirs(dirs: &DirArgs) -> Result<()> {
    for (name, path) in [("input_dir", &dirs.input_dir), ("models_dir", &dirs.models_dir)] {
        if !path.is_dir() {
            bail!("{name} {} is not an existing directory\n{USAGE}", path.display());
        }
    }
    if dirs.output_dir.exists() && !dirs.output_dir.is_dir() {
        bail!(
            "output_dir {} exists and is not a directory\n{USAGE}",
            dirs.output_dir.display()
        );
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolve {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ik() {
        let cli = Cli::parse_from(["bulk", "ik", "in", "models", "out"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        let Command::Ik(dirs) = cli.command else {
            panic!("expected ik");
        };
        assert_eq!(dirs.input_dir, PathBuf::from("in"));
        assert_eq!(dirs.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn parse_calibrate_with_config_after_subcommand() {
        let cli = Cli::parse_from(["bulk", "calibrate", "--config", "c.toml", "a", "b", "c"]);
        assert_eq!(cli.config, PathBuf::from("c.toml"));
        assert!(matches!(cli.command, Command::Calibrate(_)));
    }

    #[test]
    fn missing_positional_is_an_error() {
        let err = Cli::try_parse_from(["bulk", "ik", "in", "models"])
            .err()
            .expect("parse error");
        assert!(err.use_stderr());
    }

    #[test]
    fn unwritable_report_is_logged_not_fatal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("out");
        fs::write(&blocker, "").expect("write");
        let sink = bulk::test_support::MemorySink::default();
        let log = RunLog::with_writers(vec![Box::new(sink.clone())]);
        record_report(&blocker, &BatchReport::default(), &log);
        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("Error writing batch report: "));
    }

    #[test]
    fn validate_dirs_rejects_missing_input() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dirs = DirArgs {
            input_dir: temp.path().join("missing"),
            models_dir: temp.path().to_path_buf(),
            output_dir: temp.path().join("out"),
        };
        let err = validate_dirs(&dirs).expect_err("missing input");
        assert!(err.to_string().contains("usage: bulk"));
    }

    #[test]
    fn validate_dirs_rejects_file_as_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("out");
        fs::write(&file, "").expect("write");
        let dirs = DirArgs {
            input_dir: temp.path().to_path_buf(),
            models_dir: temp.path().to_path_buf(),
            output_dir: file,
        };
        assert!(validate_dirs(&dirs).is_err());
    }
}
