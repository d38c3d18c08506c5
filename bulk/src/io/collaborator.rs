//! Collaborator abstraction for the external solver and calibration tools.
//!
//! The [`Solver`] and [`Calibrator`] traits decouple task execution from the
//! numerical toolkit. Production runs spawn configured commands; tests use
//! scripted collaborators that write artifacts without spawning processes.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::core::types::TaskError;
use crate::io::process::run_command_with_timeout;

/// Inputs of one solver invocation. Field names are the template variables.
#[derive(Debug, Clone, Serialize)]
pub struct SolveRequest {
    pub model: PathBuf,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub output: PathBuf,
    pub start_time: f64,
    pub end_time: f64,
    pub accuracy: f64,
    pub rotations: [f64; 3],
    /// Selected value per non-model axis.
    pub axes: BTreeMap<String, String>,
    pub participant: String,
    pub trial: String,
    pub tag: String,
}

/// Inputs of one calibration invocation. Field names are the template variables.
#[derive(Debug, Clone, Serialize)]
pub struct CalibrateRequest {
    pub model: PathBuf,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub output: PathBuf,
    pub rotations: [f64; 3],
    pub base_imu_label: String,
    pub base_heading_axis: String,
    pub participant: String,
    pub trial: String,
    pub tag: String,
}

/// Runs the solver once. Must write the artifact to `request.output`.
pub trait Solver: Send + Sync {
    fn solve(&self, request: &SolveRequest) -> Result<(), TaskError>;
}

/// Runs the calibration once. Must write the derived model to `request.output`.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, request: &CalibrateRequest) -> Result<(), TaskError>;
}

/// argv whose elements are minijinja templates. Unknown variables are errors.
#[derive(Debug)]
pub struct CommandTemplate {
    env: Environment<'static>,
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new(argv: &[String]) -> Result<Self> {
        if argv.is_empty() {
            return Err(anyhow!("command must be a non-empty array"));
        }
        let parser = Environment::new();
        for (idx, arg) in argv.iter().enumerate() {
            parser
                .template_from_str(arg)
                .with_context(|| format!("parse command[{idx}] template {arg:?}"))?;
        }
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Ok(Self {
            env,
            argv: argv.to_vec(),
        })
    }

    pub fn render<S: Serialize>(&self, vars: &S) -> Result<Vec<String>> {
        self.argv
            .iter()
            .enumerate()
            .map(|(idx, arg)| {
                self.env
                    .render_str(arg, vars)
                    .with_context(|| format!("render command[{idx}] template {arg:?}"))
            })
            .collect()
    }
}

/// Process-spawning settings shared by the command collaborators.
#[derive(Debug, Clone, Copy)]
pub struct CommandLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Solver that spawns `[solver].command`.
#[derive(Debug)]
pub struct CommandSolver {
    template: CommandTemplate,
    limits: CommandLimits,
}

impl CommandSolver {
    pub fn new(argv: &[String], limits: CommandLimits) -> Result<Self> {
        Ok(Self {
            template: CommandTemplate::new(argv).context("solver.command")?,
            limits,
        })
    }
}

impl Solver for CommandSolver {
    #[instrument(skip_all, fields(input = %request.input.display(), start_time = request.start_time))]
    fn solve(&self, request: &SolveRequest) -> Result<(), TaskError> {
        let argv = self
            .template
            .render(request)
            .map_err(TaskError::Collaborator)?;
        run_collaborator(&argv, &request.output_dir, &request.output, self.limits)
    }
}

/// Calibrator that spawns `[calibration].command`.
#[derive(Debug)]
pub struct CommandCalibrator {
    template: CommandTemplate,
    limits: CommandLimits,
}

impl CommandCalibrator {
    pub fn new(argv: &[String], limits: CommandLimits) -> Result<Self> {
        Ok(Self {
            template: CommandTemplate::new(argv).context("calibration.command")?,
            limits,
        })
    }
}

impl Calibrator for CommandCalibrator {
    #[instrument(skip_all, fields(input = %request.input.display()))]
    fn calibrate(&self, request: &CalibrateRequest) -> Result<(), TaskError> {
        let argv = self
            .template
            .render(request)
            .map_err(TaskError::Collaborator)?;
        run_collaborator(&argv, &request.output_dir, &request.output, self.limits)
    }
}

/// Spawn `argv` inside `workdir` and keep its transcript in `<output>.log`.
fn run_collaborator(
    argv: &[String],
    workdir: &Path,
    output: &Path,
    limits: CommandLimits,
) -> Result<(), TaskError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| TaskError::Collaborator(anyhow!("empty command")))?;
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(workdir);

    let result = run_command_with_timeout(cmd, limits.timeout, limits.output_limit_bytes)
        .with_context(|| format!("run {program}"))
        .map_err(TaskError::Collaborator)?;

    let log_path = transcript_path(output);
    if let Err(err) = fs::write(&log_path, result.transcript()) {
        warn!(err = %err, path = %log_path.display(), "failed to write collaborator log");
    }

    if result.timed_out {
        return Err(TaskError::TimedOut(limits.timeout));
    }
    if !result.status.success() {
        return Err(TaskError::Collaborator(anyhow!(
            "{program} failed with status {:?}",
            result.status.code()
        )));
    }
    debug!("collaborator completed successfully");
    Ok(())
}

/// `<output>.log`, next to the artifact.
pub fn transcript_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".log");
    PathBuf::from(name)
}
