//! Execution of one work item: directory check, model lookup, retry sweep.
//!
//! Every item logs exactly one START line and one END line, whatever its
//! outcome. Failures never escape as errors; they become a [`TaskOutcome`].

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::core::retry::{RetryDecision, RetrySweep};
use crate::core::types::{TaskError, TaskOutcome, TaskRecord, Variant, WorkItem};
use crate::io::collaborator::{CalibrateRequest, Calibrator, SolveRequest, Solver};
use crate::io::config::{MODEL_AXIS, RunConfig};
use crate::io::output_dir;
use crate::io::run_log::RunLog;
use crate::pool::panic_message;

/// Invoke `attempt` with successive start values until it succeeds and the
/// artifact exists, or the sweep is exhausted.
pub fn run_with_retry<F>(
    item: &WorkItem,
    sweep: &RetrySweep,
    log: &RunLog,
    mut attempt: F,
) -> TaskOutcome
where
    F: FnMut(f64) -> Result<(), TaskError>,
{
    let mut state = sweep.state();
    loop {
        let start = state.current();
        let result = attempt(start).and_then(|()| {
            if item.output.exists() {
                Ok(())
            } else {
                Err(TaskError::MissingOutput(item.output.clone()))
            }
        });
        let err = match result {
            Ok(()) => {
                return TaskOutcome::Success {
                    attempts: state.attempts(),
                };
            }
            Err(err) => err,
        };

        log.println(format_args!(
            "Error in processing: {} (start time {start}, attempt {}/{}): {err}",
            item.label(),
            state.attempts(),
            state.max_attempts()
        ));
        match state.record_failure() {
            RetryDecision::Retry { next_start } => {
                debug!(next_start, "retrying with later start time");
            }
            RetryDecision::Exhausted => {
                return TaskOutcome::Exhausted {
                    attempts: state.attempts(),
                    last_error: err.to_string(),
                };
            }
        }
    }
}

/// Run one `ik` item against `solver`.
#[instrument(skip_all, fields(item = %item.label()))]
pub fn run_solve_item<S: Solver + ?Sized>(
    item: WorkItem,
    cfg: &RunConfig,
    models_dir: &Path,
    solver: &S,
    log: &RunLog,
) -> TaskRecord {
    run_item(item, Variant::Ik, cfg, models_dir, log, |item, model| {
        let sweep = cfg.sweep_for(Variant::Ik);
        let mut request = SolveRequest {
            model,
            input: item.source.clone(),
            output_dir: item.output_dir.clone(),
            output: item.output.clone(),
            start_time: sweep.start,
            end_time: sweep.end,
            accuracy: cfg.solver.accuracy,
            rotations: cfg.solver.rotations,
            axes: item
                .tuple
                .values()
                .into_iter()
                .filter(|(axis, _)| axis != MODEL_AXIS)
                .collect(),
            participant: item.trial.participant.clone(),
            trial: item.trial.trial.clone(),
            tag: item.trial.tag.clone().unwrap_or_default(),
        };
        run_with_retry(item, &sweep, log, |start| {
            request.start_time = start;
            solver.solve(&request)
        })
    })
}

/// Run one `calibrate` item against `calibrator`.
#[instrument(skip_all, fields(item = %item.label()))]
pub fn run_calibrate_item<C: Calibrator + ?Sized>(
    item: WorkItem,
    cfg: &RunConfig,
    models_dir: &Path,
    calibrator: &C,
    log: &RunLog,
) -> TaskRecord {
    run_item(item, Variant::Calibrate, cfg, models_dir, log, |item, model| {
        let request = CalibrateRequest {
            model,
            input: item.source.clone(),
            output_dir: item.output_dir.clone(),
            output: item.output.clone(),
            rotations: cfg.calibration.rotations,
            base_imu_label: cfg.calibration.base_imu_label.clone(),
            base_heading_axis: cfg.calibration.base_heading_axis.clone(),
            participant: item.trial.participant.clone(),
            trial: item.trial.trial.clone(),
            tag: item.trial.tag.clone().unwrap_or_default(),
        };
        let sweep = cfg.sweep_for(Variant::Calibrate);
        run_with_retry(item, &sweep, log, |_| calibrator.calibrate(&request))
    })
}

fn run_item<F>(
    item: WorkItem,
    variant: Variant,
    cfg: &RunConfig,
    models_dir: &Path,
    log: &RunLog,
    invoke: F,
) -> TaskRecord
where
    F: FnOnce(&WorkItem, PathBuf) -> TaskOutcome,
{
    let phase = variant.phase();
    log.println(format_args!(
        "---Starting {phase} Processing: {}",
        item.source.display()
    ));

    let outcome = match prepare(&item, cfg, models_dir, log) {
        Ok(model) => match panic::catch_unwind(AssertUnwindSafe(|| invoke(&item, model))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log.println(format_args!(
                    "Error in processing: {}: collaborator panicked: {message}",
                    item.label()
                ));
                TaskOutcome::Panicked { message }
            }
        },
        Err(outcome) => outcome,
    };

    let file = item
        .output
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    log.println(format_args!(
        "-------Finished {phase} Result Dir: {} File: {file} ({outcome})",
        item.output_dir.display()
    ));
    TaskRecord { item, outcome }
}

/// Create the result directory and locate the model; either failure skips the item.
fn prepare(
    item: &WorkItem,
    cfg: &RunConfig,
    models_dir: &Path,
    log: &RunLog,
) -> Result<PathBuf, TaskOutcome> {
    if let Err(err) = output_dir::ensure(&item.output_dir) {
        log.println(format_args!("Error in processing: {}: {err}", item.label()));
        return Err(TaskOutcome::Skipped {
            reason: err.to_string(),
        });
    }

    let Some(choice) = item.tuple.get(MODEL_AXIS) else {
        return Err(TaskOutcome::Skipped {
            reason: "no model selected".to_string(),
        });
    };
    let model = cfg
        .models
        .layout
        .resolve(models_dir, &item.trial.participant, &choice.value);
    if !model.is_file() {
        log.println(format_args!("Model Path doesn't exist: {}", model.display()));
        return Err(TaskOutcome::Skipped {
            reason: format!("model {} does not exist", model.display()),
        });
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expand::{AxisOption, ConfigurationAxis, expand};
    use crate::core::layout::TrialId;
    use crate::test_support::{MemorySink, PanickingSolver, ScriptedCalibrator, ScriptedSolver};
    use std::fs;

    struct Fixture {
        _temp: tempfile::TempDir,
        models_dir: PathBuf,
        item: WorkItem,
        sink: MemorySink,
        log: RunLog,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().expect("tempdir");
        let models_dir = temp.path().join("models");
        fs::create_dir_all(&models_dir).expect("mkdir");
        fs::write(models_dir.join("m1.osim"), "").expect("write");
        let output_dir = temp.path().join("out/08/walk");

        let tuple = expand(&[
            ConfigurationAxis {
                name: MODEL_AXIS.to_string(),
                options: vec![AxisOption {
                    label: "m1".to_string(),
                    value: "m1.osim".to_string(),
                }],
            },
            ConfigurationAxis {
                name: "weights".to_string(),
                options: vec![AxisOption {
                    label: "uniform".to_string(),
                    value: "uniform.xml".to_string(),
                }],
            },
        ])
        .remove(0);
        let item = WorkItem {
            source: temp.path().join("in/08/walk/data_l_comf_01_orientations.sto"),
            output: output_dir.join("kg_out.mot"),
            output_dir,
            trial: TrialId {
                participant: "08".to_string(),
                trial: "walk".to_string(),
                stem: "data_l_comf_01_orientations".to_string(),
                tag: Some("l_comf_01".to_string()),
            },
            tuple,
        };
        let sink = MemorySink::default();
        let log = RunLog::with_writers(vec![Box::new(sink.clone())]);
        Fixture {
            _temp: temp,
            models_dir,
            item,
            sink,
            log,
        }
    }

    fn sweep() -> RetrySweep {
        RetrySweep {
            start: 0.0,
            end: 1.0,
            increment: 0.25,
        }
    }

    #[test]
    fn k_failures_then_success_takes_k_plus_one_attempts() {
        let fx = fixture();
        fs::create_dir_all(&fx.item.output_dir).expect("mkdir");
        let mut starts = Vec::new();
        let outcome = run_with_retry(&fx.item, &sweep(), &fx.log, |start| {
            starts.push(start);
            if starts.len() <= 2 {
                return Err(TaskError::Collaborator(anyhow::anyhow!("diverged")));
            }
            fs::write(&fx.item.output, "").map_err(|e| TaskError::Collaborator(e.into()))
        });
        assert_eq!(outcome, TaskOutcome::Success { attempts: 3 });
        assert_eq!(starts, vec![0.0, 0.25, 0.5]);
        assert_eq!(fx.sink.lines().len(), 2);
    }

    #[test]
    fn always_failing_is_exhausted_after_budget() {
        let fx = fixture();
        let mut calls = 0;
        let outcome = run_with_retry(&fx.item, &sweep(), &fx.log, |_| {
            calls += 1;
            Err(TaskError::Collaborator(anyhow::anyhow!("diverged")))
        });
        assert_eq!(calls, 4);
        assert_eq!(
            outcome,
            TaskOutcome::Exhausted {
                attempts: 4,
                last_error: "diverged".to_string()
            }
        );
    }

    #[test]
    fn decimal_sweep_makes_exactly_ceil_span_invocations() {
        let fx = fixture();
        let sweep = RetrySweep {
            start: 0.5,
            end: 0.8,
            increment: 0.1,
        };
        let mut starts = Vec::new();
        let outcome = run_with_retry(&fx.item, &sweep, &fx.log, |start| {
            starts.push(start);
            Err(TaskError::Collaborator(anyhow::anyhow!("diverged")))
        });
        assert_eq!(starts, vec![0.5, 0.6, 0.7]);
        assert!(matches!(outcome, TaskOutcome::Exhausted { attempts: 3, .. }));
    }

    #[test]
    fn missing_artifact_counts_as_failure() {
        let fx = fixture();
        let outcome = run_with_retry(&fx.item, &RetrySweep::single(0.0), &fx.log, |_| Ok(()));
        assert!(matches!(
            outcome,
            TaskOutcome::Exhausted { attempts: 1, ref last_error } if last_error.contains("not produced")
        ));
    }

    #[test]
    fn solve_item_logs_start_and_finish() {
        let fx = fixture();
        let cfg = RunConfig::default();
        let solver = ScriptedSolver::failing_first(1);
        let record = run_solve_item(fx.item.clone(), &cfg, &fx.models_dir, &solver, &fx.log);
        assert_eq!(record.outcome, TaskOutcome::Success { attempts: 2 });
        assert!(fx.item.output_dir.is_dir());

        let lines = fx.sink.lines();
        assert!(lines[0].starts_with("---Starting IK Processing: "));
        assert!(lines[1].starts_with("Error in processing: "));
        assert!(lines[2].starts_with("-------Finished IK Result Dir: "));
        assert!(lines[2].ends_with("File: kg_out.mot (success after 2 attempt(s))"));

        let requests = solver.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].start_time, 0.1);
        assert_eq!(requests[1].axes.get("weights").map(String::as_str), Some("uniform.xml"));
        assert_eq!(requests[1].tag, "l_comf_01");
    }

    #[test]
    fn missing_model_skips_without_invoking() {
        let fx = fixture();
        let mut cfg = RunConfig::default();
        cfg.models.layout = crate::io::config::ModelLayout::PerParticipant;
        let solver = ScriptedSolver::failing_first(0);
        let record = run_solve_item(fx.item.clone(), &cfg, &fx.models_dir, &solver, &fx.log);
        assert!(matches!(record.outcome, TaskOutcome::Skipped { .. }));
        assert!(solver.requests().is_empty());
        let lines = fx.sink.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("Model Path doesn't exist: "));
    }

    #[test]
    fn collaborator_panic_is_recorded_against_the_item() {
        let fx = fixture();
        let cfg = RunConfig::default();
        let solver = PanickingSolver("solver blew up");
        let record = run_solve_item(fx.item.clone(), &cfg, &fx.models_dir, &solver, &fx.log);
        assert_eq!(
            record.outcome,
            TaskOutcome::Panicked {
                message: "solver blew up".to_string()
            }
        );

        let lines = fx.sink.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains(&fx.item.label()));
        assert!(lines[1].ends_with("collaborator panicked: solver blew up"));
        assert!(lines[2].starts_with("-------Finished IK Result Dir: "));
        assert!(lines[2].ends_with("(panicked: solver blew up)"));
    }

    #[test]
    fn calibration_runs_once() {
        let fx = fixture();
        let cfg = RunConfig::default();
        let calibrator = ScriptedCalibrator::failing_first(1);
        let record =
            run_calibrate_item(fx.item.clone(), &cfg, &fx.models_dir, &calibrator, &fx.log);
        assert!(matches!(record.outcome, TaskOutcome::Exhausted { attempts: 1, .. }));
        assert_eq!(calibrator.calls(), 1);
        assert!(fx.sink.lines()[0].starts_with("---Starting Calibration Processing: "));
    }
}
