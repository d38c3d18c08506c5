//! Shared deterministic types for batch planning and reporting.
//!
//! These types are the contract between the planner, the task runner and the
//! report writer. They carry no I/O handles.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::expand::ConfigurationTuple;
use crate::core::layout::TrialId;

/// Which collaborator a batch drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Inverse kinematics solve per (file, model, weighting) with the retry sweep.
    Ik,
    /// Sensor placement on the model, one attempt per (file, model).
    Calibrate,
}

impl Variant {
    /// Phase name used in START/END log lines.
    pub fn phase(self) -> &'static str {
        match self {
            Variant::Ik => "IK",
            Variant::Calibrate => "Calibration",
        }
    }
}

/// One (input file, configuration tuple) pair. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub source: PathBuf,
    /// Mirrored result directory for this input.
    pub output_dir: PathBuf,
    /// Artifact the collaborator must produce inside `output_dir`.
    pub output: PathBuf,
    pub trial: TrialId,
    pub tuple: ConfigurationTuple,
}

impl WorkItem {
    /// `participant/trial/stem [labels]`, used in log lines.
    pub fn label(&self) -> String {
        let labels: Vec<&str> = self.tuple.labels().collect();
        if labels.is_empty() {
            self.trial.label()
        } else {
            format!("{} [{}]", self.trial.label(), labels.join(","))
        }
    }
}

/// Why one collaborator attempt failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0:#}")]
    Collaborator(anyhow::Error),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("expected output {} was not produced", .0.display())]
    MissingOutput(PathBuf),
}

/// Terminal state of one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskOutcome {
    Success { attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
    /// The collaborator was never invoked (missing model, unwritable output dir).
    Skipped { reason: String },
    /// The collaborator panicked; the worker and the rest of the batch carried on.
    Panicked { message: String },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Success { attempts } => write!(f, "success after {attempts} attempt(s)"),
            TaskOutcome::Exhausted { attempts, .. } => {
                write!(f, "exhausted after {attempts} attempt(s)")
            }
            TaskOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            TaskOutcome::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub item: WorkItem,
    pub outcome: TaskOutcome,
}

/// Aggregate of a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub success: usize,
    pub exhausted: usize,
    pub skipped: usize,
    pub panicked: usize,
    pub elapsed_micros: u64,
    pub records: Vec<TaskRecord>,
    /// Panic messages caught at the pool boundary, outside any work item.
    pub panics: Vec<String>,
}

impl BatchReport {
    pub fn new(records: Vec<TaskRecord>, panics: Vec<String>, elapsed: Duration) -> Self {
        let mut report = Self {
            panicked: panics.len(),
            elapsed_micros: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            panics,
            ..Self::default()
        };
        for record in &records {
            match record.outcome {
                TaskOutcome::Success { .. } => report.success += 1,
                TaskOutcome::Exhausted { .. } => report.exhausted += 1,
                TaskOutcome::Skipped { .. } => report.skipped += 1,
                TaskOutcome::Panicked { .. } => report.panicked += 1,
            }
        }
        report.records = records;
        report
    }

    pub fn total(&self) -> usize {
        self.success + self.exhausted + self.skipped + self.panicked
    }

    /// One-line summary printed after the final barrier.
    pub fn summary(&self) -> String {
        format!(
            "Done: success={} exhausted={} skipped={} panicked={}",
            self.success, self.exhausted, self.skipped, self.panicked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expand::{AxisOption, ConfigurationAxis, expand};

    fn item(stem: &str) -> WorkItem {
        let tuples = expand(&[ConfigurationAxis {
            name: "model".to_string(),
            options: vec![AxisOption {
                label: "gait2392".to_string(),
                value: "gait2392.osim".to_string(),
            }],
        }]);
        WorkItem {
            source: PathBuf::from(format!("/in/08/walk/{stem}.sto")),
            output_dir: PathBuf::from("/out/08/walk"),
            output: PathBuf::from(format!("/out/08/walk/kg_{stem}.mot")),
            trial: TrialId {
                participant: "08".to_string(),
                trial: "walk".to_string(),
                stem: stem.to_string(),
                tag: None,
            },
            tuple: tuples[0].clone(),
        }
    }

    #[test]
    fn label_includes_tuple_labels() {
        assert_eq!(item("a").label(), "08/walk/a [gait2392]");
    }

    #[test]
    fn report_counts_outcomes() {
        let records = vec![
            TaskRecord {
                item: item("a"),
                outcome: TaskOutcome::Success { attempts: 1 },
            },
            TaskRecord {
                item: item("b"),
                outcome: TaskOutcome::Exhausted {
                    attempts: 10,
                    last_error: "boom".to_string(),
                },
            },
            TaskRecord {
                item: item("c"),
                outcome: TaskOutcome::Skipped {
                    reason: "missing model".to_string(),
                },
            },
            TaskRecord {
                item: item("d"),
                outcome: TaskOutcome::Panicked {
                    message: "solver blew up".to_string(),
                },
            },
        ];
        let report = BatchReport::new(
            records,
            vec!["panic".to_string()],
            Duration::from_millis(3),
        );
        assert_eq!(
            (report.success, report.exhausted, report.skipped, report.panicked),
            (1, 1, 1, 2)
        );
        assert_eq!(report.total(), 5);
        assert_eq!(report.elapsed_micros, 3000);
        assert_eq!(
            report.summary(),
            "Done: success=1 exhausted=1 skipped=1 panicked=2"
        );
    }

    #[test]
    fn outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(TaskOutcome::Success { attempts: 2 }).expect("json");
        assert_eq!(json["status"], "success");
        assert_eq!(json["attempts"], 2);
    }

    #[test]
    fn task_error_messages() {
        let err = TaskError::MissingOutput(PathBuf::from("/out/x.mot"));
        assert_eq!(err.to_string(), "expected output /out/x.mot was not produced");
        let err = TaskError::TimedOut(Duration::from_secs(5));
        assert_eq!(err.to_string(), "timed out after 5s");
    }
}
