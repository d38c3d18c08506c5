//! Test-only collaborators, log sinks and scratch trees.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use tempfile::TempDir;

use crate::core::types::TaskError;
use crate::io::collaborator::{CalibrateRequest, Calibrator, SolveRequest, Solver};

/// Cloneable in-memory `Write` sink; clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fails the first `failures` attempts per output path, then writes the artifact.
#[derive(Debug, Default)]
struct Script {
    failures: usize,
    attempts: Mutex<HashMap<PathBuf, usize>>,
}

impl Script {
    fn attempt(&self, output: &Path) -> Result<(), TaskError> {
        let count = {
            let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = attempts.entry(output.to_path_buf()).or_default();
            *count += 1;
            *count
        };
        if count <= self.failures {
            return Err(TaskError::Collaborator(anyhow!(
                "scripted failure {count} for {}",
                output.display()
            )));
        }
        fs::write(output, b"scripted\n").map_err(|err| TaskError::Collaborator(err.into()))
    }
}

/// Scripted [`Solver`] that records every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedSolver {
    script: Script,
    requests: Mutex<Vec<SolveRequest>>,
}

impl ScriptedSolver {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            script: Script {
                failures,
                ..Script::default()
            },
            ..Self::default()
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn requests(&self) -> Vec<SolveRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Solver for ScriptedSolver {
    fn solve(&self, request: &SolveRequest) -> Result<(), TaskError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.script.attempt(&request.output)
    }
}

/// Scripted [`Calibrator`] counting its invocations.
#[derive(Debug, Default)]
pub struct ScriptedCalibrator {
    script: Script,
    requests: Mutex<Vec<CalibrateRequest>>,
}

impl ScriptedCalibrator {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            script: Script {
                failures,
                ..Script::default()
            },
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Calibrator for ScriptedCalibrator {
    fn calibrate(&self, request: &CalibrateRequest) -> Result<(), TaskError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.script.attempt(&request.output)
    }
}

/// [`Solver`] that panics with its message on every call.
#[derive(Debug)]
pub struct PanickingSolver(pub &'static str);

impl Solver for PanickingSolver {
    fn solve(&self, _request: &SolveRequest) -> Result<(), TaskError> {
        panic!("{}", self.0);
    }
}

/// Create empty files at `relative` paths (parents included) under `root`.
pub fn touch_files(root: &Path, relative: &[&str]) {
    for rel in relative {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, b"").expect("write file");
    }
}

/// Scratch workspace with `input/`, `models/` and `output/` directories.
pub struct ScratchTree {
    pub temp: TempDir,
    pub input: PathBuf,
    pub models: PathBuf,
    pub output: PathBuf,
}

impl ScratchTree {
    pub fn new(inputs: &[&str], models: &[&str]) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let input = temp.path().join("input");
        let models_dir = temp.path().join("models");
        let output = temp.path().join("output");
        for dir in [&input, &models_dir, &output] {
            fs::create_dir_all(dir).expect("create scratch dir");
        }
        touch_files(&input, inputs);
        touch_files(&models_dir, models);
        Self {
            temp,
            input,
            models: models_dir,
            output,
        }
    }
}
