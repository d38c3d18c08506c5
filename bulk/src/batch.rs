//! Batch driver: plan work items, stage result directories, run the pool.
//!
//! Planning is scan → filter → cross product with the configuration tuples →
//! mirrored output path. Execution submits one task per work item to a
//! bounded [`WorkerPool`] and blocks on its barrier; an optional preparation
//! phase runs on its own pool and drains first.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::expand::{colliding_ids, expand};
use crate::core::filter::filter;
use crate::core::layout::{TrialId, mirror};
use crate::core::types::{BatchReport, TaskRecord, Variant, WorkItem};
use crate::io::collaborator::{Calibrator, Solver};
use crate::io::config::{MODEL_AXIS, RunConfig};
use crate::io::output_dir;
use crate::io::prepare::copy_setup_files;
use crate::io::run_log::RunLog;
use crate::io::scan::scan;
use crate::pool::{Completion, WorkerPool, bounded_worker_count};
use crate::task::{run_calibrate_item, run_solve_item};

/// The three directories named on the command line.
#[derive(Debug, Clone)]
pub struct BatchPaths {
    pub input_dir: PathBuf,
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Every (accepted file × configuration tuple) pair, ordered by input path
/// then tuple order.
#[instrument(skip_all, fields(variant = ?variant, input = %paths.input_dir.display()))]
pub fn plan_items(cfg: &RunConfig, variant: Variant, paths: &BatchPaths) -> Result<Vec<WorkItem>> {
    let filter_cfg = cfg.filter_for(variant);
    let predicate = filter_cfg.predicate();
    let tagger = cfg.tagger()?;
    let naming = cfg.naming_for(variant).scheme();

    let tuples = expand(&cfg.axes_for(variant));
    let collisions = colliding_ids(&tuples, &naming.separator);
    if !collisions.is_empty() {
        bail!(
            "configuration tuples produce colliding output names: {}",
            collisions.join(", ")
        );
    }

    let scanned = scan(&paths.input_dir)?;
    let mut accepted: Vec<PathBuf> = filter(scanned, &predicate).collect();
    accepted.sort();
    debug!(accepted = accepted.len(), tuples = tuples.len(), "planning work items");

    let mut items = Vec::with_capacity(accepted.len() * tuples.len());
    for source in accepted {
        let output_dir = mirror(
            &source,
            &paths.input_dir,
            &paths.output_dir,
            cfg.layout.mirror_depth,
        )?;
        let trial = TrialId::from_path(&source, filter_cfg.participant_ancestor, &tagger);
        for tuple in &tuples {
            let model_ext = tuple
                .get(MODEL_AXIS)
                .and_then(|choice| Path::new(&choice.value).extension())
                .and_then(|ext| ext.to_str());
            let file_name = naming.file_name(&trial.stem, tuple.labels(), model_ext);
            items.push(WorkItem {
                source: source.clone(),
                output: output_dir.join(file_name),
                output_dir: output_dir.clone(),
                trial: trial.clone(),
                tuple: tuple.clone(),
            });
        }
    }
    Ok(items)
}

/// Plan and run an `ik` batch.
pub fn run_ik<S: Solver + 'static>(
    cfg: Arc<RunConfig>,
    paths: &BatchPaths,
    solver: Arc<S>,
    log: Arc<RunLog>,
) -> Result<BatchReport> {
    let models_dir = paths.models_dir.clone();
    let task_cfg = Arc::clone(&cfg);
    let task_log = Arc::clone(&log);
    run_batch(&cfg, Variant::Ik, paths, &log, move |item| {
        run_solve_item(item, &task_cfg, &models_dir, solver.as_ref(), &task_log)
    })
}

/// Plan and run a `calibrate` batch.
pub fn run_calibration<C: Calibrator + 'static>(
    cfg: Arc<RunConfig>,
    paths: &BatchPaths,
    calibrator: Arc<C>,
    log: Arc<RunLog>,
) -> Result<BatchReport> {
    let models_dir = paths.models_dir.clone();
    let task_cfg = Arc::clone(&cfg);
    let task_log = Arc::clone(&log);
    run_batch(&cfg, Variant::Calibrate, paths, &log, move |item| {
        run_calibrate_item(item, &task_cfg, &models_dir, calibrator.as_ref(), &task_log)
    })
}

fn run_batch<F>(
    cfg: &RunConfig,
    variant: Variant,
    paths: &BatchPaths,
    log: &RunLog,
    run: F,
) -> Result<BatchReport>
where
    F: Fn(WorkItem) -> TaskRecord + Send + Sync + 'static,
{
    let started = Instant::now();
    let items = plan_items(cfg, variant, paths).context("plan work items")?;
    log.println(format_args!(
        "Planned {} work items from {}",
        items.len(),
        paths.input_dir.display()
    ));

    if !cfg.prepare.copy_files.is_empty() {
        let dirs: BTreeSet<PathBuf> = items.iter().map(|item| item.output_dir.clone()).collect();
        prepare_dirs(cfg, &paths.models_dir, dirs, log)?;
    }

    let pool = WorkerPool::new("bulk-worker", bounded_worker_count(cfg.workers.max_workers))?;
    info!(workers = pool.size(), items = items.len(), "dispatching work items");
    let run = Arc::new(run);
    for item in items {
        let run = Arc::clone(&run);
        pool.submit(move || run(item));
    }

    let mut records = Vec::new();
    let mut panics = Vec::new();
    for completion in pool.wait() {
        match completion {
            Completion::Finished(record) => records.push(record),
            Completion::Panicked(message) => {
                log.println(format_args!("Error in processing: task panicked: {message}"));
                panics.push(message);
            }
        }
    }
    records.sort_by(|a, b| a.item.output.cmp(&b.item.output));

    let report = BatchReport::new(records, panics, started.elapsed());
    log.println(report.summary());
    log.println(format_args!("Runtime = {} [µs]", report.elapsed_micros));
    Ok(report)
}

/// Create every result directory and copy the setup files into it on a
/// separate pool. Failures are logged; the directory's items still run.
fn prepare_dirs(
    cfg: &RunConfig,
    models_dir: &Path,
    dirs: BTreeSet<PathBuf>,
    log: &RunLog,
) -> Result<()> {
    let pool: WorkerPool<(PathBuf, Result<()>)> = WorkerPool::new(
        "bulk-prepare",
        bounded_worker_count(cfg.workers.prepare_workers),
    )?;
    let files = Arc::new(cfg.prepare.copy_files.clone());
    let models_dir = Arc::new(models_dir.to_path_buf());
    for dir in dirs {
        let files = Arc::clone(&files);
        let models_dir = Arc::clone(&models_dir);
        pool.submit(move || {
            let result = output_dir::ensure(&dir)
                .map_err(anyhow::Error::from)
                .and_then(|()| copy_setup_files(&models_dir, &files, &dir));
            (dir, result)
        });
    }

    for completion in pool.wait() {
        match completion {
            Completion::Finished((dir, Ok(()))) => {
                debug!(dir = %dir.display(), "prepared result directory");
            }
            Completion::Finished((dir, Err(err))) => {
                log.println(format_args!("Error preparing {}: {err:#}", dir.display()));
            }
            Completion::Panicked(message) => {
                log.println(format_args!("Error preparing result directory: {message}"));
            }
        }
    }
    Ok(())
}
