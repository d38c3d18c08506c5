//! Bounded worker pool with a blocking "wait for all" barrier.
//!
//! Workers pull boxed closures from one shared FIFO channel. Every task's
//! return value (or its panic message) is collected and handed back by
//! [`WorkerPool::wait`]. Tasks may submit further tasks through a cloned
//! [`Submitter`]; `wait` also covers those.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, warn};

/// Result of one task as seen by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    Finished(T),
    /// The task panicked; the worker survived.
    Panicked(String),
}

type Job<T> = Box<dyn FnOnce() -> T + Send + 'static>;

enum Message<T> {
    Run(Job<T>),
    Stop,
}

struct State<T> {
    pending: usize,
    completed: Vec<Completion<T>>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    idle: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle for enqueuing work, usable from inside running tasks.
pub struct Submitter<T> {
    sender: Sender<Message<T>>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Submitter<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Submitter<T> {
    /// Enqueue `task`. Never blocks.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        // Counted before sending so a concurrent `wait` cannot miss it.
        self.shared.lock().pending += 1;
        if self.sender.send(Message::Run(Box::new(task))).is_err() {
            warn!("worker pool is shut down; dropping task");
            let mut state = self.shared.lock();
            state.pending -= 1;
            if state.pending == 0 {
                self.shared.idle.notify_all();
            }
        }
    }
}

pub struct WorkerPool<T> {
    submitter: Submitter<T>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `threads` named workers (at least one).
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: 0,
                completed: Vec::new(),
            }),
            idle: Condvar::new(),
        });

        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let receiver = receiver.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(&receiver, &shared))
                .with_context(|| format!("spawn worker {name}-{idx}"))?;
            workers.push(handle);
        }
        debug!(name, threads, "worker pool started");

        Ok(Self {
            submitter: Submitter { sender, shared },
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.submitter.submit(task);
    }

    pub fn submitter(&self) -> Submitter<T> {
        self.submitter.clone()
    }

    /// Block until no task is queued or running, then drain the collected results.
    ///
    /// Returns immediately when nothing was submitted. Results arrive in
    /// completion order.
    pub fn wait(&self) -> Vec<Completion<T>> {
        let shared = &self.submitter.shared;
        let mut state = shared.lock();
        while state.pending > 0 {
            state = shared
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        std::mem::take(&mut state.completed)
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        for _ in &self.workers {
            // Workers hold the receiver; send only fails if they are all gone.
            let _ = self.submitter.sender.send(Message::Stop);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked outside a task");
            }
        }
    }
}

fn worker_loop<T>(receiver: &Receiver<Message<T>>, shared: &Shared<T>) {
    for message in receiver {
        let job = match message {
            Message::Run(job) => job,
            Message::Stop => break,
        };
        let completion = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(value) => Completion::Finished(value),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "task panicked");
                Completion::Panicked(message)
            }
        };
        let mut state = shared.lock();
        state.completed.push(completion);
        state.pending -= 1;
        if state.pending == 0 {
            shared.idle.notify_all();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// `min(available cores, cap)`, at least one.
pub fn bounded_worker_count(cap: usize) -> usize {
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    cores.min(cap).max(1)
}
