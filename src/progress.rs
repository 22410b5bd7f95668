//! Events flowing from download workers to a single consumer, plus the
//! per-run shared state workers update.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use crossbeam_channel::Sender;
use serde::Serialize;

use crate::domain::ProfileTag;
use crate::error::DepotError;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownloadEvent {
    TaskStarted {
        sequence: usize,
        total_tasks: usize,
        filename: String,
        destination: Utf8PathBuf,
    },
    Progress {
        filename: String,
        completed_tasks: usize,
        total_tasks: usize,
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
    },
    TaskFinished {
        sequence: usize,
        completed_tasks: usize,
        total_tasks: usize,
        filename: String,
        bytes: u64,
    },
    TaskFailed {
        sequence: usize,
        filename: String,
        error: String,
    },
    TaskSkipped {
        sequence: usize,
        filename: String,
        reason: String,
    },
    ProfileFinalized {
        profile: ProfileTag,
        path: Utf8PathBuf,
    },
    RunFinished {
        completed_tasks: usize,
        total_tasks: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: DownloadEvent);
}

impl ProgressSink for Sender<DownloadEvent> {
    fn event(&self, event: DownloadEvent) {
        // The consumer going away only means nobody is watching.
        let _ = self.send(event);
    }
}

pub struct NullSink;

impl ProgressSink for NullSink {
    fn event(&self, _event: DownloadEvent) {}
}

/// Cooperative cancellation shared by every worker of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), DepotError> {
        if self.is_cancelled() {
            return Err(DepotError::Cancelled);
        }
        Ok(())
    }
}

/// Counters shared by all tasks of one download run.
#[derive(Debug)]
pub struct Session {
    total_tasks: usize,
    completed: Mutex<usize>,
    last_emit: Mutex<Option<Instant>>,
    emit_interval: Duration,
}

impl Session {
    pub fn new(total_tasks: usize) -> Self {
        Self::with_interval(total_tasks, PROGRESS_INTERVAL)
    }

    pub fn with_interval(total_tasks: usize, emit_interval: Duration) -> Self {
        Self {
            total_tasks,
            completed: Mutex::new(0),
            last_emit: Mutex::new(None),
            emit_interval,
        }
    }

    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    pub fn completed(&self) -> usize {
        *lock(&self.completed)
    }

    /// Counts one fully transferred task and returns the new total. Never
    /// exceeds the planned task count.
    pub fn record_completion(&self) -> usize {
        let mut completed = lock(&self.completed);
        if *completed < self.total_tasks {
            *completed += 1;
        }
        *completed
    }

    /// True at most once per emit interval across all workers.
    pub fn should_emit(&self) -> bool {
        let mut last = lock(&self.last_emit);
        let now = Instant::now();
        match *last {
            Some(previous) if now.duration_since(previous) < self.emit_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
