use std::fs;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::unbounded;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{ArtifactCategory, DownloadTask, ProfileTag};
use crate::error::DepotError;
use crate::planner::{DownloadPlan, SkippedArtifact, descriptor_path, destination_for};
use crate::progress::{CancelToken, DownloadEvent, ProgressSink, Session};
use crate::store::Store;
use crate::transfer::{RangeTransport, SegmentedDownloader, TransferContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded { bytes: u64, path: Utf8PathBuf },
    Failed { error: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub sequence: usize,
    pub filename: String,
    pub category: ArtifactCategory,
    pub profile_tag: Option<ProfileTag>,
    #[serde(flatten)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedProfile {
    pub profile: ProfileTag,
    pub path: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub outcomes: Vec<TaskOutcome>,
    /// Artifacts the planner left out before the run started.
    pub skipped: Vec<SkippedArtifact>,
    pub finalized_profiles: Vec<FinalizedProfile>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Failed { .. }))
    }

    pub fn skipped_tasks(&self) -> usize {
        self.count(|status| matches!(status, TaskStatus::Skipped { .. }))
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.completed_tasks == self.total_tasks
    }

    fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }
}

/// Runs a whole plan on a fixed number of task workers. Each task may open its
/// own segment connections inside the engine.
pub struct DownloadPool<T: RangeTransport> {
    engine: SegmentedDownloader<T>,
    workers: usize,
    descriptor_template: String,
}

impl<T: RangeTransport> DownloadPool<T> {
    pub fn new(engine: SegmentedDownloader<T>, workers: usize, descriptor_template: &str) -> Self {
        Self {
            engine,
            workers: workers.max(1),
            descriptor_template: descriptor_template.to_string(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Task failures end up in the summary. Only an unusable `root` fails the run.
    pub fn run(
        &self,
        plan: &DownloadPlan,
        root: &Utf8Path,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RunSummary, DepotError> {
        if !root.is_dir() {
            return Err(DepotError::InvalidDestination(root.to_string()));
        }

        let session = Session::new(plan.tasks.len());
        let ctx = TransferContext {
            session: &session,
            sink,
            cancel,
        };
        let width = self.workers.min(plan.tasks.len()).max(1);
        info!(tasks = plan.tasks.len(), workers = width, root = %root, "starting downloads");

        let (job_tx, job_rx) = unbounded::<&DownloadTask>();
        for task in &plan.tasks {
            let _ = job_tx.send(task);
        }
        drop(job_tx);

        let (outcome_tx, outcome_rx) = unbounded::<TaskOutcome>();
        thread::scope(|scope| {
            for _ in 0..width {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let ctx = &ctx;
                scope.spawn(move || {
                    for task in job_rx.iter() {
                        let _ = outcome_tx.send(self.run_task(task, root, ctx));
                    }
                });
            }
        });
        drop(outcome_tx);

        let mut outcomes = outcome_rx.iter().collect::<Vec<_>>();
        outcomes.sort_by_key(|outcome| outcome.sequence);

        let cancelled = cancel.is_cancelled();
        let finalized_profiles = if cancelled {
            info!("run cancelled, skipping profile finalization");
            Vec::new()
        } else {
            self.finalize_profiles(plan, root, sink)
        };

        let completed_tasks = session.completed();
        sink.event(DownloadEvent::RunFinished {
            completed_tasks,
            total_tasks: session.total_tasks(),
        });
        info!(
            completed = completed_tasks,
            total = session.total_tasks(),
            cancelled,
            "downloads finished"
        );

        Ok(RunSummary {
            total_tasks: session.total_tasks(),
            completed_tasks,
            outcomes,
            skipped: plan.skipped.clone(),
            finalized_profiles,
            cancelled,
        })
    }

    fn run_task(&self, task: &DownloadTask, root: &Utf8Path, ctx: &TransferContext<'_>) -> TaskOutcome {
        let outcome = |status: TaskStatus| TaskOutcome {
            sequence: task.sequence_number,
            filename: task.filename.clone(),
            category: task.category,
            profile_tag: task.profile_tag.clone(),
            status,
        };

        if ctx.cancel.is_cancelled() {
            let reason = DepotError::Cancelled.to_string();
            ctx.sink.event(DownloadEvent::TaskSkipped {
                sequence: task.sequence_number,
                filename: task.filename.clone(),
                reason: reason.clone(),
            });
            return outcome(TaskStatus::Skipped { reason });
        }

        let destination = destination_for(root, task);
        ctx.sink.event(DownloadEvent::TaskStarted {
            sequence: task.sequence_number,
            total_tasks: task.total_task_count,
            filename: task.filename.clone(),
            destination: destination.clone(),
        });
        debug!(
            sequence = task.sequence_number,
            total = task.total_task_count,
            file = %task.filename,
            destination = %destination,
            "task started"
        );

        match self.transfer(task, &destination, ctx) {
            Ok(bytes) => {
                let completed_tasks = ctx.session.record_completion();
                info!(file = %task.filename, bytes, completed = completed_tasks, "download complete");
                ctx.sink.event(DownloadEvent::TaskFinished {
                    sequence: task.sequence_number,
                    completed_tasks,
                    total_tasks: ctx.session.total_tasks(),
                    filename: task.filename.clone(),
                    bytes,
                });
                outcome(TaskStatus::Succeeded {
                    bytes,
                    path: destination,
                })
            }
            Err(DepotError::Cancelled) => {
                let reason = DepotError::Cancelled.to_string();
                info!(file = %task.filename, "download cancelled");
                ctx.sink.event(DownloadEvent::TaskSkipped {
                    sequence: task.sequence_number,
                    filename: task.filename.clone(),
                    reason: reason.clone(),
                });
                outcome(TaskStatus::Skipped { reason })
            }
            Err(err) => {
                let error = err.to_string();
                warn!(file = %task.filename, error = %error, "download failed");
                ctx.sink.event(DownloadEvent::TaskFailed {
                    sequence: task.sequence_number,
                    filename: task.filename.clone(),
                    error: error.clone(),
                });
                outcome(TaskStatus::Failed { error })
            }
        }
    }

    fn transfer(
        &self,
        task: &DownloadTask,
        destination: &Utf8Path,
        ctx: &TransferContext<'_>,
    ) -> Result<u64, DepotError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| DepotError::Filesystem(format!("create {parent}: {err}")))?;
        }
        self.engine.download(task, destination, ctx)
    }

    /// Writes the bootloader descriptor for every profile the plan touched.
    /// Runs only after every task has returned.
    fn finalize_profiles(
        &self,
        plan: &DownloadPlan,
        root: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Vec<FinalizedProfile> {
        let mut finalized = Vec::new();
        for profile in plan.profiles() {
            let path = descriptor_path(root, &profile);
            match Store::write_bytes_atomic(&path, self.descriptor_template.as_bytes()) {
                Ok(()) => {
                    info!(profile = %profile, path = %path, "profile finalized");
                    sink.event(DownloadEvent::ProfileFinalized {
                        profile: profile.clone(),
                        path: path.clone(),
                    });
                    finalized.push(FinalizedProfile { profile, path });
                }
                Err(err) => warn!(profile = %profile, error = %err, "could not write bootloader descriptor"),
            }
        }
        finalized
    }
}
