//! Poll cycle that merges server job state into local tasks, and the
//! controller that runs it on a timer while there is work.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::TaskEngine;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::types::{HistoryRecord, JobResult, ServerJob, ServerJobStatus, Task, TaskStatus};
use crate::JobsBackend;

/// Handle slot for the background poll loop.
///
/// `None` means stopped. The loop clears the slot itself, under the same
/// lock, when it exits because the registry is empty.
#[derive(Default)]
pub struct Poller {
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Apply one server job to a task. Returns the gallery records for results
/// not seen before.
fn merge_job(task: &mut Task, job: &ServerJob) -> Vec<HistoryRecord> {
    if let Some(started) = job.started_ts {
        task.started_ts = Some(match task.started_ts {
            Some(old) => old.max(started),
            None => started,
        });
    }
    task.completed = task.completed.max(job.completed);
    task.status = match job.status {
        ServerJobStatus::Pending | ServerJobStatus::Unknown => TaskStatus::Queued,
        ServerJobStatus::Generating => TaskStatus::Generating {
            completed: task.completed,
        },
        ServerJobStatus::Completed => TaskStatus::Completed,
        ServerJobStatus::Error => TaskStatus::Failed {
            error: job
                .error
                .clone()
                .unwrap_or_else(|| "generation failed".to_string()),
        },
    };

    let fresh: Vec<&JobResult> = job.results.iter().skip(task.results_seen).collect();
    task.results_seen = task.results_seen.max(job.results.len());
    fresh
        .into_iter()
        .map(|result| HistoryRecord::from_result(task, result))
        .collect()
}

impl<B: JobsBackend> TaskEngine<B> {
    /// Start the background poll loop if it is not already running.
    pub fn start_polling(&self) {
        let Ok(mut slot) = self.inner.poller.handle.lock() else {
            warn!("poller mutex poisoned");
            return;
        };
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        debug!("Starting poller");
        let engine = self.clone();
        *slot = Some(tokio::spawn(async move { engine.poll_loop().await }));
    }

    /// Stop the background poll loop. A cycle in progress is abandoned.
    pub fn stop_polling(&self) {
        if let Ok(mut slot) = self.inner.poller.handle.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
                debug!("Poller stopped");
            }
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .poller
            .handle
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    async fn poll_loop(self) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;

            let idle = match self.inner.poller.handle.lock() {
                Ok(mut slot) => {
                    let idle = self.inner.registry.is_empty();
                    if idle {
                        *slot = None;
                    }
                    idle
                }
                Err(_) => true,
            };
            if idle {
                debug!("No tasks left, poller exiting");
                return;
            }
        }
    }

    /// Run one reconciliation cycle against the backend's job list.
    ///
    /// A failed fetch skips the cycle; nothing local changes.
    pub async fn poll_once(&self) {
        let jobs = match self.inner.backend.jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "Failed to fetch jobs, skipping poll cycle");
                return;
            }
        };
        let by_id: HashMap<&str, &ServerJob> =
            jobs.iter().map(|j| (j.job_id.as_str(), j)).collect();

        let mut vanished = false;
        for task in self.inner.registry.snapshot() {
            let Some(job_id) = task.job_id.as_deref() else {
                continue;
            };
            match by_id.get(job_id) {
                Some(job) => self.reconcile_task(&task.id, job),
                None => vanished |= self.complete_vanished(&task),
            }
        }

        if vanished {
            if let Err(e) = self.refresh_history().await {
                warn!(error = %e, "Failed to refresh history");
            }
        }
        self.inner.events.publish(EngineEvent::QueueChanged);
    }

    /// Replace the gallery with the backend's persisted history.
    pub async fn refresh_history(&self) -> Result<usize> {
        let records = self.inner.backend.history().await?;
        let count = records.len();
        self.inner.gallery.replace(records);
        self.inner
            .events
            .publish(EngineEvent::HistoryRefreshed { count });
        debug!(count, "History refreshed");
        Ok(count)
    }

    /// The server forgot the job: treat it as finished.
    fn complete_vanished(&self, task: &Task) -> bool {
        if self.inner.registry.remove(&task.id).is_none() {
            return false;
        }
        info!(
            task_id = %task.id,
            job_id = ?task.job_id,
            "Job no longer on server, treating as completed"
        );
        self.inner.events.publish(EngineEvent::TaskCompleted {
            task_id: task.id.clone(),
            prompt: task.prompt.clone(),
            batch_total_sec: None,
        });
        true
    }

    fn reconcile_task(&self, task_id: &str, job: &ServerJob) {
        let Some((records, task)) = self.inner.registry.update(task_id, |t| {
            let records = merge_job(t, job);
            (records, t.clone())
        }) else {
            return;
        };

        if !records.is_empty() {
            let count = records.len();
            for record in records {
                self.inner.gallery.prepend(record);
            }
            debug!(task_id = %task_id, count, "New results");
            self.inner.events.publish(EngineEvent::ResultsArrived {
                task_id: task_id.to_string(),
                count,
            });
        }

        match job.status {
            ServerJobStatus::Completed => self.finish_completed(&task, job),
            ServerJobStatus::Error => self.finish_failed(&task),
            _ => {}
        }
    }

    fn finish_completed(&self, task: &Task, job: &ServerJob) {
        if self.inner.registry.remove(&task.id).is_none() {
            return;
        }
        self.inner
            .gallery
            .backfill_batch(&task.prompt, job.batch_total, task.count);
        self.spawn_ack(job.job_id.clone());

        info!(
            task_id = %task.id,
            job_id = %job.job_id,
            batch_total_sec = ?job.batch_total,
            "Task completed"
        );
        self.inner.events.publish(EngineEvent::TaskCompleted {
            task_id: task.id.clone(),
            prompt: task.prompt.clone(),
            batch_total_sec: job.batch_total,
        });
    }

    /// Acknowledge in the background; failures are logged and never retried.
    fn spawn_ack(&self, job_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(
                engine.inner.config.ack_timeout,
                engine.inner.backend.ack(&job_id),
            )
            .await
            {
                Ok(Ok(())) => debug!(job_id = %job_id, "Job acknowledged"),
                Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "Ack failed"),
                Err(_) => warn!(job_id = %job_id, "Ack timed out"),
            }
        });
    }

    fn finish_failed(&self, task: &Task) {
        if self.inner.registry.remove(&task.id).is_none() {
            return;
        }
        let error = match &task.status {
            TaskStatus::Failed { error } => error.clone(),
            _ => "generation failed".to_string(),
        };
        warn!(task_id = %task.id, job_id = ?task.job_id, error = %error, "Generation failed");
        self.inner.events.publish(EngineEvent::GenerationFailed {
            task_id: task.id.clone(),
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked_task() -> Task {
        Task {
            id: "task_1".into(),
            prompt: "cat".into(),
            count: 3,
            parallel: false,
            queued_ts: 100.0,
            started_ts: None,
            status: TaskStatus::Queued,
            completed: 0,
            job_id: Some("ab12cd34".into()),
            queue_position: Some(1),
            failed: false,
            error: None,
            params: None,
            ratio: "1:1".into(),
            width: Some(1280),
            height: Some(1280),
            ref_images: Vec::new(),
            recovered: false,
            results_seen: 0,
        }
    }

    fn result(name: &str) -> JobResult {
        JobResult {
            filename: name.into(),
            url: format!("/output/{}", name),
            info: None,
            duration: Some(10.0),
            seed: Some(42),
        }
    }

    #[test]
    fn test_merge_generating() {
        let mut task = tracked_task();
        let mut job = ServerJob::new("ab12cd34");
        job.status = ServerJobStatus::Generating;
        job.started_ts = Some(200.0);
        job.completed = 1;
        job.results = vec![result("0.png")];

        let records = merge_job(&mut task, &job);
        assert_eq!(records.len(), 1);
        assert_eq!(task.started_ts, Some(200.0));
        assert_eq!(task.status, TaskStatus::Generating { completed: 1 });
        assert_eq!(task.results_seen, 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut task = tracked_task();
        let mut job = ServerJob::new("ab12cd34");
        job.status = ServerJobStatus::Generating;
        job.results = vec![result("0.png"), result("1.png")];

        assert_eq!(merge_job(&mut task, &job).len(), 2);
        assert!(merge_job(&mut task, &job).is_empty());
        assert!(merge_job(&mut task, &job).is_empty());
    }

    #[test]
    fn test_merge_never_regresses() {
        let mut task = tracked_task();
        let mut job = ServerJob::new("ab12cd34");
        job.status = ServerJobStatus::Generating;
        job.started_ts = Some(200.0);
        job.completed = 2;
        merge_job(&mut task, &job);

        job.started_ts = None;
        job.completed = 1;
        merge_job(&mut task, &job);
        assert_eq!(task.started_ts, Some(200.0));
        assert_eq!(task.completed, 2);

        job.started_ts = Some(150.0);
        merge_job(&mut task, &job);
        assert_eq!(task.started_ts, Some(200.0));
    }

    #[test]
    fn test_merge_error_status() {
        let mut task = tracked_task();
        let mut job = ServerJob::new("ab12cd34");
        job.status = ServerJobStatus::Error;
        job.error = Some("CUDA out of memory".into());
        merge_job(&mut task, &job);
        assert_eq!(
            task.status,
            TaskStatus::Failed {
                error: "CUDA out of memory".into()
            }
        );
        // server-side failure is not a submission failure
        assert!(!task.failed);
    }

    #[test]
    fn test_merge_results_are_most_recent_last() {
        let mut task = tracked_task();
        let mut job = ServerJob::new("ab12cd34");
        job.results = vec![result("0.png"), result("1.png")];
        let records = merge_job(&mut task, &job);
        assert_eq!(records[0].filename, "0.png");
        assert_eq!(records[1].filename, "1.png");
    }
}
