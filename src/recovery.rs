//! Re-attach to jobs the server is still working on after a restart.

use tracing::{info, warn};

use crate::engine::TaskEngine;
use crate::error::Result;
use crate::events::EngineEvent;
use crate::types::{now_ts, ServerJob, Task, TaskStatus};
use crate::JobsBackend;

const RESTORING_PROMPT: &str = "restoring\u{2026}";

/// Build a local task for a server job nobody is tracking.
fn recovered_task(job: &ServerJob) -> Task {
    let status = match job.started_ts {
        Some(_) => TaskStatus::Generating {
            completed: job.completed,
        },
        None => TaskStatus::Queued,
    };
    Task {
        id: format!("recover_{}", job.job_id),
        prompt: job
            .prompt
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| RESTORING_PROMPT.to_string()),
        count: job.count.unwrap_or(1).max(1),
        parallel: job.parallel.unwrap_or(false),
        queued_ts: job.queued_ts.unwrap_or_else(now_ts),
        started_ts: job.started_ts,
        status,
        completed: job.completed,
        job_id: Some(job.job_id.clone()),
        queue_position: None,
        failed: false,
        error: None,
        params: None,
        ratio: job.ratio.clone().unwrap_or_else(|| "auto".to_string()),
        width: job.actual_width,
        height: job.actual_height,
        ref_images: job.ref_images.clone().unwrap_or_default(),
        recovered: true,
        // images finished before the restart are already in the persisted history
        results_seen: job.completed as usize,
    }
}

impl<B: JobsBackend> TaskEngine<B> {
    /// Register a task for every server job not already tracked locally,
    /// and start polling if anything was registered. Returns how many
    /// tasks were recovered.
    ///
    /// Intended to run once at startup; calling it again is harmless.
    pub async fn recover(&self) -> Result<usize> {
        let jobs = self.inner.backend.jobs().await.map_err(|e| {
            warn!(error = %e, "Failed to fetch jobs for recovery");
            e
        })?;

        let mut recovered = 0;
        for job in &jobs {
            if self.inner.registry.find_by_job(&job.job_id).is_some() {
                continue;
            }
            let task = recovered_task(job);
            info!(task_id = %task.id, job_id = %job.job_id, "Recovered job");
            self.inner.registry.upsert(task);
            recovered += 1;
        }

        if recovered > 0 {
            self.inner
                .events
                .publish(EngineEvent::TasksRecovered { count: recovered });
            self.start_polling();
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallbacks() {
        let task = recovered_task(&ServerJob::new("ab12cd34"));
        assert_eq!(task.id, "recover_ab12cd34");
        assert_eq!(task.prompt, "restoring\u{2026}");
        assert_eq!(task.count, 1);
        assert_eq!(task.ratio, "auto");
        assert!(task.started_ts.is_none());
        assert!(task.queued_ts > 0.0);
        assert!(task.recovered);
        assert_eq!(task.status, TaskStatus::Queued);
    }

    #[test]
    fn test_echoed_fields() {
        let mut job = ServerJob::new("ab12cd34");
        job.prompt = Some("cat".into());
        job.count = Some(3);
        job.completed = 1;
        job.parallel = Some(true);
        job.ratio = Some("16:9".into());
        job.actual_width = Some(1280);
        job.actual_height = Some(720);
        job.queued_ts = Some(1000.0);
        job.started_ts = Some(1010.0);
        job.ref_images = Some(vec!["ref.png".into()]);

        let task = recovered_task(&job);
        assert_eq!(task.prompt, "cat");
        assert_eq!(task.count, 3);
        assert_eq!(task.queued_ts, 1000.0);
        assert_eq!(task.started_ts, Some(1010.0));
        assert_eq!(task.results_seen, 1);
        assert_eq!(task.status, TaskStatus::Generating { completed: 1 });
        assert_eq!(task.size_label(), "16:9 1280×720");
        assert_eq!(task.ref_images, vec!["ref.png".to_string()]);
    }
}
