//! Task engine: submission pipeline and queue commands.
//!
//! [`TaskEngine`] owns the registry, the gallery, the event bus and the
//! poller, and drives a [`JobsBackend`]. The poll cycle lives in
//! [`crate::reconcile`], startup recovery in [`crate::recovery`].

use std::sync::Arc;

use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dimensions::{AspectRatio, Dimensions};
use crate::error::{EngineError, Result, SubmitFailure};
use crate::events::{EngineEvent, EventBus};
use crate::gallery::Gallery;
use crate::media::PendingDeletes;
use crate::queue::{self, QueueView};
use crate::reconcile::Poller;
use crate::registry::TaskRegistry;
use crate::types::{now_ts, GenerateParams, GenerationRequest, Task, TaskId, TaskStatus};
use crate::JobsBackend;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `task_<unix millis>_<4 base36 chars>`
fn new_task_id() -> TaskId {
    let mut rng = rand::rng();
    let suffix: String = (0..4)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("task_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

pub(crate) struct EngineInner<B> {
    pub(crate) backend: B,
    pub(crate) config: EngineConfig,
    pub(crate) registry: TaskRegistry,
    pub(crate) gallery: Gallery,
    pub(crate) events: EventBus,
    pub(crate) poller: Poller,
    pub(crate) pending_deletes: PendingDeletes,
}

/// Cheaply cloneable handle to the task engine.
///
/// All clones share one registry, gallery and poller.
pub struct TaskEngine<B: JobsBackend> {
    pub(crate) inner: Arc<EngineInner<B>>,
}

impl<B: JobsBackend> Clone for TaskEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Which server command a cancellation sends.
#[derive(Debug, Clone, Copy)]
enum CancelKind {
    Queued,
    Generating,
}

impl<B: JobsBackend> TaskEngine<B> {
    /// Create an engine over `backend`. Nothing runs until the first
    /// submission or [`recover`](Self::recover).
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let events = EventBus::new();
        Self {
            inner: Arc::new(EngineInner {
                backend,
                config,
                registry: TaskRegistry::new(events.clone()),
                gallery: Gallery::new(),
                events,
                poller: Poller::default(),
                pending_deletes: PendingDeletes::default(),
            }),
        }
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn gallery(&self) -> &Gallery {
        &self.inner.gallery
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Subscribe to engine events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Validate `request`, register a task for it and enqueue it on the
    /// backend.
    ///
    /// The task is visible in the registry before the backend is contacted.
    /// A failed enqueue does not fail this call: the task is kept with
    /// `failed = true` and a [`SubmitFailure`], and
    /// [`EngineEvent::SubmissionFailed`] is published. Only local validation
    /// errors are returned.
    pub async fn submit(&self, request: GenerationRequest) -> Result<TaskId> {
        let (params, dims) = self.build_params(&request)?;
        let task_id = new_task_id();

        let (width, height) = if dims.is_auto {
            (None, None)
        } else {
            (Some(dims.width), Some(dims.height))
        };
        self.inner.registry.upsert(Task {
            id: task_id.clone(),
            prompt: params.prompt.clone(),
            count: params.count,
            parallel: params.parallel,
            queued_ts: now_ts(),
            started_ts: None,
            status: TaskStatus::Queued,
            completed: 0,
            job_id: None,
            queue_position: None,
            failed: false,
            error: None,
            params: Some(params.clone()),
            ratio: params.ratio.clone(),
            width,
            height,
            ref_images: params.ref_images.clone(),
            recovered: false,
            results_seen: 0,
        });
        info!(
            task_id = %task_id,
            count = params.count,
            parallel = params.parallel,
            ratio = %params.ratio,
            "Task submitted"
        );

        self.dispatch(&task_id, &params).await;
        Ok(task_id)
    }

    /// Re-send a task whose submission failed, keeping its id.
    pub async fn retry(&self, task_id: &str) -> Result<()> {
        let params = self
            .inner
            .registry
            .update(task_id, |t| {
                if !t.failed {
                    return Err(EngineError::InvalidState(format!(
                        "Task {} has not failed",
                        t.id
                    )));
                }
                let params = t.params.clone().ok_or_else(|| {
                    EngineError::InvalidState(format!("Task {} has no request to resend", t.id))
                })?;
                t.failed = false;
                t.error = None;
                t.queued_ts = now_ts();
                Ok(params)
            })
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))??;

        info!(task_id = %task_id, "Retrying submission");
        self.dispatch(task_id, &params).await;
        Ok(())
    }

    /// Drop a task whose submission failed. No network call.
    pub fn discard(&self, task_id: &str) -> Result<()> {
        let task = self
            .inner
            .registry
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        if !task.failed {
            return Err(EngineError::InvalidState(format!(
                "Task {} has not failed",
                task_id
            )));
        }
        self.inner.registry.remove(task_id);
        self.inner.events.publish(EngineEvent::TaskCancelled {
            task_id: task_id.to_string(),
        });
        debug!(task_id = %task_id, "Failed task discarded");
        Ok(())
    }

    /// Send `params` and record the outcome on the task.
    async fn dispatch(&self, task_id: &str, params: &GenerateParams) {
        let outcome = match tokio::time::timeout(
            self.inner.config.submit_timeout,
            self.inner.backend.generate(params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        };

        match outcome {
            Ok(enqueued) => {
                let tracked = self.inner.registry.update(task_id, |t| {
                    t.job_id = Some(enqueued.job_id.clone());
                    t.queue_position = enqueued.queue_position;
                    t.failed = false;
                    t.error = None;
                });
                if tracked.is_none() {
                    warn!(
                        task_id = %task_id,
                        job_id = %enqueued.job_id,
                        "Task removed while submitting; job left on server"
                    );
                    return;
                }
                info!(
                    task_id = %task_id,
                    job_id = %enqueued.job_id,
                    queue_position = ?enqueued.queue_position,
                    "Job enqueued"
                );
                self.inner.events.publish(EngineEvent::Submitted {
                    task_id: task_id.to_string(),
                    job_id: enqueued.job_id,
                    queue_position: enqueued.queue_position,
                });
                self.start_polling();
            }
            Err(e) => {
                let failure = SubmitFailure::classify(&e);
                warn!(task_id = %task_id, error = %e, "Submission failed");
                self.inner.registry.update(task_id, |t| {
                    t.failed = true;
                    t.error = Some(failure.clone());
                });
                self.inner.events.publish(EngineEvent::SubmissionFailed {
                    task_id: task_id.to_string(),
                    error: failure,
                });
            }
        }
    }

    fn build_params(&self, request: &GenerationRequest) -> Result<(GenerateParams, Dimensions)> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Err(EngineError::InvalidRequest("prompt is empty".into()));
        }
        let api_url = request.api_url.trim();
        if api_url.is_empty() {
            return Err(EngineError::InvalidRequest("api_url is empty".into()));
        }

        let ratio: AspectRatio = request.ratio.parse()?;
        let dims = ratio.resolve(request.resolution, self.inner.config.placeholder_edge)?;
        let count = request.count.clamp(1, self.inner.config.max_count);

        let params = GenerateParams {
            api_url: api_url.to_string(),
            prompt: prompt.to_string(),
            seed: request.seed.unwrap_or(self.inner.config.default_seed),
            image_size: dims.image_size_param().to_string(),
            // the backend reads these transposed
            width: dims.height,
            height: dims.width,
            ratio: ratio.to_string(),
            actual_width: dims.width,
            actual_height: dims.height,
            steps: request.steps.unwrap_or(self.inner.config.default_steps),
            count,
            parallel: request.parallel,
            ref_images: request.ref_images.clone(),
        };
        Ok((params, dims))
    }

    // ── Queue commands ──────────────────────────────────────────────

    /// Remove a task that has not started generating.
    pub async fn cancel_queued(&self, task_id: &str) -> Result<()> {
        self.cancel(task_id, CancelKind::Queued).await
    }

    /// Stop a task that is generating.
    pub async fn cancel_generating(&self, task_id: &str) -> Result<()> {
        self.cancel(task_id, CancelKind::Generating).await
    }

    async fn cancel(&self, task_id: &str, kind: CancelKind) -> Result<()> {
        let task = self
            .inner
            .registry
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        if let Some(job_id) = &task.job_id {
            let existed = match kind {
                CancelKind::Queued => self.inner.backend.delete_job(job_id).await?,
                CancelKind::Generating => self.inner.backend.cancel_job(job_id).await?,
            };
            if !existed {
                debug!(task_id = %task_id, job_id = %job_id, "Job already gone on server");
            }
        }

        if self.inner.registry.remove(task_id).is_some() {
            info!(task_id = %task_id, kind = ?kind, "Task cancelled");
            self.inner.events.publish(EngineEvent::TaskCancelled {
                task_id: task_id.to_string(),
            });
        }
        Ok(())
    }

    /// Move a queued task to the front of the server queue.
    ///
    /// A task that has no server job yet is rejected with
    /// [`EngineError::NotReady`] without contacting the backend. If the
    /// backend no longer knows the job, the task is dropped locally.
    pub async fn prioritize(&self, task_id: &str) -> Result<()> {
        let task = self
            .inner
            .registry
            .get(task_id)
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        let job_id = task.job_id.ok_or_else(|| {
            EngineError::NotReady(format!("Task {} has not been accepted yet", task_id))
        })?;

        if !self.inner.backend.prioritize_job(&job_id).await? {
            info!(task_id = %task_id, job_id = %job_id, "Job no longer exists; dropping task");
            self.inner.registry.remove(task_id);
            return Ok(());
        }

        // 0 sorts ahead of every real timestamp
        self.inner.registry.update(task_id, |t| t.queued_ts = 0.0);
        self.inner.events.publish(EngineEvent::TaskPrioritized {
            task_id: task_id.to_string(),
        });
        info!(task_id = %task_id, job_id = %job_id, "Task prioritized");
        Ok(())
    }

    // ── Presentation ────────────────────────────────────────────────

    /// Current registry partitioned for display.
    pub fn queue_view(&self) -> QueueView {
        QueueView::from_tasks(self.inner.registry.snapshot())
    }

    /// Mean per-image duration of recent gallery entries.
    pub fn average_duration(&self) -> Option<f64> {
        self.inner
            .gallery
            .average_duration(self.inner.config.duration_window)
    }

    /// Estimated progress of a generating task in percent.
    pub fn progress(&self, task: &Task) -> Option<f64> {
        queue::progress_percent(task, self.average_duration(), now_ts())
    }
}
