//! # gallery-jobs
//!
//! Client-side task queue for an asynchronous image-generation backend.
//!
//! Generation requests are inserted into a local [`TaskRegistry`] the moment
//! they are submitted, enqueued on the backend, and then reconciled against
//! the backend's authoritative job list every couple of seconds until they
//! complete, fail, or are cancelled. Finished images flow into a
//! most-recent-first [`Gallery`].
//!
//! ## Features
//!
//! - Optimistic submission with a bounded timeout, classified failures and retry
//! - Index-based result diffing that never duplicates gallery entries
//! - Self-stopping poller that restarts whenever work is (re)inserted
//! - Recovery of in-flight server jobs after a client restart
//! - Queue partitioning (failed / generating / queued) with cancel and prioritize
//! - Gallery upkeep: reference uploads, imports, reordering and undoable deletes
//!
//! ## Quick Start
//!
//! ```no_run
//! use gallery_jobs::{EngineConfig, GenerationRequest, HttpBackend, TaskEngine};
//!
//! # async fn example() -> gallery_jobs::Result<()> {
//! let config = EngineConfig::default();
//! let engine = TaskEngine::new(HttpBackend::from_config(&config), config);
//!
//! // Re-attach to anything the server is still working on
//! engine.recover().await?;
//!
//! let task_id = engine
//!     .submit(GenerationRequest::new("http://gpu-box:30000", "a cat").ratio("16:9").count(2))
//!     .await?;
//!
//! let mut events = engine.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # let _ = task_id;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dimensions;
pub mod engine;
pub mod error;
pub mod events;
pub mod gallery;
pub mod media;
pub mod pricing;
pub mod queue;
pub mod reconcile;
pub mod recovery;
pub mod registry;
pub mod types;

pub use client::HttpBackend;
pub use config::{EngineConfig, EngineConfigBuilder};
pub use dimensions::{resolve_dimensions, AspectRatio, Dimensions};
pub use engine::TaskEngine;
pub use error::{EngineError, Result, SubmitFailure};
pub use events::{EngineEvent, EventBus};
pub use gallery::Gallery;
pub use queue::QueueView;
pub use registry::TaskRegistry;
pub use types::{
    Enqueued, GenerateParams, GenerationRequest, HistoryRecord, JobResult, ServerJob,
    ServerJobStatus, Task, TaskId, TaskStatus, Upload,
};

/// The backend operations the engine depends on.
///
/// [`HttpBackend`] implements this against the real HTTP API; tests plug in
/// scripted fakes.
///
/// Job commands return `Ok(false)` when the backend answers 404, meaning the
/// job no longer exists server-side.
///
/// # Example
///
/// ```ignore
/// use gallery_jobs::*;
///
/// struct Offline;
///
/// impl JobsBackend for Offline {
///     async fn generate(&self, _params: &GenerateParams) -> Result<Enqueued> {
///         Err(EngineError::Rejected("offline".into()))
///     }
///     async fn jobs(&self) -> Result<Vec<ServerJob>> {
///         Ok(Vec::new())
///     }
///     // ...
/// }
/// ```
pub trait JobsBackend: Send + Sync + 'static {
    /// Enqueue a generation. The engine bounds this call with its submit timeout.
    fn generate(
        &self,
        params: &GenerateParams,
    ) -> impl std::future::Future<Output = Result<Enqueued>> + Send;

    /// All jobs the server still tracks.
    fn jobs(&self) -> impl std::future::Future<Output = Result<Vec<ServerJob>>> + Send;

    /// Acknowledge a completed job so the server may purge it.
    fn ack(&self, job_id: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove a queued job.
    fn delete_job(&self, job_id: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Stop a job that is generating.
    fn cancel_job(&self, job_id: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Move a queued job to the front of the server queue.
    fn prioritize_job(
        &self,
        job_id: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// The persisted gallery, most recent first.
    fn history(&self) -> impl std::future::Future<Output = Result<Vec<HistoryRecord>>> + Send;

    /// Store a reference image for later generations.
    fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<Upload>> + Send;

    /// Add an external image to the persisted gallery and return its record.
    fn import_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<HistoryRecord>> + Send;

    /// Delete a persisted gallery image. `Ok(false)` if it was already gone.
    fn delete_image(&self, id: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Persist the gallery display order.
    fn reorder(&self, order: &[String]) -> impl std::future::Future<Output = Result<()>> + Send;
}
