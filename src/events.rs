//! Engine notifications, published on an in-process broadcast channel.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SubmitFailure;

const CHANNEL_CAPACITY: usize = 256;

/// Everything the engine tells its consumers about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// The task registry changed; re-render the queue.
    QueueChanged,

    /// The backend accepted a submission.
    #[serde(rename_all = "camelCase")]
    Submitted {
        task_id: String,
        job_id: String,
        queue_position: Option<u32>,
    },

    /// The submission call itself failed. The task stays for retry/discard.
    #[serde(rename_all = "camelCase")]
    SubmissionFailed {
        task_id: String,
        error: SubmitFailure,
    },

    /// New images were prepended to the gallery.
    #[serde(rename_all = "camelCase")]
    ResultsArrived { task_id: String, count: usize },

    /// A task finished and left the registry. `batch_total_sec` is `None`
    /// when completion was inferred from the job vanishing server-side.
    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        task_id: String,
        prompt: String,
        batch_total_sec: Option<f64>,
    },

    /// The server reported an error for an accepted job.
    #[serde(rename_all = "camelCase")]
    GenerationFailed { task_id: String, error: String },

    #[serde(rename_all = "camelCase")]
    TaskCancelled { task_id: String },

    #[serde(rename_all = "camelCase")]
    TaskPrioritized { task_id: String },

    TasksRecovered { count: usize },

    HistoryRefreshed { count: usize },

    ImageImported { id: String },

    GalleryReordered,

    /// Gone from the gallery; the server delete waits out the undo window.
    ImageRemoved { id: String },

    /// A removed image is back, by undo or because the server delete failed.
    ImageRestored { id: String },

    /// The server delete went through.
    ImageDeleted { id: String },
}

/// Shared publish/subscribe hub for [`EngineEvent`]s.
///
/// Cloning shares the same channel. Publishing with no subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}
