use serde::{Deserialize, Serialize};

use crate::error::SubmitFailure;

/// Client-generated task identifier.
pub type TaskId = String;

/// Current unix time in fractional seconds, the unit the backend reports.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Lifecycle of a task as last reported by the server.
///
/// Submission-level failures are tracked separately on [`Task::failed`];
/// `Failed` here means the server accepted the job and then reported an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum TaskStatus {
    Queued,
    Generating { completed: u32 },
    Completed,
    Failed { error: String },
}

/// A locally tracked generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub prompt: String,
    pub count: u32,
    pub parallel: bool,
    /// Unix seconds when the task was accepted locally. `0.0` after prioritizing.
    pub queued_ts: f64,
    /// Unix seconds when the server started generating.
    pub started_ts: Option<f64>,
    pub status: TaskStatus,
    pub completed: u32,
    pub job_id: Option<String>,
    pub queue_position: Option<u32>,
    /// Set when the submission call itself failed.
    pub failed: bool,
    pub error: Option<SubmitFailure>,
    /// The payload last sent, kept for retry.
    pub params: Option<GenerateParams>,
    pub ratio: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ref_images: Vec<String>,
    pub recovered: bool,
    /// Number of server results already copied into the gallery.
    pub results_seen: usize,
}

impl Task {
    /// Display label for queue rendering.
    pub fn status_label(&self) -> String {
        if self.failed {
            return "connection failed".to_string();
        }
        if self.job_id.is_none() {
            return "submitting".to_string();
        }
        match &self.status {
            TaskStatus::Queued => "queued".to_string(),
            TaskStatus::Generating { completed } if *completed > 0 => {
                format!("completed {}/{}", completed, self.count)
            }
            TaskStatus::Generating { .. } => "generating".to_string(),
            TaskStatus::Completed => "done".to_string(),
            TaskStatus::Failed { .. } => "failed".to_string(),
        }
    }

    /// `auto`, or the ratio followed by the resolved size, e.g. `3:4 1080×1440`.
    pub fn size_label(&self) -> String {
        match (self.ratio.as_str(), self.width, self.height) {
            ("auto", _, _) | ("", _, _) => "auto".to_string(),
            (ratio, Some(w), Some(h)) => format!("{} {}×{}", ratio, w, h),
            (ratio, _, _) => ratio.to_string(),
        }
    }

    /// Whether the server has started generating this task.
    pub fn is_generating(&self) -> bool {
        self.started_ts.is_some()
    }
}

/// A user's generation request before it becomes a task.
///
/// # Example
/// ```
/// use gallery_jobs::GenerationRequest;
///
/// let req = GenerationRequest::new("http://gpu-box:30000", "a cat in space")
///     .ratio("16:9")
///     .resolution(1280)
///     .count(3)
///     .parallel(false);
/// assert_eq!(req.count, 3);
/// ```
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Upstream generator URL the backend forwards to.
    pub api_url: String,
    pub prompt: String,
    pub seed: Option<i64>,
    pub ratio: String,
    /// Long-edge pixel length.
    pub resolution: u32,
    pub steps: Option<u32>,
    pub count: u32,
    pub parallel: bool,
    /// Filenames of previously uploaded reference images.
    pub ref_images: Vec<String>,
}

impl GenerationRequest {
    /// Create a request with defaults: 1:1 at 1280, one image, sequential.
    pub fn new(api_url: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            prompt: prompt.into(),
            seed: None,
            ratio: "1:1".to_string(),
            resolution: 1280,
            steps: None,
            count: 1,
            parallel: false,
            ref_images: Vec::new(),
        }
    }

    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the aspect ratio, `auto` or `W:H`.
    pub fn ratio(mut self, ratio: impl Into<String>) -> Self {
        self.ratio = ratio.into();
        self
    }

    pub fn resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn ref_image(mut self, filename: impl Into<String>) -> Self {
        self.ref_images.push(filename.into());
        self
    }
}

/// Body of `POST /generate`.
///
/// The backend reads `width`/`height` transposed, so they carry the real
/// output height/width respectively; `actual_width`/`actual_height` are the
/// real values and are echoed back on recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateParams {
    pub api_url: String,
    pub prompt: String,
    pub seed: i64,
    pub image_size: String,
    pub width: u32,
    pub height: u32,
    pub ratio: String,
    pub actual_width: u32,
    pub actual_height: u32,
    pub steps: u32,
    pub count: u32,
    pub parallel: bool,
    pub ref_images: Vec<String>,
}

/// Successful response from `POST /generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enqueued {
    pub job_id: String,
    pub queue_position: Option<u32>,
}

/// A reference image stored by `POST /upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    /// Server-side name; pass it in [`GenerationRequest::ref_images`].
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

/// Server-side job status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerJobStatus {
    #[default]
    Pending,
    Generating,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

/// One image produced by a server job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub filename: String,
    #[serde(default)]
    pub url: String,
    pub info: Option<String>,
    pub duration: Option<f64>,
    pub seed: Option<i64>,
}

/// A job as reported by `GET /jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerJob {
    pub job_id: String,
    #[serde(default)]
    pub status: ServerJobStatus,
    #[serde(default)]
    pub completed: u32,
    /// Append-only; index `i` is the `i`-th finished image.
    #[serde(default)]
    pub results: Vec<JobResult>,
    pub batch_total: Option<f64>,
    pub queued_ts: Option<f64>,
    pub started_ts: Option<f64>,
    pub error: Option<String>,
    pub prompt: Option<String>,
    pub count: Option<u32>,
    pub parallel: Option<bool>,
    pub ratio: Option<String>,
    pub actual_width: Option<u32>,
    pub actual_height: Option<u32>,
    pub ref_images: Option<Vec<String>>,
}

impl ServerJob {
    /// A bare pending job, handy for building fixtures.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: ServerJobStatus::Pending,
            completed: 0,
            results: Vec::new(),
            batch_total: None,
            queued_ts: None,
            started_ts: None,
            error: None,
            prompt: None,
            count: None,
            parallel: None,
            ratio: None,
            actual_width: None,
            actual_height: None,
            ref_images: None,
        }
    }
}

/// A gallery entry for one generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub prompt: String,
    pub info: Option<String>,
    pub duration_sec: f64,
    pub seed: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub ref_images: Vec<String>,
    pub batch_count: u32,
    /// Wall time of the whole batch, filled once the batch finishes.
    pub batch_total_sec: Option<f64>,
    pub parallel: bool,
    /// RFC 3339 creation time.
    pub created_at: String,
    /// Set once `batch_total_sec` has been back-filled locally.
    #[serde(skip)]
    pub batch_done: bool,
}

impl HistoryRecord {
    /// Build the record for a freshly observed server result.
    pub fn from_result(task: &Task, result: &JobResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: result.filename.clone(),
            url: result.url.clone(),
            prompt: task.prompt.clone(),
            info: result.info.clone(),
            duration_sec: result.duration.unwrap_or(0.0),
            seed: result.seed,
            width: task.width,
            height: task.height,
            ref_images: task.ref_images.clone(),
            batch_count: task.count,
            batch_total_sec: None,
            parallel: task.parallel,
            created_at: chrono::Utc::now().to_rfc3339(),
            batch_done: false,
        }
    }
}
