use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{Enqueued, GenerateParams, HistoryRecord, ServerJob, Upload};
use crate::JobsBackend;

fn normalize(endpoint: String) -> String {
    endpoint.trim_end_matches('/').to_string()
}

/// A body that arrived but is not the JSON we expect. This is a protocol
/// problem, not a connectivity one.
fn decode_body<T: DeserializeOwned>(text: &str, what: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        EngineError::InvalidResponse(format!("Failed to parse {} response: {}", what, e))
    })
}

/// Single-file form under the `file` field.
fn file_form(filename: &str, bytes: Vec<u8>) -> Form {
    Form::new().part("file", Part::bytes(bytes).file_name(filename.to_string()))
}

/// Image ids go back to the server as numbers when they look like numbers.
fn order_payload(order: &[String]) -> Value {
    let ids: Vec<Value> = order
        .iter()
        .map(|id| match id.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::from(id.as_str()),
        })
        .collect();
    serde_json::json!({ "order": ids })
}

/// `{success, error}` reply of the command endpoints.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    success: bool,
    error: Option<String>,
}

impl StatusResponse {
    fn into_result(self) -> Result<()> {
        if !self.success {
            return Err(EngineError::Rejected(self.error.unwrap_or_default()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    filename: Option<String>,
    url: Option<String>,
    size: Option<u64>,
    error: Option<String>,
}

impl UploadResponse {
    fn into_upload(self) -> Result<Upload> {
        if !self.success {
            return Err(EngineError::Rejected(self.error.unwrap_or_default()));
        }
        let filename = self
            .filename
            .ok_or_else(|| EngineError::InvalidResponse("Upload response missing filename".into()))?;
        Ok(Upload {
            url: self
                .url
                .unwrap_or_else(|| format!("/uploads/{}", filename)),
            filename,
            size: self.size.unwrap_or(0),
        })
    }
}

/// `{success, data, error}` wrapper used by the list endpoints.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self, what: &str) -> Result<T> {
        if !self.success {
            return Err(EngineError::Rejected(self.error.unwrap_or_default()));
        }
        self.data
            .ok_or_else(|| EngineError::InvalidResponse(format!("{} response missing data", what)))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    success: bool,
    job_id: Option<String>,
    queue_position: Option<u32>,
    error: Option<String>,
}

impl GenerateResponse {
    fn into_enqueued(self) -> Result<Enqueued> {
        if !self.success {
            return Err(EngineError::Rejected(self.error.unwrap_or_default()));
        }
        let job_id = self
            .job_id
            .ok_or_else(|| EngineError::InvalidResponse("Response missing job_id".into()))?;
        Ok(Enqueued {
            job_id,
            queue_position: self.queue_position,
        })
    }
}

/// One row of the backend's image table as served by `GET /history`.
#[derive(Debug, Deserialize)]
struct StoredImage {
    id: Value,
    filename: Option<String>,
    prompt: Option<String>,
    seed: Option<i64>,
    width: Option<u32>,
    height: Option<u32>,
    status: Option<String>,
    info: Option<String>,
    duration_sec: Option<f64>,
    batch_count: Option<u32>,
    batch_total_sec: Option<f64>,
    parallel: Option<Value>,
    /// JSON-encoded list of filenames.
    ref_images: Option<String>,
    created_at: Option<String>,
}

impl StoredImage {
    /// Only finished rows with a file make it into the gallery.
    fn into_record(self) -> Option<HistoryRecord> {
        if self.status.as_deref() != Some("completed") {
            return None;
        }
        self.record()
    }

    /// The row `POST /import` just created.
    fn into_imported(self) -> Option<HistoryRecord> {
        match self.status.as_deref() {
            Some("imported") | Some("completed") => self.record(),
            _ => None,
        }
    }

    fn record(self) -> Option<HistoryRecord> {
        let filename = self.filename.filter(|f| !f.is_empty())?;
        let id = match self.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let parallel = match self.parallel {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64() != Some(0),
            _ => true,
        };
        let ref_images = self
            .ref_images
            .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
            .unwrap_or_default();
        Some(HistoryRecord {
            id,
            url: format!("/output/{}", filename),
            filename,
            prompt: self.prompt.unwrap_or_default(),
            info: self.info,
            duration_sec: self.duration_sec.unwrap_or(0.0),
            seed: self.seed,
            width: self.width,
            height: self.height,
            ref_images,
            batch_count: self.batch_count.unwrap_or(1),
            batch_total_sec: self.batch_total_sec.filter(|t| *t > 0.0),
            parallel,
            created_at: self.created_at.unwrap_or_default(),
            // persisted rows are never back-filled locally
            batch_done: true,
        })
    }
}

/// HTTP implementation of [`JobsBackend`].
///
/// # Example
/// ```no_run
/// use gallery_jobs::{HttpBackend, JobsBackend};
///
/// # async fn example() -> gallery_jobs::Result<()> {
/// let backend = HttpBackend::new("http://127.0.0.1:8849/api");
/// let jobs = backend.jobs().await?;
/// println!("{} jobs in flight", jobs.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: Client,
    endpoint: String,
    submit_timeout: Duration,
    request_timeout: Duration,
    ack_timeout: Duration,
}

impl HttpBackend {
    /// Create a backend pointing at the given API base URL with default timeouts.
    pub fn new(endpoint: impl Into<String>) -> Self {
        let defaults = EngineConfig::default();
        Self {
            http: Client::new(),
            endpoint: normalize(endpoint.into()),
            submit_timeout: defaults.submit_timeout,
            request_timeout: defaults.request_timeout,
            ack_timeout: defaults.ack_timeout,
        }
    }

    /// Create a backend using the endpoint and timeouts of `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            http: Client::new(),
            endpoint: normalize(config.endpoint.clone()),
            submit_timeout: config.submit_timeout,
            request_timeout: config.request_timeout,
            ack_timeout: config.ack_timeout,
        }
    }

    /// Use a custom `reqwest::Client` (for connection pooling, proxies, TLS).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Returns the configured endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Check whether the backend answers its job list.
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/jobs", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        Ok(resp.status().is_success())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn network_error(&self, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            return EngineError::Timeout;
        }
        EngineError::Network {
            context: format!(
                "Cannot connect to backend at {} (is the service running?)",
                self.endpoint
            ),
            source: e,
        }
    }

    async fn ensure_success(resp: Response) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(EngineError::Http { status, body })
    }

    async fn read_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
        let text = resp.text().await.map_err(|e| EngineError::Network {
            context: format!("Failed to read {} response", what),
            source: e,
        })?;
        decode_body(&text, what)
    }

    async fn post_file(&self, path: &str, filename: &str, bytes: Vec<u8>) -> Result<Response> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self
            .http
            .post(&url)
            .timeout(self.submit_timeout)
            .multipart(file_form(filename, bytes))
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        Self::ensure_success(resp).await
    }

    /// Send a command; a 404 means the target is already gone.
    async fn command(&self, method: Method, path: &str) -> Result<bool> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self
            .http
            .request(method, &url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::ensure_success(resp).await?;
        Ok(true)
    }
}

impl JobsBackend for HttpBackend {
    async fn generate(&self, params: &GenerateParams) -> Result<Enqueued> {
        let url = format!("{}/generate", self.endpoint);
        let resp = self
            .http
            .post(&url)
            .timeout(self.submit_timeout)
            .json(params)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        let resp = Self::ensure_success(resp).await?;
        let body: GenerateResponse = Self::read_json(resp, "/generate").await?;
        body.into_enqueued()
    }

    async fn jobs(&self) -> Result<Vec<ServerJob>> {
        let url = format!("{}/jobs", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        let resp = Self::ensure_success(resp).await?;
        let body: Envelope<Vec<ServerJob>> = Self::read_json(resp, "/jobs").await?;
        body.into_data("/jobs")
    }

    async fn ack(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/job/{}/ack", self.endpoint, job_id);
        let resp = self
            .http
            .post(&url)
            .timeout(self.ack_timeout)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        Self::ensure_success(resp).await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        self.command(Method::DELETE, &format!("/job/{}", job_id))
            .await
    }

    async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.command(Method::POST, &format!("/job/{}/cancel", job_id))
            .await
    }

    async fn prioritize_job(&self, job_id: &str) -> Result<bool> {
        self.command(Method::POST, &format!("/job/{}/priority", job_id))
            .await
    }

    async fn history(&self) -> Result<Vec<HistoryRecord>> {
        let url = format!("{}/history", self.endpoint);
        let resp = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        let resp = Self::ensure_success(resp).await?;
        let body: Envelope<Vec<StoredImage>> = Self::read_json(resp, "/history").await?;
        Ok(body
            .into_data("/history")?
            .into_iter()
            .filter_map(StoredImage::into_record)
            .collect())
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<Upload> {
        let resp = self.post_file("/upload", filename, bytes).await?;
        let body: UploadResponse = Self::read_json(resp, "/upload").await?;
        body.into_upload()
    }

    async fn import_image(&self, filename: &str, bytes: Vec<u8>) -> Result<HistoryRecord> {
        let resp = self.post_file("/import", filename, bytes).await?;
        let body: Envelope<StoredImage> = Self::read_json(resp, "/import").await?;
        body.into_data("/import")?
            .into_imported()
            .ok_or_else(|| EngineError::InvalidResponse("Imported row has no image file".into()))
    }

    async fn delete_image(&self, id: &str) -> Result<bool> {
        self.command(Method::DELETE, &format!("/images/{}", id)).await
    }

    async fn reorder(&self, order: &[String]) -> Result<()> {
        let url = format!("{}/reorder", self.endpoint);
        let resp = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&order_payload(order))
            .send()
            .await
            .map_err(|e| self.network_error(e))?;
        let resp = Self::ensure_success(resp).await?;
        let body: StatusResponse = Self::read_json(resp, "/reorder").await?;
        body.into_result()
    }
}
