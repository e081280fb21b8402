use std::time::Duration;

/// Configuration for the task engine and its HTTP backend.
///
/// Use [`EngineConfig::builder()`] for ergonomic construction, or
/// [`EngineConfig::default()`] for the stock values (local backend on port
/// 8849, 2 s polling, 30 s submission timeout).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the queue backend, including the API prefix.
    pub endpoint: String,

    /// Interval between reconciliation cycles while tasks are tracked.
    pub poll_interval: Duration,

    /// Deadline for a single `POST /generate` call.
    pub submit_timeout: Duration,

    /// Deadline for list/cancel/priority calls.
    pub request_timeout: Duration,

    /// Deadline for the fire-and-forget completion acknowledgment.
    pub ack_timeout: Duration,

    /// Sampling steps sent when a request does not specify any.
    pub default_steps: u32,

    /// Seed sent when a request does not specify one.
    pub default_seed: i64,

    /// Upper bound on images per submission.
    pub max_count: u32,

    /// Edge length of the placeholder square used for `auto` ratios.
    pub placeholder_edge: u32,

    /// How many averaged durations feed the progress estimate.
    pub duration_window: usize,

    /// How long a deleted gallery image can be restored before the server
    /// delete is sent.
    pub undo_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8849/api".to_string(),
            poll_interval: Duration::from_secs(2),
            submit_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
            default_steps: 50,
            default_seed: 42,
            max_count: 4,
            placeholder_edge: 1024,
            duration_window: 20,
            undo_window: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the backend base URL. Trailing slashes are trimmed.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the interval between poll cycles.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the deadline for submission calls.
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.config.submit_timeout = timeout;
        self
    }

    /// Set the deadline for list/cancel/priority calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    pub fn with_default_steps(mut self, steps: u32) -> Self {
        self.config.default_steps = steps;
        self
    }

    pub fn with_default_seed(mut self, seed: i64) -> Self {
        self.config.default_seed = seed;
        self
    }

    /// Set the maximum images per submission (minimum 1).
    pub fn with_max_count(mut self, max: u32) -> Self {
        self.config.max_count = max.max(1);
        self
    }

    pub fn with_placeholder_edge(mut self, edge: u32) -> Self {
        self.config.placeholder_edge = edge;
        self
    }

    pub fn with_duration_window(mut self, window: usize) -> Self {
        self.config.duration_window = window;
        self
    }

    pub fn with_undo_window(mut self, window: Duration) -> Self {
        self.config.undo_window = window;
        self
    }

    /// Build the final [`EngineConfig`].
    pub fn build(self) -> EngineConfig {
        self.config
    }
}
