use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gallery_jobs::*;
use tokio::sync::{broadcast, Notify};

/// How `ack` behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(dead_code)]
pub enum AckMode {
    #[default]
    Ok,
    Fail,
    Hang,
}

/// Scripted in-memory backend.
///
/// `generate` answers from a queue of scripted results, falling back to
/// sequential job ids `job1`, `job2`, ... Job ids in `missing` answer 404 to
/// every job command.
#[derive(Default)]
pub struct FakeBackend {
    jobs: Mutex<Vec<ServerJob>>,
    jobs_fail: Mutex<bool>,
    history: Mutex<Vec<HistoryRecord>>,
    generate_results: Mutex<VecDeque<Result<Enqueued>>>,
    generate_delays: Mutex<VecDeque<Duration>>,
    gate: Mutex<Option<Arc<Notify>>>,
    missing: Mutex<HashSet<String>>,
    pub sent: Mutex<Vec<GenerateParams>>,
    pub acked: Mutex<Vec<String>>,
    next_job: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub jobs_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
    pub priority_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    ack_mode: Mutex<AckMode>,
    commands_fail: Mutex<bool>,
    image_deletes_fail: Mutex<bool>,
    next_image: AtomicUsize,
    pub ack_calls: AtomicUsize,
    pub uploads: Mutex<Vec<(String, usize)>>,
    pub deleted_images: Mutex<Vec<String>>,
    pub orders: Mutex<Vec<Vec<String>>>,
}

#[allow(dead_code)]
impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_jobs(&self, jobs: Vec<ServerJob>) {
        *self.jobs.lock().unwrap() = jobs;
    }

    pub fn fail_jobs(&self, fail: bool) {
        *self.jobs_fail.lock().unwrap() = fail;
    }

    pub fn set_history(&self, records: Vec<HistoryRecord>) {
        *self.history.lock().unwrap() = records;
    }

    pub fn push_generate(&self, result: Result<Enqueued>) {
        self.generate_results.lock().unwrap().push_back(result);
    }

    /// Delay the next `generate` call by `delay`.
    pub fn delay_next_generate(&self, delay: Duration) {
        self.generate_delays.lock().unwrap().push_back(delay);
    }

    /// Block every `generate` call until the returned handle is notified.
    pub fn gate_generate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn mark_missing(&self, job_id: &str) {
        self.missing.lock().unwrap().insert(job_id.to_string());
    }

    pub fn set_ack_mode(&self, mode: AckMode) {
        *self.ack_mode.lock().unwrap() = mode;
    }

    /// Make delete/cancel/priority answer HTTP 500.
    pub fn fail_commands(&self, fail: bool) {
        *self.commands_fail.lock().unwrap() = fail;
    }

    pub fn fail_image_deletes(&self, fail: bool) {
        *self.image_deletes_fail.lock().unwrap() = fail;
    }

    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn exists(&self, job_id: &str) -> bool {
        !self.missing.lock().unwrap().contains(job_id)
    }

    fn command(&self, job_id: &str) -> Result<bool> {
        if *self.commands_fail.lock().unwrap() {
            return Err(server_error());
        }
        Ok(self.exists(job_id))
    }
}

impl JobsBackend for FakeBackend {
    async fn generate(&self, params: &GenerateParams) -> Result<Enqueued> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(params.clone());

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = self.generate_delays.lock().unwrap().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.generate_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Enqueued {
                job_id: format!("job{}", n),
                queue_position: Some(n as u32),
            })
        })
    }

    async fn jobs(&self) -> Result<Vec<ServerJob>> {
        self.jobs_calls.fetch_add(1, Ordering::SeqCst);
        if *self.jobs_fail.lock().unwrap() {
            return Err(EngineError::Http {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn ack(&self, job_id: &str) -> Result<()> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        self.acked.lock().unwrap().push(job_id.to_string());
        let mode = *self.ack_mode.lock().unwrap();
        match mode {
            AckMode::Ok => Ok(()),
            AckMode::Fail => Err(server_error()),
            AckMode::Hang => std::future::pending().await,
        }
    }

    async fn delete_job(&self, job_id: &str) -> Result<bool> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.command(job_id)
    }

    async fn cancel_job(&self, job_id: &str) -> Result<bool> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.command(job_id)
    }

    async fn prioritize_job(&self, job_id: &str) -> Result<bool> {
        self.priority_calls.fetch_add(1, Ordering::SeqCst);
        self.command(job_id)
    }

    async fn history(&self) -> Result<Vec<HistoryRecord>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.history.lock().unwrap().clone())
    }

    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<Upload> {
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), bytes.len()));
        let name = format!("ref{}.png", self.uploads.lock().unwrap().len());
        Ok(Upload {
            url: format!("/uploads/{}", name),
            filename: name,
            size: bytes.len() as u64,
        })
    }

    async fn import_image(&self, filename: &str, _bytes: Vec<u8>) -> Result<HistoryRecord> {
        let n = self.next_image.fetch_add(1, Ordering::SeqCst) + 100;
        let mut record = record(&n.to_string(), "(imported)");
        record.filename = format!("import_{}", filename);
        record.url = format!("/output/import_{}", filename);
        Ok(record)
    }

    async fn delete_image(&self, id: &str) -> Result<bool> {
        if *self.image_deletes_fail.lock().unwrap() {
            return Err(server_error());
        }
        self.deleted_images.lock().unwrap().push(id.to_string());
        Ok(true)
    }

    async fn reorder(&self, order: &[String]) -> Result<()> {
        self.orders.lock().unwrap().push(order.to_vec());
        Ok(())
    }
}

fn server_error() -> EngineError {
    EngineError::Http {
        status: 500,
        body: "internal error".into(),
    }
}

#[allow(dead_code)]
pub fn engine() -> TaskEngine<FakeBackend> {
    TaskEngine::new(FakeBackend::new(), EngineConfig::default())
}

#[allow(dead_code)]
pub fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest::new("http://gpu-box:30000", prompt)
}

#[allow(dead_code)]
pub fn job(job_id: &str, status: ServerJobStatus) -> ServerJob {
    let mut job = ServerJob::new(job_id);
    job.status = status;
    job
}

#[allow(dead_code)]
pub fn result(filename: &str, duration: f64) -> JobResult {
    JobResult {
        filename: filename.to_string(),
        url: format!("/output/{}", filename),
        info: None,
        duration: Some(duration),
        seed: Some(42),
    }
}

/// A persisted gallery row.
#[allow(dead_code)]
pub fn record(id: &str, prompt: &str) -> HistoryRecord {
    HistoryRecord {
        id: id.to_string(),
        filename: format!("{}.png", id),
        url: format!("/output/{}.png", id),
        prompt: prompt.to_string(),
        info: None,
        duration_sec: 10.0,
        seed: Some(42),
        width: Some(1024),
        height: Some(1024),
        ref_images: Vec::new(),
        batch_count: 1,
        batch_total_sec: None,
        parallel: true,
        created_at: "2025-01-01 12:00:00".into(),
        batch_done: true,
    }
}

/// Let spawned background work (acks, delete timers) run.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Everything published so far.
#[allow(dead_code)]
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
