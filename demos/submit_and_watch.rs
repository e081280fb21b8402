//! Submit a small batch and follow it until it leaves the queue.
//!
//! Requires the queue backend at http://127.0.0.1:8849/api and an upstream
//! generator it can reach.
//!
//! ```sh
//! RUST_LOG=gallery_jobs=debug cargo run --example submit_and_watch
//! ```

use gallery_jobs::queue::format_elapsed;
use gallery_jobs::{EngineConfig, EngineEvent, GenerationRequest, HttpBackend, TaskEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gallery_jobs=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::default();
    let backend = HttpBackend::from_config(&config);
    if !backend.health().await? {
        eprintln!("Backend is not responding at {}", backend.endpoint());
        return Ok(());
    }

    let engine = TaskEngine::new(backend, config);
    let mut events = engine.subscribe();

    let task_id = engine
        .submit(
            GenerationRequest::new("http://127.0.0.1:30000", "a cat reading a newspaper")
                .ratio("3:4")
                .resolution(1440)
                .count(2),
        )
        .await?;
    println!("Submitted {}", task_id);

    let started = std::time::Instant::now();
    while let Ok(event) = events.recv().await {
        match event {
            EngineEvent::SubmissionFailed { error, .. } => {
                eprintln!("Submission failed: {}", error);
                break;
            }
            EngineEvent::ResultsArrived { count, .. } => {
                let latest = engine.gallery().snapshot();
                for record in latest.iter().take(count) {
                    println!("  + {} ({:.1}s)", record.url, record.duration_sec);
                }
            }
            EngineEvent::TaskCompleted { batch_total_sec, .. } => {
                let total = batch_total_sec.unwrap_or_else(|| started.elapsed().as_secs_f64());
                println!("Done in {}", format_elapsed(total.round() as u64));
                break;
            }
            EngineEvent::GenerationFailed { error, .. } => {
                eprintln!("Generation failed: {}", error);
                break;
            }
            EngineEvent::QueueChanged => {
                if let Some(task) = engine.registry().get(&task_id) {
                    let progress = engine
                        .progress(&task)
                        .map(|p| format!(" {:.0}%", p))
                        .unwrap_or_default();
                    println!("[{}]{}", task.status_label(), progress);
                }
            }
            _ => {}
        }
    }

    Ok(())
}
