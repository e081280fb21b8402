//! Re-attach to whatever the backend is still working on and print the
//! queue as it drains.
//!
//! ```sh
//! cargo run --example recover_jobs
//! ```

use std::time::Duration;

use gallery_jobs::queue::format_elapsed;
use gallery_jobs::types::now_ts;
use gallery_jobs::{EngineConfig, HttpBackend, TaskEngine};
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

    let endpoint =
        std::env::var("GALLERY_ENDPOINT").unwrap_or_else(|_| "http://127.0.0.1:8849/api".into());
    let config = EngineConfig::builder().with_endpoint(endpoint).build();
    let engine = TaskEngine::new(HttpBackend::from_config(&config), config);

    let loaded = engine.refresh_history().await?;
    println!("Gallery has {} image(s)", loaded);

    let recovered = engine.recover().await?;
    if recovered == 0 {
        println!("Nothing in flight");
        return Ok(());
    }
    println!("Recovered {} job(s)", recovered);

    while engine.is_polling() {
        let view = engine.queue_view();
        let now = now_ts();
        for task in &view.generating {
            let elapsed = task.started_ts.map(|s| (now - s).max(0.0) as u64).unwrap_or(0);
            println!(
                "  generating  {}  {}  {}",
                task.prompt,
                task.status_label(),
                format_elapsed(elapsed)
            );
        }
        for task in &view.queued {
            println!("  queued      {}  {}", task.prompt, task.size_label());
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    println!("Queue drained, gallery has {} image(s)", engine.gallery().len());
    Ok(())
}
