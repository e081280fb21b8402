//! Queue presentation: partitioning, ordering and display helpers.

use serde::Serialize;

use crate::types::Task;

/// Registry snapshot split the way the queue panel shows it.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    /// Submission failures, oldest first.
    pub failed: Vec<Task>,
    /// Started on the server, earliest start first.
    pub generating: Vec<Task>,
    /// Waiting, by `queued_ts` (prioritized tasks have `0.0` and lead).
    pub queued: Vec<Task>,
}

impl QueueView {
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut view = QueueView::default();
        for task in tasks {
            if task.failed {
                view.failed.push(task);
            } else if task.is_generating() {
                view.generating.push(task);
            } else {
                view.queued.push(task);
            }
        }
        view.failed.sort_by(|a, b| a.queued_ts.total_cmp(&b.queued_ts));
        view.generating.sort_by(|a, b| {
            a.started_ts
                .unwrap_or(0.0)
                .total_cmp(&b.started_ts.unwrap_or(0.0))
        });
        view.queued.sort_by(|a, b| a.queued_ts.total_cmp(&b.queued_ts));
        view
    }

    pub fn len(&self) -> usize {
        self.failed.len() + self.generating.len() + self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compact elapsed time: `45s`, `2m`, `2m5s`.
pub fn format_elapsed(secs: u64) -> String {
    if secs < 60 {
        return format!("{}s", secs);
    }
    let (m, s) = (secs / 60, secs % 60);
    if s > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}m", m)
    }
}

/// Estimated progress of a generating task, in percent.
///
/// The expected duration is `avg` per image, times the image count for
/// sequential batches. Capped at 95 until the server reports completion.
/// `None` when the task has not started or there is no average yet.
pub fn progress_percent(task: &Task, avg: Option<f64>, now: f64) -> Option<f64> {
    let started = task.started_ts?;
    let avg = avg.filter(|a| *a > 0.0)?;
    let expected = if task.parallel {
        avg
    } else {
        avg * task.count.max(1) as f64
    };
    let elapsed = (now - started).max(0.0);
    Some((elapsed / expected * 100.0).min(95.0))
}
