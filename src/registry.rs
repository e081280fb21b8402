use std::sync::Mutex;

use crate::events::{EngineEvent, EventBus};
use crate::types::Task;

/// In-memory map of locally known tasks, in insertion order.
///
/// Every mutation publishes [`EngineEvent::QueueChanged`] on the bus, which
/// is the hook the queue presentation re-renders from. All operations take
/// the lock briefly and never across an `.await`.
pub struct TaskRegistry {
    tasks: Mutex<Vec<Task>>,
    events: EventBus,
}

impl TaskRegistry {
    /// Create an empty registry publishing on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Get a task by id (cloned).
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .ok()?
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    /// Insert a task, or replace the one with the same id in place.
    pub fn upsert(&self, task: Task) {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                if let Some(existing) = tasks.iter_mut().find(|t| t.id == task.id) {
                    *existing = task;
                } else {
                    tasks.push(task);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "task registry mutex poisoned");
                return;
            }
        }
        self.notify();
    }

    /// Apply `f` to the task if it is still present.
    ///
    /// Returns `None` when the task has been removed, which is how callers
    /// holding an older snapshot find out.
    pub fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let result = {
            let mut tasks = self.tasks.lock().ok()?;
            let task = tasks.iter_mut().find(|t| t.id == task_id)?;
            f(task)
        };
        self.notify();
        Some(result)
    }

    /// Remove a task. Returns the removed task, or `None` if it was not present.
    pub fn remove(&self, task_id: &str) -> Option<Task> {
        let removed = {
            let mut tasks = self.tasks.lock().ok()?;
            let idx = tasks.iter().position(|t| t.id == task_id)?;
            tasks.remove(idx)
        };
        self.notify();
        Some(removed)
    }

    /// Cloned snapshot of all tasks in registry order.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Find the task tracking a given server job.
    pub fn find_by_job(&self, job_id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .ok()?
            .iter()
            .find(|t| t.job_id.as_deref() == Some(job_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self) {
        self.events.publish(EngineEvent::QueueChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    fn make_task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            prompt: format!("prompt {}", id),
            count: 1,
            parallel: false,
            queued_ts: 1.0,
            started_ts: None,
            status: TaskStatus::Queued,
            completed: 0,
            job_id: None,
            queue_position: None,
            failed: false,
            error: None,
            params: None,
            ratio: "1:1".into(),
            width: Some(1280),
            height: Some(1280),
            ref_images: Vec::new(),
            recovered: false,
            results_seen: 0,
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let registry = TaskRegistry::new(EventBus::new());
        assert!(registry.is_empty());

        registry.upsert(make_task("a"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().prompt, "prompt a");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let registry = TaskRegistry::new(EventBus::new());
        registry.upsert(make_task("a"));
        registry.upsert(make_task("b"));

        let mut replacement = make_task("a");
        replacement.prompt = "changed".into();
        registry.upsert(replacement);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "a");
        assert_eq!(snapshot[0].prompt, "changed");
        assert_eq!(snapshot[1].id, "b");
    }

    #[test]
    fn test_update_missing_task() {
        let registry = TaskRegistry::new(EventBus::new());
        let touched = registry.update("ghost", |t| t.completed = 3);
        assert!(touched.is_none());
    }

    #[test]
    fn test_update_returns_closure_value() {
        let registry = TaskRegistry::new(EventBus::new());
        registry.upsert(make_task("a"));
        let completed = registry.update("a", |t| {
            t.completed = 2;
            t.completed
        });
        assert_eq!(completed, Some(2));
        assert_eq!(registry.get("a").unwrap().completed, 2);
    }

    #[test]
    fn test_remove() {
        let registry = TaskRegistry::new(EventBus::new());
        registry.upsert(make_task("a"));
        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_job() {
        let registry = TaskRegistry::new(EventBus::new());
        let mut task = make_task("a");
        task.job_id = Some("ab12cd34".into());
        registry.upsert(task);
        registry.upsert(make_task("b"));

        assert_eq!(registry.find_by_job("ab12cd34").unwrap().id, "a");
        assert!(registry.find_by_job("zz").is_none());
    }

    #[test]
    fn test_mutations_publish_queue_changed() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let registry = TaskRegistry::new(bus);

        registry.upsert(make_task("a"));
        registry.update("a", |t| t.completed = 1);
        registry.remove("a");

        for _ in 0..3 {
            assert_eq!(rx.try_recv().unwrap(), EngineEvent::QueueChanged);
        }
        assert!(rx.try_recv().is_err());
    }
}
