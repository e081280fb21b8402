use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::types::HistoryRecord;

/// Most-recent-first collection of generated images.
///
/// Records observed during polling are prepended immediately; a refresh from
/// the backend replaces the whole collection with the persisted view.
#[derive(Default)]
pub struct Gallery {
    records: Mutex<Vec<HistoryRecord>>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a record at the front.
    pub fn prepend(&self, record: HistoryRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(0, record);
        }
    }

    /// Stamp the batch wall time onto every not-yet-finalized record of
    /// `prompt` and finalize them. Returns the number of records touched.
    ///
    /// A `None` total still finalizes the records, so an identical prompt
    /// submitted again later gets its own batch total.
    pub fn backfill_batch(
        &self,
        prompt: &str,
        batch_total_sec: Option<f64>,
        batch_count: u32,
    ) -> usize {
        let Ok(mut records) = self.records.lock() else {
            return 0;
        };
        let mut touched = 0;
        for record in records
            .iter_mut()
            .filter(|r| !r.batch_done && r.prompt == prompt)
        {
            record.batch_total_sec = batch_total_sec;
            record.batch_count = batch_count;
            record.batch_done = true;
            touched += 1;
        }
        touched
    }

    /// Take a record out, returning it with the position it held.
    pub fn remove(&self, id: &str) -> Result<(usize, HistoryRecord)> {
        let mut records = self.records.lock().map_err(|e| anyhow!("{}", e))?;
        let idx = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| anyhow!("Image '{}' not found", id))?;
        Ok((idx, records.remove(idx)))
    }

    /// Put a removed record back at `index` (clamped to the current length).
    pub fn restore(&self, index: usize, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.lock().map_err(|e| anyhow!("{}", e))?;
        if records.iter().any(|r| r.id == record.id) {
            anyhow::bail!("Image '{}' is already in the gallery", record.id);
        }
        let index = index.min(records.len());
        records.insert(index, record);
        Ok(())
    }

    /// Reorder to follow `order` (record ids). Records not named keep their
    /// relative order after the named ones; unknown ids are ignored.
    pub fn reorder(&self, order: &[String]) -> Result<()> {
        let mut records = self.records.lock().map_err(|e| anyhow!("{}", e))?;
        let mut rest = std::mem::take(&mut *records);
        for id in order {
            if let Some(idx) = rest.iter().position(|r| &r.id == id) {
                records.push(rest.remove(idx));
            }
        }
        records.append(&mut rest);
        Ok(())
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<String> {
        self.records
            .lock()
            .map(|r| r.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Replace the collection with a freshly loaded persisted view.
    pub fn replace(&self, fresh: Vec<HistoryRecord>) {
        if let Ok(mut records) = self.records.lock() {
            *records = fresh;
        }
    }

    /// Cloned snapshot, most recent first.
    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mean per-image duration over the `window` most recent records with
    /// a positive duration. `None` without data.
    pub fn average_duration(&self, window: usize) -> Option<f64> {
        let records = self.records.lock().ok()?;
        let recent: Vec<f64> = records
            .iter()
            .filter(|r| r.duration_sec > 0.0)
            .take(window)
            .map(|r| r.duration_sec)
            .collect();
        if recent.is_empty() {
            return None;
        }
        Some(recent.iter().sum::<f64>() / recent.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prompt: &str, filename: &str, duration: f64) -> HistoryRecord {
        HistoryRecord {
            id: filename.to_string(),
            filename: filename.to_string(),
            url: format!("/output/{}", filename),
            prompt: prompt.to_string(),
            info: None,
            duration_sec: duration,
            seed: Some(42),
            width: Some(1280),
            height: Some(1280),
            ref_images: Vec::new(),
            batch_count: 1,
            batch_total_sec: None,
            parallel: false,
            created_at: "2025-01-01T00:00:00+00:00".into(),
            batch_done: false,
        }
    }

    #[test]
    fn test_prepend_is_most_recent_first() {
        let gallery = Gallery::new();
        gallery.prepend(record("cat", "1.png", 10.0));
        gallery.prepend(record("cat", "2.png", 10.0));
        let snapshot = gallery.snapshot();
        assert_eq!(snapshot[0].filename, "2.png");
        assert_eq!(snapshot[1].filename, "1.png");
    }

    #[test]
    fn test_backfill_only_unfinalized_matching_prompt() {
        let gallery = Gallery::new();
        gallery.prepend(record("cat", "old.png", 10.0));
        assert_eq!(gallery.backfill_batch("cat", Some(12.0), 1), 1);

        gallery.prepend(record("cat", "new1.png", 10.0));
        gallery.prepend(record("dog", "dog.png", 10.0));
        gallery.prepend(record("cat", "new2.png", 10.0));

        assert_eq!(gallery.backfill_batch("cat", Some(42.0), 2), 2);

        let snapshot = gallery.snapshot();
        let by_name = |name: &str| snapshot.iter().find(|r| r.filename == name).unwrap().clone();
        assert_eq!(by_name("old.png").batch_total_sec, Some(12.0));
        assert_eq!(by_name("new1.png").batch_total_sec, Some(42.0));
        assert_eq!(by_name("new2.png").batch_count, 2);
        assert_eq!(by_name("dog.png").batch_total_sec, None);
    }

    #[test]
    fn test_backfill_without_total_still_finalizes() {
        let gallery = Gallery::new();
        gallery.prepend(record("cat", "first.png", 10.0));
        assert_eq!(gallery.backfill_batch("cat", None, 1), 1);

        gallery.prepend(record("cat", "second.png", 10.0));
        assert_eq!(gallery.backfill_batch("cat", Some(30.0), 2), 1);

        let snapshot = gallery.snapshot();
        let first = snapshot.iter().find(|r| r.filename == "first.png").unwrap();
        assert!(first.batch_done);
        assert_eq!(first.batch_total_sec, None);
        assert_eq!(first.batch_count, 1);
    }

    #[test]
    fn test_remove_and_restore_position() {
        let gallery = Gallery::new();
        gallery.prepend(record("a", "1.png", 1.0));
        gallery.prepend(record("b", "2.png", 1.0));
        gallery.prepend(record("c", "3.png", 1.0));

        let (idx, removed) = gallery.remove("2.png").unwrap();
        assert_eq!(idx, 1);
        assert_eq!(gallery.ids(), vec!["3.png", "1.png"]);
        assert!(gallery.remove("2.png").is_err());

        gallery.restore(idx, removed.clone()).unwrap();
        assert_eq!(gallery.ids(), vec!["3.png", "2.png", "1.png"]);
        assert!(gallery.restore(0, removed).is_err());
    }

    #[test]
    fn test_restore_clamps_index() {
        let gallery = Gallery::new();
        gallery.restore(10, record("a", "1.png", 1.0)).unwrap();
        assert_eq!(gallery.len(), 1);
    }

    #[test]
    fn test_reorder() {
        let gallery = Gallery::new();
        gallery.prepend(record("a", "1.png", 1.0));
        gallery.prepend(record("b", "2.png", 1.0));
        gallery.prepend(record("c", "3.png", 1.0));

        gallery
            .reorder(&["1.png".to_string(), "ghost".to_string(), "3.png".to_string()])
            .unwrap();
        assert_eq!(gallery.ids(), vec!["1.png", "3.png", "2.png"]);
    }

    #[test]
    fn test_replace() {
        let gallery = Gallery::new();
        gallery.prepend(record("cat", "1.png", 10.0));
        gallery.replace(vec![record("a", "x.png", 1.0), record("b", "y.png", 1.0)]);
        assert_eq!(gallery.len(), 2);
        assert_eq!(gallery.snapshot()[0].filename, "x.png");
    }

    #[test]
    fn test_average_duration() {
        let gallery = Gallery::new();
        assert!(gallery.average_duration(20).is_none());

        gallery.prepend(record("a", "1.png", 0.0));
        assert!(gallery.average_duration(20).is_none());

        gallery.prepend(record("a", "2.png", 10.0));
        gallery.prepend(record("a", "3.png", 20.0));
        assert_eq!(gallery.average_duration(20), Some(15.0));
        // window keeps only the most recent positive durations
        assert_eq!(gallery.average_duration(1), Some(20.0));
    }
}
