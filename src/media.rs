//! Gallery upkeep against the backend: reference uploads, imports, display
//! order, and deletes that can be undone for a short window.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::TaskEngine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::types::{HistoryRecord, Upload};
use crate::JobsBackend;

struct PendingDelete {
    index: usize,
    record: HistoryRecord,
    handle: JoinHandle<()>,
}

/// Images removed locally whose server delete has not been sent yet.
#[derive(Default)]
pub struct PendingDeletes {
    entries: Mutex<HashMap<String, PendingDelete>>,
}

impl PendingDeletes {
    fn take(&self, id: &str) -> Option<PendingDelete> {
        self.entries.lock().ok()?.remove(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl<B: JobsBackend> TaskEngine<B> {
    /// Store a reference image; use the returned filename in
    /// [`GenerationRequest::ref_images`](crate::GenerationRequest::ref_images).
    pub async fn upload_reference(&self, filename: &str, bytes: Vec<u8>) -> Result<Upload> {
        if bytes.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "'{}' is empty",
                filename
            )));
        }
        let upload = self.inner.backend.upload(filename, bytes).await?;
        info!(filename = %upload.filename, size = upload.size, "Reference image uploaded");
        Ok(upload)
    }

    /// Import an external image into the gallery. The new record goes to
    /// the front.
    pub async fn import_image(&self, filename: &str, bytes: Vec<u8>) -> Result<HistoryRecord> {
        if bytes.is_empty() {
            return Err(EngineError::InvalidRequest(format!(
                "'{}' is empty",
                filename
            )));
        }
        let record = self.inner.backend.import_image(filename, bytes).await?;
        self.inner.gallery.prepend(record.clone());
        info!(id = %record.id, filename = %record.filename, "Image imported");
        self.inner.events.publish(EngineEvent::ImageImported {
            id: record.id.clone(),
        });
        Ok(record)
    }

    /// Rearrange the gallery to `order` and persist the resulting order.
    pub async fn reorder_gallery(&self, order: &[String]) -> Result<()> {
        self.inner.gallery.reorder(order)?;
        self.inner.events.publish(EngineEvent::GalleryReordered);
        self.save_order().await
    }

    /// Persist the current gallery order. An empty gallery sends nothing.
    pub async fn save_order(&self) -> Result<()> {
        let order = self.inner.gallery.ids();
        if order.is_empty() {
            return Ok(());
        }
        self.inner.backend.reorder(&order).await?;
        debug!(count = order.len(), "Gallery order saved");
        Ok(())
    }

    /// Remove an image from the gallery now and delete it server-side once
    /// the undo window passes, unless [`undo_delete`](Self::undo_delete)
    /// gets there first.
    pub fn delete_image(&self, id: &str) -> Result<()> {
        let (index, record) = self.inner.gallery.remove(id)?;
        let mut entries = self
            .inner
            .pending_deletes
            .entries
            .lock()
            .map_err(|e| EngineError::Other(e.to_string()))?;

        // the entry is in place before the timer task can look for it
        let engine = self.clone();
        let image_id = id.to_string();
        let window = self.inner.config.undo_window;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            engine.commit_delete(&image_id).await;
        });
        entries.insert(
            id.to_string(),
            PendingDelete {
                index,
                record,
                handle,
            },
        );
        drop(entries);

        debug!(id = %id, "Image removed, delete pending");
        self.inner
            .events
            .publish(EngineEvent::ImageRemoved { id: id.to_string() });
        Ok(())
    }

    /// Put a pending-delete image back where it was.
    pub fn undo_delete(&self, id: &str) -> Result<()> {
        let pending = self.inner.pending_deletes.take(id).ok_or_else(|| {
            EngineError::InvalidState(format!("Image '{}' has no pending delete", id))
        })?;
        pending.handle.abort();
        self.inner.gallery.restore(pending.index, pending.record)?;
        debug!(id = %id, "Delete undone");
        self.inner
            .events
            .publish(EngineEvent::ImageRestored { id: id.to_string() });
        Ok(())
    }

    /// Ids whose server delete is still waiting out the undo window.
    pub fn pending_deletes(&self) -> Vec<String> {
        self.inner.pending_deletes.ids()
    }

    async fn commit_delete(&self, id: &str) {
        let Some(pending) = self.inner.pending_deletes.take(id) else {
            return;
        };
        match self.inner.backend.delete_image(id).await {
            Ok(existed) => {
                info!(id = %id, existed, "Image deleted");
                self.inner
                    .events
                    .publish(EngineEvent::ImageDeleted { id: id.to_string() });
            }
            Err(e) => {
                // still on the server, so it belongs in the gallery
                warn!(id = %id, error = %e, "Image delete failed, restoring");
                if let Err(e) = self.inner.gallery.restore(pending.index, pending.record) {
                    warn!(id = %id, error = %e, "Failed to restore image");
                    return;
                }
                self.inner
                    .events
                    .publish(EngineEvent::ImageRestored { id: id.to_string() });
            }
        }
    }
}
