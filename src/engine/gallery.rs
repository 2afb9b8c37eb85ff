// Presentation-side consumer: one background download per image reference the session publishes.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::downloader::{Downloader, FetchTask, LoadState};
use crate::model::ImageReference;

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryItem {
    pub reference: ImageReference,
    pub load: LoadState,
}

/// Newest-first list of every image the session has surfaced.
///
/// Each item downloads independently, so a slow image never holds up the
/// ones published after it.
pub struct Gallery {
    tasks: Arc<Mutex<Vec<FetchTask>>>,
    count_rx: watch::Receiver<usize>,
    handle: JoinHandle<()>,
}

impl Gallery {
    /// Add a row for every reference received on `images` until the stream ends.
    pub fn follow(
        mut images: mpsc::UnboundedReceiver<ImageReference>,
        downloader: Arc<Downloader>,
    ) -> Self {
        let tasks: Arc<Mutex<Vec<FetchTask>>> = Arc::new(Mutex::new(Vec::new()));
        let (count_tx, count_rx) = watch::channel(0usize);

        let follow_tasks = Arc::clone(&tasks);
        let handle = tokio::spawn(async move {
            while let Some(reference) = images.recv().await {
                debug!("gallery loading {}", reference.key());
                let mut tasks = follow_tasks.lock();
                tasks.insert(0, downloader.spawn_fetch(reference));
                count_tx.send_replace(tasks.len());
            }
        });

        Self {
            tasks,
            count_rx,
            handle,
        }
    }

    /// Snapshot of every item, newest first.
    pub fn items(&self) -> Vec<GalleryItem> {
        self.tasks
            .lock()
            .iter()
            .map(|task| GalleryItem {
                reference: task.reference().clone(),
                load: task.state(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load progress of the item at `index` (0 is newest).
    pub fn subscribe_item(&self, index: usize) -> Option<watch::Receiver<LoadState>> {
        self.tasks.lock().get(index).map(FetchTask::subscribe)
    }

    /// Wait until at least `count` items have been added.
    pub async fn wait_for_items(&self, count: usize) {
        let mut rx = self.count_rx.clone();
        let _ = rx.wait_for(|len| *len >= count).await;
    }
}

impl Drop for Gallery {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
