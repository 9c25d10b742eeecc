//! Owns the single in-flight download and its cancellation.

use crate::downloader::Downloader;
use crate::error::TransferError;
use crate::models::{DownloadOutcome, TransferProgress, TransferTarget};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type DownloadResult = Result<DownloadOutcome, TransferError>;

struct ActiveDownload {
    target: TransferTarget,
    cancel: CancellationToken,
    handle: JoinHandle<DownloadResult>,
}

/// Runs at most one download at a time.
///
/// Starting a new download cancels the current one first. Cancellation is
/// cooperative: the task stops at its next suspension point, drops its session,
/// and only then does `cancel` return, so no handle from the old attempt stays open.
pub struct TransferController {
    downloader: Arc<Downloader>,
    progress: Arc<watch::Sender<TransferProgress>>,
    active: Option<ActiveDownload>,
}

impl TransferController {
    pub fn new(downloader: Downloader) -> Self {
        let (progress, _) = watch::channel(TransferProgress::default());
        Self {
            downloader: Arc::new(downloader),
            progress: Arc::new(progress),
            active: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> TransferProgress {
        *self.progress.borrow()
    }

    /// True while a download task is scheduled and has not yet finished.
    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    pub fn active_target(&self) -> Option<&TransferTarget> {
        self.active.as_ref().map(|active| &active.target)
    }

    /// Cancels any running download, then spawns a new one for `target` into `dest`.
    ///
    /// Returns how the superseded attempt ended, if there was one.
    pub async fn start_download(
        &mut self,
        target: TransferTarget,
        dest: PathBuf,
    ) -> Option<DownloadResult> {
        let previous = self.cancel().await;

        let cancel = CancellationToken::new();
        let downloader = Arc::clone(&self.downloader);
        let progress = Arc::clone(&self.progress);
        let task_target = target.clone();
        let task_cancel = cancel.clone();

        info!(resource = %target.resource_name, dest = %dest.display(), "download scheduled");
        let handle = tokio::spawn(async move {
            downloader
                .download(&task_target, &dest, &progress, &task_cancel)
                .await
        });

        self.active = Some(ActiveDownload {
            target,
            cancel,
            handle,
        });
        previous
    }

    /// Signals cancellation and waits for the task to release its session.
    ///
    /// No-op returning `None` when nothing was started.
    pub async fn cancel(&mut self) -> Option<DownloadResult> {
        let active = self.active.take()?;
        debug!(resource = %active.target.resource_name, "cancelling download");
        active.cancel.cancel();
        Some(join(active.handle).await)
    }

    /// Waits for the current download to end on its own.
    pub async fn wait(&mut self) -> Option<DownloadResult> {
        let active = self.active.take()?;
        Some(join(active.handle).await)
    }
}

impl Drop for TransferController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

async fn join(handle: JoinHandle<DownloadResult>) -> DownloadResult {
    handle
        .await
        .map_err(|e| TransferError::Task(e.to_string()))?
}
