//! Command surface for a host: upload a file, start or cancel a download,
//! and observe progress.

use crate::config::TransferConfig;
use crate::controller::{DownloadResult, TransferController};
use crate::downloader::Downloader;
use crate::error::TransferError;
use crate::models::{TransferProgress, TransferTarget, UploadRequest};
use crate::uploader::Uploader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Maps a resource name to where it is stored locally.
pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, resource_name: &str) -> PathBuf;
}

impl<F> DestinationResolver for F
where
    F: Fn(&str) -> PathBuf + Send + Sync,
{
    fn resolve(&self, resource_name: &str) -> PathBuf {
        self(resource_name)
    }
}

/// Stores every download directly under one directory.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DestinationResolver for DirectoryResolver {
    fn resolve(&self, resource_name: &str) -> PathBuf {
        self.dir.join(resource_name)
    }
}

pub struct TransferService {
    base_url: String,
    uploader: Uploader,
    upload_progress: watch::Sender<TransferProgress>,
    controller: TransferController,
    resolver: Arc<dyn DestinationResolver>,
}

impl TransferService {
    pub fn new(config: &TransferConfig) -> Result<Self, TransferError> {
        let resolver = Arc::new(DirectoryResolver::new(config.download_dir.clone()));
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(
        config: &TransferConfig,
        resolver: Arc<dyn DestinationResolver>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let client = config.build_client()?;
        let (upload_progress, _) = watch::channel(TransferProgress::default());

        Ok(Self {
            base_url: config.base_url.clone(),
            uploader: Uploader::new(client.clone(), config.upload_description.clone()),
            upload_progress,
            controller: TransferController::new(Downloader::new(client, config.read_buffer_size)),
            resolver,
        })
    }

    /// Reads `path` in full and POSTs it to the base URL, returning the server's reply.
    pub async fn upload(&self, path: impl AsRef<Path>) -> Result<String, TransferError> {
        let request = UploadRequest::from_path(self.base_url.clone(), path)?;
        self.uploader.upload(request, &self.upload_progress).await
    }

    /// Starts (or restarts) the download of `resource_name`, resuming from the local file.
    pub async fn start_download(&mut self, resource_name: &str) -> Option<DownloadResult> {
        let target = TransferTarget::new(self.base_url.clone(), resource_name);
        let dest = self.resolver.resolve(resource_name);
        self.controller.start_download(target, dest).await
    }

    pub async fn cancel_download(&mut self) -> Option<DownloadResult> {
        self.controller.cancel().await
    }

    pub async fn wait_download(&mut self) -> Option<DownloadResult> {
        self.controller.wait().await
    }

    pub fn is_downloading(&self) -> bool {
        self.controller.is_active()
    }

    pub fn destination(&self, resource_name: &str) -> PathBuf {
        self.resolver.resolve(resource_name)
    }

    pub fn download_progress(&self) -> watch::Receiver<TransferProgress> {
        self.controller.subscribe()
    }

    pub fn upload_progress(&self) -> watch::Receiver<TransferProgress> {
        self.upload_progress.subscribe()
    }
}
