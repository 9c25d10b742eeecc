//! One-shot multipart upload with polled progress.

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::file_reader::read_local_file;
use crate::models::{TransferPhase, TransferProgress, TransferTarget, UploadRequest};
use bytes::Bytes;
use futures::stream::{self, Stream};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub const DESC_FIELD: &str = "desc";
pub const FILE_FIELD: &str = "file_data";
pub const FILE_CONTENT_TYPE: &str = "application/x-gzip";

const BODY_CHUNK_SIZE: usize = 16 * 1024;
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl UploadRequest {
    /// Reads `path` in full and names the upload after its file name.
    pub fn from_path(url: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let resource_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::file(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
        let payload = read_local_file(path)?;
        Ok(Self::new(TransferTarget::new(url, resource_name), payload))
    }
}

pub struct Uploader {
    client: Client,
    description: String,
}

impl Uploader {
    pub fn new(client: Client, description: impl Into<String>) -> Self {
        Self {
            client,
            description: description.into(),
        }
    }

    pub fn from_config(config: &TransferConfig) -> Result<Self, TransferError> {
        Ok(Self::new(config.build_client()?, config.upload_description.clone()))
    }

    /// POSTs the payload to `request.target.url` and returns the server's reply text.
    ///
    /// Progress is sampled every poll tick while the request is in flight. Every
    /// call sends the full payload; there is no resume for uploads.
    pub async fn upload(
        &self,
        request: UploadRequest,
        progress: &watch::Sender<TransferProgress>,
    ) -> Result<String, TransferError> {
        let total = request.len();
        let sent = Arc::new(AtomicU64::new(0));

        info!(
            url = %request.target.url,
            resource = %request.target.resource_name,
            bytes = total,
            "starting upload"
        );
        progress.send_replace(TransferProgress::new(TransferPhase::Uploading, 0, total));

        match self.send_and_poll(&request, Arc::clone(&sent), progress).await {
            Ok(reply) => {
                progress.send_replace(TransferProgress::new(TransferPhase::Complete, total, total));
                info!(resource = %request.target.resource_name, reply = %reply, "finished upload");
                Ok(reply)
            }
            Err(e) => {
                let uploaded = sent.load(Ordering::Relaxed).min(total);
                progress.send_replace(TransferProgress::new(TransferPhase::Failed, uploaded, total));
                warn!(resource = %request.target.resource_name, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn send_and_poll(
        &self,
        request: &UploadRequest,
        sent: Arc<AtomicU64>,
        progress: &watch::Sender<TransferProgress>,
    ) -> Result<String, TransferError> {
        let total = request.len();
        let form = self.build_form(request, Arc::clone(&sent))?;

        let send = self.client.post(&request.target.url).multipart(form).send();
        tokio::pin!(send);

        let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                result = &mut send => break result,
                _ = ticker.tick() => {
                    let uploaded = sent.load(Ordering::Relaxed).min(total);
                    progress.send_replace(TransferProgress::new(TransferPhase::Uploading, uploaded, total));
                }
            }
        };

        let response = result.map_err(|e| TransferError::network("upload request failed", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Protocol(format!(
                "upload rejected with HTTP {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| TransferError::network("failed to read upload response", e))
    }

    fn build_form(&self, request: &UploadRequest, sent: Arc<AtomicU64>) -> Result<Form, TransferError> {
        let body = Body::wrap_stream(body_stream(request.payload.clone(), sent));
        let part = Part::stream_with_length(body, request.len())
            .file_name(request.target.resource_name.clone())
            .mime_str(FILE_CONTENT_TYPE)
            .map_err(|e| TransferError::Config(format!("invalid upload content type: {e}")))?;

        Ok(Form::new()
            .text(DESC_FIELD, self.description.clone())
            .part(FILE_FIELD, part))
    }
}

/// Yields the payload in slices, counting each one as it is handed to the client.
fn body_stream(
    payload: Bytes,
    sent: Arc<AtomicU64>,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let len = payload.len();
    stream::iter((0..len).step_by(BODY_CHUNK_SIZE).map(move |start| {
        let chunk = payload.slice(start..(start + BODY_CHUNK_SIZE).min(len));
        sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        Ok(chunk)
    }))
}
