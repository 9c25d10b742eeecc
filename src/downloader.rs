//! Resumable download: HEAD for the size, ranged GET for the remainder.

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::models::{DownloadOutcome, LocalFileState, TransferPhase, TransferProgress, TransferTarget};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

type BodyReader = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// One download attempt. Owns the response stream and the destination file
/// until it completes, fails, or is cancelled; both are closed on release or drop.
pub struct DownloadSession {
    pub target: TransferTarget,
    pub local: LocalFileState,
    pub remote_total_length: u64,
    /// Always equal to `local.existing_length`.
    pub resume_offset: u64,
    position: u64,
    response_stream: Option<BodyReader>,
    file_stream: Option<File>,
}

impl DownloadSession {
    /// Opens (or creates) the destination without truncating it and records its length.
    pub fn open(
        target: TransferTarget,
        dest: &Path,
        remote_total_length: u64,
    ) -> Result<Self, TransferError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TransferError::file(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dest)
            .map_err(|e| TransferError::file(dest, e))?;
        let existing_length = file
            .metadata()
            .map_err(|e| TransferError::file(dest, e))?
            .len();

        Ok(Self {
            target,
            local: LocalFileState {
                path: dest.to_path_buf(),
                existing_length,
            },
            remote_total_length,
            resume_offset: existing_length,
            position: existing_length,
            response_stream: None,
            file_stream: Some(file),
        })
    }

    pub fn needs_fetch(&self) -> bool {
        self.local.existing_length < self.remote_total_length
    }

    /// Bytes of the resource now on disk.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_open(&self) -> bool {
        self.response_stream.is_some() || self.file_stream.is_some()
    }

    /// Closes both handles. Safe to call more than once.
    pub fn release(&mut self) {
        if self.is_open() {
            self.response_stream = None;
            self.file_stream = None;
            debug!(path = %self.local.path.display(), position = self.position, "download session released");
        }
    }

    fn seek_to_resume(&mut self) -> Result<(), TransferError> {
        let Some(file) = self.file_stream.as_mut() else {
            return Err(released(&self.local.path));
        };
        file.seek(SeekFrom::Start(self.resume_offset))
            .map_err(|e| TransferError::file(&self.local.path, e))?;
        Ok(())
    }

    fn progress(&self, phase: TransferPhase) -> TransferProgress {
        TransferProgress::new(phase, self.position, self.remote_total_length)
    }

    fn cancel(&mut self, progress: &watch::Sender<TransferProgress>) -> DownloadOutcome {
        self.release();
        info!(resource = %self.target.resource_name, bytes_on_disk = self.position, "download cancelled");
        progress.send_replace(self.progress(TransferPhase::Cancelled));
        DownloadOutcome::Cancelled {
            bytes_on_disk: self.position,
        }
    }

    /// Reads the response into a `buffer_size` buffer and appends each read to the file.
    ///
    /// Every read is a suspension point where `cancel` is honoured.
    async fn stream_to_end(
        &mut self,
        buffer_size: usize,
        progress: &watch::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError> {
        let mut buffer = vec![0u8; buffer_size];

        loop {
            let reader = self.response_stream.as_mut().ok_or_else(|| {
                TransferError::Protocol("response stream already released".to_string())
            })?;

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = reader.read(&mut buffer) => Some(read),
            };
            let Some(read) = read else {
                return Ok(self.cancel(progress));
            };
            let n = read.map_err(TransferError::StreamInterrupted)?;

            if n == 0 {
                if self.position != self.remote_total_length {
                    warn!(
                        position = self.position,
                        expected = self.remote_total_length,
                        "stream ended before the advertised length"
                    );
                }
                return Ok(self.finish(progress));
            }

            // Never write past the advertised length, whatever the server sends.
            let remaining = self.remote_total_length.saturating_sub(self.position);
            let take = (n as u64).min(remaining) as usize;
            if take < n {
                warn!(
                    discarded = n - take,
                    expected = self.remote_total_length,
                    "response ran past the advertised length"
                );
            }

            let Some(file) = self.file_stream.as_mut() else {
                return Err(released(&self.local.path));
            };
            file.write_all(&buffer[..take])
                .map_err(|e| TransferError::file(&self.local.path, e))?;
            self.position += take as u64;
            trace!(position = self.position, "chunk written");

            if self.position >= self.remote_total_length {
                return Ok(self.finish(progress));
            }
            progress.send_replace(self.progress(TransferPhase::Streaming));
        }
    }

    fn finish(&mut self, progress: &watch::Sender<TransferProgress>) -> DownloadOutcome {
        self.response_stream = None;
        progress.send_replace(self.progress(TransferPhase::Complete));
        info!(resource = %self.target.resource_name, bytes = self.position, "download done");
        DownloadOutcome::Completed {
            resumed_from: self.resume_offset,
            bytes_written: self.position - self.resume_offset,
            total_bytes: self.remote_total_length,
        }
    }
}

fn released(path: &Path) -> TransferError {
    TransferError::file(
        path,
        io::Error::new(io::ErrorKind::NotConnected, "destination file already released"),
    )
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct Downloader {
    client: Client,
    buffer_size: usize,
}

impl Downloader {
    pub fn new(client: Client, buffer_size: usize) -> Self {
        Self {
            client,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn from_config(config: &TransferConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self::new(config.build_client()?, config.read_buffer_size))
    }

    /// Downloads `target` into `dest`, resuming from whatever `dest` already holds.
    ///
    /// Failures are logged, marked on `progress`, and returned. Bytes written
    /// before a failure or cancellation stay on disk.
    pub async fn download(
        &self,
        target: &TransferTarget,
        dest: &Path,
        progress: &watch::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError> {
        match self.run(target, dest, progress, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                progress.send_modify(|p| p.phase = TransferPhase::Failed);
                warn!(resource = %target.resource_name, error = %e, "download failed");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        target: &TransferTarget,
        dest: &Path,
        progress: &watch::Sender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome, TransferError> {
        let url = target.resource_url();
        progress.send_replace(TransferProgress::new(TransferPhase::SizeDiscovery, 0, 0));

        let remote_total = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            size = self.discover_size(&url) => Some(size?),
        };
        let Some(remote_total) = remote_total else {
            let bytes_on_disk = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
            info!(resource = %target.resource_name, "download cancelled before size discovery finished");
            progress.send_replace(TransferProgress::new(TransferPhase::Cancelled, bytes_on_disk, 0));
            return Ok(DownloadOutcome::Cancelled { bytes_on_disk });
        };
        info!(url = %url, total = remote_total, "remote size discovered");

        let mut session = DownloadSession::open(target.clone(), dest, remote_total)?;
        progress.send_replace(session.progress(TransferPhase::ResumeCheck));

        if !session.needs_fetch() {
            info!(
                path = %dest.display(),
                local = session.local.existing_length,
                remote = remote_total,
                "nothing to download"
            );
            progress.send_replace(session.progress(TransferPhase::Complete));
            return Ok(DownloadOutcome::AlreadyComplete {
                local_length: session.local.existing_length,
                remote_length: remote_total,
            });
        }

        session.seek_to_resume()?;
        info!(path = %dest.display(), offset = session.resume_offset, "requesting remainder");

        let reader = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            reader = self.open_range(&url, session.resume_offset, remote_total) => Some(reader?),
        };
        let Some(reader) = reader else {
            return Ok(session.cancel(progress));
        };
        session.response_stream = Some(reader);
        progress.send_replace(session.progress(TransferPhase::Streaming));

        session.stream_to_end(self.buffer_size, progress, cancel).await
    }

    async fn discover_size(&self, url: &str) -> Result<u64, TransferError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| TransferError::network("HEAD request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Protocol(format!(
                "HEAD {url} returned HTTP {status}"
            )));
        }

        let header = response.headers().get(CONTENT_LENGTH).ok_or_else(|| {
            TransferError::Protocol(format!("HEAD {url} carried no Content-Length"))
        })?;

        header
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                TransferError::Protocol(format!("unparseable Content-Length {header:?} from {url}"))
            })
    }

    async fn open_range(
        &self,
        url: &str,
        offset: u64,
        remote_total: u64,
    ) -> Result<BodyReader, TransferError> {
        let response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes={offset}-"))
            .send()
            .await
            .map_err(|e| TransferError::network("GET request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Protocol(format!(
                "GET {url} returned HTTP {status}"
            )));
        }

        // A 200 to a resumed request is only trusted when it declares exactly the
        // missing suffix; anything else may restart from byte 0 and duplicate the prefix.
        if status == StatusCode::OK && offset > 0 {
            let expected = remote_total - offset;
            if response.content_length() != Some(expected) {
                return Err(TransferError::Protocol(format!(
                    "{url} answered the range request at {offset} with a 200 of length {:?}, expected {expected}",
                    response.content_length()
                )));
            }
        }

        let stream = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(StreamReader::new(stream))
    }
}
