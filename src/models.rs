use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What is being moved: a base URL plus the resource name under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    pub url: String,
    pub resource_name: String,
}

impl TransferTarget {
    pub fn new(url: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            resource_name: resource_name.into(),
        }
    }

    /// `{url}/{resource_name}`, tolerating a trailing slash on the base URL.
    pub fn resource_url(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), self.resource_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    #[default]
    Idle,
    Uploading,
    SizeDiscovery,
    ResumeCheck,
    Streaming,
    Complete,
    Failed,
    Cancelled,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot published to observers after every chunk or poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    pub bytes_transferred: u64,
    /// Zero while the size is unknown.
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn new(phase: TransferPhase, bytes_transferred: u64, total_bytes: u64) -> Self {
        Self {
            phase,
            bytes_transferred,
            total_bytes,
        }
    }

    /// Completed fraction in `[0, 1]`.
    ///
    /// A completed transfer always reads as 1; an unknown total otherwise reads as 0.
    pub fn fraction(&self) -> f64 {
        if self.phase == TransferPhase::Complete {
            return 1.0;
        }
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }

    /// Whole percentage, rounded down.
    pub fn percent(&self) -> u32 {
        if self.phase == TransferPhase::Complete {
            return 100;
        }
        if self.total_bytes == 0 {
            return 0;
        }
        let done = u128::from(self.bytes_transferred.min(self.total_bytes));
        (done * 100 / u128::from(self.total_bytes)) as u32
    }

    pub fn percent_label(&self) -> String {
        format!("{}%", self.percent())
    }
}

/// Destination file as found at the start of a download attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFileState {
    pub path: PathBuf,
    pub existing_length: u64,
}

/// A one-shot upload. The payload is read in full before any network call.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub target: TransferTarget,
    pub payload: Bytes,
}

impl UploadRequest {
    pub fn new(target: TransferTarget, payload: impl Into<Bytes>) -> Self {
        Self {
            target,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// How a download attempt ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DownloadOutcome {
    /// The local file already held at least the remote length; no GET was sent.
    AlreadyComplete { local_length: u64, remote_length: u64 },
    /// The remainder was streamed to the end.
    Completed {
        resumed_from: u64,
        bytes_written: u64,
        total_bytes: u64,
    },
    /// Stopped at a suspension point; the file keeps `bytes_on_disk` for a later resume.
    Cancelled { bytes_on_disk: u64 },
}
