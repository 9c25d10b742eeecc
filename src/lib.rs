//! Resumable, progress-tracked file transfer over HTTP.
//!
//! Uploads go out as one multipart POST. Downloads ask for the remote size
//! with HEAD, then fetch only the bytes the local file is missing with a
//! ranged GET, so an interrupted or cancelled download picks up where it
//! stopped.

pub mod config;
pub mod controller;
pub mod downloader;
pub mod error;
pub mod file_reader;
pub mod models;
pub mod progress;
pub mod service;
pub mod uploader;

pub use config::TransferConfig;
pub use controller::{DownloadResult, TransferController};
pub use downloader::{DownloadSession, Downloader};
pub use error::TransferError;
pub use file_reader::{read_local_file, read_local_file_chunked};
pub use models::{
    DownloadOutcome, LocalFileState, TransferPhase, TransferProgress, TransferTarget,
    UploadRequest,
};
pub use service::{DestinationResolver, DirectoryResolver, TransferService};
pub use uploader::Uploader;
