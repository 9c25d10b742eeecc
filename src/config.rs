use crate::error::TransferError;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8988";
pub const DEFAULT_DOWNLOAD_DIR: &str = "./downloads";
/// Small on purpose: progress moves in visible steps and a cancel lands quickly.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128;
pub const DEFAULT_UPLOAD_DESCRIPTION: &str = "test upload file";

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub base_url: String,
    pub download_dir: PathBuf,
    pub read_buffer_size: usize,
    pub upload_description: String,
    pub proxy: Option<String>,
    /// No timeout unless set; a stalled server then blocks only its own task.
    pub timeout: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            upload_description: DEFAULT_UPLOAD_DESCRIPTION.to_string(),
            proxy: None,
            timeout: None,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.read_buffer_size == 0 {
            return Err(TransferError::Config(
                "read buffer size must be at least 1 byte".to_string(),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(TransferError::Config("base URL is empty".to_string()));
        }
        Ok(())
    }

    pub fn build_client(&self) -> Result<Client, TransferError> {
        let mut client_builder = Client::builder();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        if let Some(proxy_url) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| TransferError::Config(format!("invalid proxy {proxy_url}: {e}")))?;
            client_builder = client_builder.proxy(proxy);
        }

        client_builder
            .build()
            .map_err(|e| TransferError::Config(format!("failed to build HTTP client: {e}")))
    }
}
