use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "resumable-transfer")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:8988")]
    pub url: String,

    /// HTTP proxy (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Request timeout in seconds (no timeout when omitted)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the result as a JSON line
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a local file as a multipart form
    Upload {
        /// File to upload
        path: PathBuf,

        /// Value of the form's description field
        #[arg(short, long, default_value = "test upload file")]
        desc: String,
    },

    /// Download a resource, resuming any partial local copy
    Download {
        /// Resource name under the base URL
        name: String,

        /// Output directory
        #[arg(short, long, default_value = "./downloads")]
        output: PathBuf,

        /// Bytes read per chunk
        #[arg(short, long, default_value = "128")]
        buffer_size: usize,
    },
}
