mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cli::{Args, Command};
use resumable_transfer::{DownloadOutcome, TransferConfig, TransferService, progress};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

// One scheduler thread: every transfer task is cooperatively interleaved on it.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = TransferConfig {
        base_url: args.url.clone(),
        proxy: args.proxy.clone(),
        timeout: args.timeout.map(Duration::from_secs),
        ..TransferConfig::default()
    };

    match args.command {
        Command::Upload { path, desc } => {
            config.upload_description = desc;
            upload(&config, &path, args.json).await
        }
        Command::Download {
            name,
            output,
            buffer_size,
        } => {
            config.download_dir = output;
            config.read_buffer_size = buffer_size;
            download(&config, &name, args.json).await
        }
    }
}

async fn upload(config: &TransferConfig, path: &Path, json: bool) -> Result<()> {
    let service = TransferService::new(config).context("Failed to set up transfer service")?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let bar = progress::render(service.upload_progress(), name);
    let result = service.upload(path).await;
    // Closing the channel ends the bar even if the upload never started.
    drop(service);
    if let Err(e) = bar.await {
        warn!(error = %e, "progress display task failed");
    }

    let reply = result.with_context(|| format!("Upload of {} failed", path.display()))?;
    if json {
        println!("{}", json!({ "uploaded": path, "reply": reply }));
    } else {
        println!("finish upload, server replied:\n{reply}");
    }
    Ok(())
}

async fn download(config: &TransferConfig, name: &str, json: bool) -> Result<()> {
    let mut service = TransferService::new(config).context("Failed to set up transfer service")?;
    let dest = service.destination(name);

    let mut rx = service.download_progress();
    let bar = progress::render(service.download_progress(), name.to_string());
    service.start_download(name).await;

    let interrupted = tokio::select! {
        // A failed signal listener disables this branch instead of cancelling.
        Ok(()) = tokio::signal::ctrl_c() => true,
        _ = rx.wait_for(|p| p.phase.is_terminal()) => false,
    };

    let result = if interrupted {
        service.cancel_download().await
    } else {
        service.wait_download().await
    };
    drop(service);
    if let Err(e) = bar.await {
        warn!(error = %e, "progress display task failed");
    }

    let outcome = result
        .ok_or_else(|| anyhow!("Download of {name} was never started"))?
        .with_context(|| format!("Download of {name} failed"))?;

    if json {
        let mut line = serde_json::to_value(outcome).context("Failed to serialize outcome")?;
        line["path"] = json!(dest);
        println!("{line}");
        return Ok(());
    }

    match outcome {
        DownloadOutcome::AlreadyComplete {
            local_length,
            remote_length,
        } => println!(
            "Nothing to download: {} already holds {local_length} of {remote_length} bytes",
            dest.display()
        ),
        DownloadOutcome::Completed {
            resumed_from,
            bytes_written,
            total_bytes,
        } => println!(
            "Downloaded {bytes_written} bytes (resumed at {resumed_from}, total {total_bytes}) to {}",
            dest.display()
        ),
        DownloadOutcome::Cancelled { bytes_on_disk } => println!(
            "Cancelled with {bytes_on_disk} bytes in {}; run again to resume",
            dest.display()
        ),
    }
    Ok(())
}
