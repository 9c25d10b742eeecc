//! Terminal rendering of a progress channel.

use crate::models::{TransferPhase, TransferProgress};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const BAR_TEMPLATE: &str = "{msg:30} {bar:40} {bytes}/{total_bytes} ({bytes_per_sec}) {prefix}";

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn phase_label(phase: TransferPhase) -> &'static str {
    match phase {
        TransferPhase::Idle => "Waiting",
        TransferPhase::Uploading => "Uploading",
        TransferPhase::SizeDiscovery => "Querying size",
        TransferPhase::ResumeCheck => "Checking local file",
        TransferPhase::Streaming => "Downloading",
        TransferPhase::Complete => "Done",
        TransferPhase::Failed => "Failed",
        TransferPhase::Cancelled => "Cancelled",
    }
}

fn apply(pb: &ProgressBar, name: &str, progress: &TransferProgress) {
    if progress.total_bytes > 0 {
        pb.set_length(progress.total_bytes);
    }
    pb.set_position(progress.bytes_transferred);
    pb.set_prefix(progress.percent_label());
    pb.set_message(format!("{} {}", phase_label(progress.phase), name));
}

/// Mirrors `rx` onto a progress bar until the transfer reaches a terminal phase
/// or the sender goes away.
pub fn render(mut rx: watch::Receiver<TransferProgress>, name: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new(0);
        pb.set_style(bar_style());

        loop {
            let current = *rx.borrow_and_update();
            apply(&pb, &name, &current);
            if current.phase.is_terminal() {
                break;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        pb.finish();
    })
}
