//! Transfer progress display with progress bars.

use indicatif::{ProgressBar, ProgressBarIter, ProgressStyle};
use tokio::io::{AsyncRead, AsyncWrite};

/// Transfer progress tracker
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Progress bar for a transfer of known size
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::with_template(
                "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        bar.set_message(format!("Transferring: {filename}"));
        Self { bar }
    }

    /// Spinner for a transfer whose size is not known up front
    #[must_use]
    pub fn unbounded(filename: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template(
                "{msg}\n{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("Receiving: {filename}"));
        Self { bar }
    }

    /// Count bytes read through `reader`
    pub fn wrap_read<R: AsyncRead + Unpin>(&self, reader: R) -> ProgressBarIter<R> {
        self.bar.wrap_async_read(reader)
    }

    /// Count bytes written through `writer`
    pub fn wrap_write<W: AsyncWrite + Unpin>(&self, writer: W) -> ProgressBarIter<W> {
        self.bar.wrap_async_write(writer)
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}
