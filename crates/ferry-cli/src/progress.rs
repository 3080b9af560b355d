//! Progress bar for a download.

use std::path::Path;

use ferry_core::TransferState;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress of one incoming transfer
pub struct TransferProgress {
    bar: ProgressBar,
    filename: String,
}

impl TransferProgress {
    /// Start at `resume_from`, which is zero for a fresh download
    #[must_use]
    pub fn new(total_bytes: u64, filename: &str, resume_from: u64) -> Self {
        let bar = ProgressBar::new(total_bytes);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }

        bar.set_position(resume_from);
        if resume_from > 0 {
            bar.set_message(format!(
                "Resuming {filename} at {}",
                format_bytes(resume_from)
            ));
        } else {
            bar.set_message(format!("Receiving {filename}"));
        }

        Self {
            bar,
            filename: filename.to_string(),
        }
    }

    /// Bytes received so far
    pub fn update(&self, received: u64) {
        self.bar.set_position(received);
    }

    pub fn paused(&self) {
        self.bar.set_message(format!(
            "Paused {} at {}",
            self.filename,
            format_bytes(self.bar.position())
        ));
    }

    pub fn resumed(&self) {
        self.bar.set_message(format!("Receiving {}", self.filename));
    }

    /// Close the bar for a transfer that reached `state`
    pub fn finish(&self, state: TransferState, output: &Path) {
        if state == TransferState::Completed {
            self.bar
                .finish_with_message(format!("Received {}", output.display()));
        } else {
            self.bar
                .abandon_with_message(format!("{} {state}", self.filename));
        }
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

/// Format speed in human-readable format (bytes/sec)
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec as u64))
}
