//! Rate-limited progress reporting for body transfers.

use std::time::{Duration, Instant};
use tracing::info;

/// Minimum spacing between two progress reports for one file.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Reports transfer progress no more than once per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Instant,
}

impl ProgressThrottle {
    /// Start a throttle; the first report is due one interval from now.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    /// Whether a report is due. Resets the window when it is.
    pub fn ready(&mut self) -> bool {
        if self.last.elapsed() >= self.interval {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }

    /// Emit a progress event for `path` if one is due.
    pub fn report(&mut self, path: &str, downloaded: u64, expected: Option<u64>) {
        if !self.ready() {
            return;
        }
        match expected {
            Some(total) if total > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let percent = downloaded as f64 / total as f64 * 100.0;
                info!(
                    path,
                    downloaded,
                    total,
                    percent = format_args!("{percent:.1}"),
                    "download progress"
                );
            }
            _ => info!(path, downloaded, "download progress"),
        }
    }
}

/// Human readable size in MiB, as printed in status lines.
#[must_use]
pub fn megabytes(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let mb = bytes as f64 / 1024.0 / 1024.0;
    format!("{mb:.2} MB")
}
