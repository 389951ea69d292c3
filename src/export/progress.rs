//! Progress tracking for export operations
//!
//! Displays a spinner with the number of documents serialized, the bytes
//! handed to the uploader and the current throughput.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Progress tracker for export operations
pub struct ProgressTracker {
    /// Number of documents processed so far
    processed: AtomicU64,
    /// Bytes sealed into parts so far
    bytes: AtomicU64,
    /// Start time of the operation
    start_time: Instant,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `enable_bar` - Whether to display a spinner on the terminal
    pub fn new(enable_bar: bool) -> Self {
        let bar = if enable_bar {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} {pos} documents {msg}")
            {
                bar.set_style(style);
            }
            Some(bar)
        } else {
            None
        };

        Self {
            processed: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Tracker that never draws anything
    pub fn hidden() -> Self {
        Self::new(false)
    }

    /// Update progress with new totals
    ///
    /// # Arguments
    /// * `documents` - Total number of documents serialized so far
    /// * `bytes` - Total number of bytes serialized so far
    pub fn update(&self, documents: u64, bytes: u64) {
        self.processed.store(documents, Ordering::Relaxed);
        self.bytes.store(bytes, Ordering::Relaxed);

        if let Some(ref bar) = self.bar {
            bar.set_position(documents);

            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let speed = documents as f64 / elapsed;
                bar.set_message(format!(
                    "({:.1} MiB, {:.0} docs/sec)",
                    bytes as f64 / (1024.0 * 1024.0),
                    speed
                ));
            }
        }
    }

    pub fn documents(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::hidden()
    }
}
