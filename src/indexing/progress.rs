//! Progress reporting for sweeps

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receives sweep progress
///
/// `set_total` is called from the counting thread while `advance` is called
/// from the indexing pipeline, so implementations must be thread-safe.
pub trait IndexProgress: Send + Sync {
    /// Running or final number of files the sweep will visit
    fn set_total(&self, total: u64);

    /// `n` more files were processed
    fn advance(&self, n: u64);

    /// The sweep finished
    fn finish(&self);
}

impl IndexProgress for ProgressBar {
    fn set_total(&self, total: u64) {
        self.set_length(total);
    }

    fn advance(&self, n: u64) {
        self.inc(n);
    }

    fn finish(&self) {
        self.finish_and_clear();
    }
}

/// Discards all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl IndexProgress for NoProgress {
    fn set_total(&self, _total: u64) {}
    fn advance(&self, _n: u64) {}
    fn finish(&self) {}
}

/// A stderr progress bar labelled with the swept directory
///
/// indicatif hides it when stderr is not a terminal.
pub fn sweep_progress_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    if let Ok(style) = ProgressStyle::with_template(
        "{msg} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}<{eta_precise}]",
    ) {
        bar.set_style(style);
    }
    bar.set_message(label.to_string());
    bar
}
