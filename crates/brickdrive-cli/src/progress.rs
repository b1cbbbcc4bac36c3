//! Connection spinner on stderr, so stdout stays machine-readable.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Spinner shown while the session opens and the brick name is fetched.
pub struct ConnectSpinner {
    bar: ProgressBar,
}

impl ConnectSpinner {
    /// Start spinning with a "connecting to `peer`" message.
    pub fn start(peer: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(format!("connecting to {peer}"));
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Stop and erase the spinner.
    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}
