//! Progress display for long-running migrations.
//!
//! The pipeline reports progress as plain strings through a `ProgressSink`.
//! On a terminal those strings drive an `indicatif` spinner; elsewhere they
//! are dropped.

use crate::migrate::ProgressSink;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::sync::Arc;
use std::time::Duration;

/// Check if we should show progress indicators.
///
/// Progress is shown only if stderr is an interactive terminal.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Create a spinner for indeterminate operations.
///
/// # Panics
/// Panics if the spinner template string is invalid.
#[must_use]
pub fn create_spinner(message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    if show {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("valid template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    pb
}

/// Wrap a spinner as a progress sink. Each message replaces the spinner text.
#[must_use]
pub fn spinner_sink(spinner: &ProgressBar) -> ProgressSink {
    let spinner = spinner.clone();
    Arc::new(move |message: &str| spinner.set_message(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_spinner_accepts_messages() {
        let spinner = create_spinner("Migrating", false);
        let sink = spinner_sink(&spinner);
        sink("Loading factions");
        assert_eq!(spinner.message(), "Loading factions");
        spinner.finish_and_clear();
    }
}
