// ABOUTME: indicatif spinner and inquire confirmation adapters for the engine's interaction seams
// ABOUTME: The spinner is hidden while a prompt is on screen

use indicatif::{ProgressBar, ProgressStyle};
use inquire::Confirm;
use klbox_engine::{Progress, Prompter};
use std::time::Duration;

pub struct SpinnerProgress {
    bar: ProgressBar,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }

    /// Spinner that draws nothing, for non-interactive runs
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }
}

impl Default for SpinnerProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for SpinnerProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn suspend(&self, f: &mut dyn FnMut()) {
        self.bar.suspend(f)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Interactive yes/no prompt, defaulting to no
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn confirm(&self, message: &str) -> bool {
        Confirm::new(message)
            .with_default(false)
            .prompt()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_spinner_runs_suspended_closure() {
        let progress = SpinnerProgress::hidden();
        let mut ran = false;
        progress.set_message("resolving environment");
        progress.suspend(&mut || ran = true);
        progress.finish();
        assert!(ran);
    }
}
