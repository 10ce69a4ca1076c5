//! Sweep progress with a plain fallback

use super::context::UiContext;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Running count of files a sweep has looked at.
///
/// Cheap to clone; clones drive the same bar, so one can move into a
/// blocking task while the caller keeps another to finish it.
#[derive(Clone)]
pub struct SweepProgress {
    bar: Option<ProgressBar>,
}

impl SweepProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = ctx.use_fancy_output().then(|| {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("  {spinner:.blue} {prefix} {pos} files {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        if bar.is_none() {
            println!("{}...", label);
        }
        Self { bar }
    }

    /// Report the number of files scanned so far
    pub fn tick(&self, scanned: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(scanned as u64);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
