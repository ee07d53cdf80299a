//! Terminal progress display for an update run.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;

use patchup::progress::{format_bytes, SpeedSampler};
use patchup::{ApplyStage, Changelog, UpdateObserver};

const BAR_TEMPLATE: &str =
    "{spinner:.blue} {prefix:>10.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {msg}";

const TICK: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

/// Renders stages and download progress with indicatif.
pub struct ConsoleObserver {
    bar: ProgressBar,
    speed: SpeedSampler,
    version: Mutex<String>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.tick_chars(TICK).progress_chars("█▓▒░  "));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar,
            speed: SpeedSampler::default(),
            version: Mutex::new(String::new()),
        }
    }

    /// Stop the spinner, leaving the last line visible.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateObserver for ConsoleObserver {
    fn on_stage(&self, version: &str, stage: ApplyStage) {
        let mut current = self.version.lock();
        if *current != version {
            *current = version.to_string();
            self.bar.set_prefix(version.to_string());
        }
        if stage == ApplyStage::Fetching {
            self.bar.set_position(0);
            self.bar.set_length(0);
        } else if stage.is_terminal() {
            let mark = match stage {
                ApplyStage::Done => style("✓").green().bold(),
                _ => style("✗").red().bold(),
            };
            self.bar.println(format!("{} {}", mark, version));
        }
        self.bar.set_message(stage.name());
    }

    fn on_label(&self, label: &str) {
        self.bar.set_message(label.to_string());
    }

    fn on_progress(&self, bytes_since_last: u64, bytes_so_far: u64, total: u64) {
        self.speed.feed(bytes_since_last);
        self.bar.set_length(total);
        self.bar.set_position(bytes_so_far);
        self.bar.set_message(format!(
            "{} / {} ({}/s)",
            format_bytes(bytes_so_far),
            format_bytes(total),
            format_bytes(self.speed.speed())
        ));
    }

    fn on_changelogs(&self, changelogs: &[Changelog]) {
        for changelog in changelogs {
            self.bar
                .println(format!("{}", style(&changelog.title).bold().underlined()));
            for line in changelog.body.lines() {
                self.bar.println(format!("  {}", line));
            }
        }
    }

    fn on_finished(&self, has_updates: bool) {
        if has_updates {
            self.bar.set_message("Update complete");
        } else {
            self.bar.set_message("Already up to date");
        }
    }
}
