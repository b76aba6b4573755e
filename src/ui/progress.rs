//! Progress indicators with CI fallback

use super::context::UiContext;
use crate::platform::Platform;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

/// A single spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            eprintln!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => eprintln!("{} {}", style("[OK]").green(), message),
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => eprintln!("{} {}", style("[FAIL]").red(), message),
        }
    }
}

/// One spinner line per platform for concurrent builds.
///
/// Plain mode prints one line when a platform starts and one when it ends.
pub struct BuildBoard {
    _multi: Option<MultiProgress>,
    bars: HashMap<Platform, ProgressBar>,
}

impl BuildBoard {
    pub fn new(ctx: &UiContext, platforms: &[Platform]) -> Self {
        if !ctx.use_fancy_output() {
            return Self {
                _multi: None,
                bars: HashMap::new(),
            };
        }

        let multi = MultiProgress::new();
        let width = platforms.iter().map(|p| p.to_string().len()).max().unwrap_or(0);
        let template = format!("  {{spinner:.cyan}} {{prefix:<{}}}  {{msg:.dim}}  {{elapsed:.dim}}", width);
        let bar_style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");

        let bars = platforms
            .iter()
            .map(|p| {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(bar_style.clone());
                bar.set_prefix(p.to_string());
                bar.set_message("queued");
                (p.clone(), bar)
            })
            .collect();

        Self {
            _multi: Some(multi),
            bars,
        }
    }

    /// Mark a platform as running
    pub fn running(&self, platform: &Platform, message: &str) {
        match self.bars.get(platform) {
            Some(bar) => {
                bar.set_message(message.to_string());
                bar.enable_steady_tick(Duration::from_millis(120));
            }
            None => eprintln!("{} {}: {}", style("...").dim(), platform, message),
        }
    }

    /// Mark a platform as finished
    pub fn finished(&self, platform: &Platform, ok: bool, message: &str) {
        let tag = if ok {
            style("[OK]").green()
        } else {
            style("[FAIL]").red()
        };
        match self.bars.get(platform) {
            Some(bar) => bar.finish_with_message(format!("{} {}", tag, message)),
            None => eprintln!("{} {}: {}", tag, platform, message),
        }
    }
}
