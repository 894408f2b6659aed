//! Terminal feedback for the daemon: one spinner per startup stage and an
//! optional live status line while the pipeline runs. Falls back to plain
//! `==>` lines when stderr is not a terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode) -> Self {
        let is_tty = std::io::stderr().is_terminal();
        let pretty = match mode {
            UiMode::Pretty => true,
            UiMode::Plain => false,
            UiMode::Auto => is_tty && std::env::var_os("NO_COLOR").is_none(),
        };
        Self { pretty }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Start a named stage. The stage is marked done when the guard drops,
    /// or failed through [`StageGuard::fail`].
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.pretty.then(|| {
            let spinner = spinner_on_stderr("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Single line refreshed with runtime figures. Hidden in plain mode.
    pub fn status_line(&self) -> StatusLine {
        StatusLine {
            spinner: self.pretty.then(|| spinner_on_stderr("{spinner} {msg}")),
        }
    }
}

fn spinner_on_stderr(template: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_draw_target(ProgressDrawTarget::stderr());
    spinner.enable_steady_tick(Duration::from_millis(120));
    let style =
        ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    /// Finish the stage as failed with a short reason.
    pub fn fail(mut self, reason: &str) {
        self.failed = true;
        let message = format!("✘ {}: {}", self.name, reason);
        self.finish(message);
    }

    fn finish(&self, message: String) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if self.failed {
            return;
        }
        let message = format!(
            "✔ {} ({})",
            self.name,
            format_duration(self.start.elapsed())
        );
        self.finish(message);
    }
}

pub struct StatusLine {
    spinner: Option<ProgressBar>,
}

impl StatusLine {
    pub fn update(&self, fps: f64, frames: u64, dropped: u64, detections: usize) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{fps:>5.1} fps | {frames} frames | {dropped} dropped | {detections} detections"
            ));
        }
    }

    pub fn finish(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
