//! Line-oriented console presenter.
//!
//! Renders the wizard header after every transition and one line per
//! progress event. Writes go through a mutex-guarded writer so the
//! presenter can serve as both display and progress sink.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::navigator::{DisplayRefresh, WizardState};
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};

const BAR_WIDTH: usize = 20;

pub struct ConsolePresenter<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsolePresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsolePresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Recover the writer (used by tests to inspect output)
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::debug!("Console write failed: {}", e);
        }
    }
}

impl<W: Write + Send + 'static> ConsolePresenter<W> {
    /// A progress sink that renders into this presenter
    pub fn progress_sink(self: &Arc<Self>) -> Arc<dyn ProgressSink> {
        let presenter = Arc::clone(self);
        Arc::new(move |event: ProgressEvent| presenter.write_line(&format_event(&event)))
    }
}

impl<W: Write + Send> DisplayRefresh for ConsolePresenter<W> {
    fn refresh(&self, state: &WizardState, status: &str) {
        let mut header = format!("[{}] {}", state.step_counter(), status);
        if state.dry_run {
            header.push_str("  (dry-run)");
        }
        if state.installation_active {
            header.push_str("  [installing]");
        }
        self.write_line("");
        self.write_line(&header);
    }
}

/// One-line rendering of a progress event
pub fn format_event(event: &ProgressEvent) -> String {
    let percent = (event.progress * 100.0).round() as u32;
    let filled = ((event.progress * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));

    let mut line = format!(
        "  [{}] {:>3}% {}: {}",
        bar, percent, event.stage_name, event.status
    );
    if let Some(detail) = &event.detail {
        line.push_str(&format!(" ({})", detail));
    }
    if matches!(event.kind, ProgressStatus::Failed | ProgressStatus::Error) {
        if let Some(error) = &event.error {
            line.push_str(&format!(" - {}", error));
        }
    }
    line
}
