//! Full-screen terminal front end.
//!
//! [`TuiModel`] is the shared view state: the wizard refreshes it as its
//! display, and the orchestrator feeds it progress events through
//! [`TuiModel::progress_sink`]. [`render`] draws one frame from a
//! snapshot. The terminal event loop lives in [`app`].

pub mod app;

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Wrap},
};
use strum::IntoEnumIterator;

use crate::navigator::{DisplayRefresh, Navigator, WizardState, WizardStep};
use crate::presenter::format_event;
use crate::progress::{ProgressEvent, ProgressSink, ProgressStatus};
use crate::stage::StageId;
use crate::theme::{Colors, Styles};

/// Lines of installer output kept for display
const OUTPUT_HISTORY: usize = 500;

/// Everything a frame needs
#[derive(Debug, Clone)]
pub struct ViewState {
    pub wizard: WizardState,
    pub status: String,
    /// Latest event of the stage that ran last
    pub stage: Option<ProgressEvent>,
    pub completed: HashSet<StageId>,
    pub failed: Option<StageId>,
    pub output: VecDeque<String>,
    /// Prompt or message shown in the key bar instead of the key hints
    pub notice: Option<String>,
}

/// Shared view state behind a mutex
#[derive(Debug)]
pub struct TuiModel {
    view: Mutex<ViewState>,
}

impl TuiModel {
    pub fn new(dry_run: bool) -> Self {
        Self {
            view: Mutex::new(ViewState {
                wizard: *Navigator::new(dry_run).state(),
                status: WizardStep::Welcome.status().to_string(),
                stage: None,
                completed: HashSet::new(),
                failed: None,
                output: VecDeque::new(),
                notice: None,
            }),
        }
    }

    pub fn snapshot(&self) -> ViewState {
        self.lock().clone()
    }

    pub fn set_notice(&self, notice: Option<String>) {
        self.lock().notice = notice;
    }

    /// A progress sink that records into this model
    pub fn progress_sink(self: &Arc<Self>) -> Arc<dyn ProgressSink> {
        let model = Arc::clone(self);
        Arc::new(move |event: ProgressEvent| model.apply(event))
    }

    fn apply(&self, event: ProgressEvent) {
        let mut view = self.lock();
        match event.kind {
            ProgressStatus::Starting => view.failed = None,
            ProgressStatus::Completed => {
                view.completed.insert(event.stage);
            }
            ProgressStatus::Failed | ProgressStatus::Error => view.failed = Some(event.stage),
            ProgressStatus::Running => {}
        }

        view.output.push_back(format_event(&event));
        while view.output.len() > OUTPUT_HISTORY {
            view.output.pop_front();
        }
        view.stage = Some(event);
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.view
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DisplayRefresh for TuiModel {
    fn refresh(&self, state: &WizardState, status: &str) {
        let mut view = self.lock();
        view.wizard = *state;
        view.status = status.to_string();
    }
}

/// Draw the whole screen
pub fn render(f: &mut Frame, view: &ViewState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(9),    // Steps + output
            Constraint::Length(3), // Progress
            Constraint::Length(3), // Key hints
        ])
        .split(f.area());

    render_title(f, rows[0], view);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(28), Constraint::Min(20)])
        .split(rows[1]);
    render_steps(f, body[0], view);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(3)])
        .split(body[1]);
    render_status(f, right[0], view);
    render_output(f, right[1], view);

    render_progress(f, rows[2], view);
    render_keys(f, rows[3], view);
}

fn render_title(f: &mut Frame, area: Rect, view: &ViewState) {
    let title = view
        .wizard
        .step()
        .map_or("Gentoo Linux Installer", WizardStep::title);
    let mut spans = vec![Span::styled(
        format!("GentooTUI - {}: {}", view.wizard.step_counter(), title),
        Styles::title(),
    )];
    if view.wizard.dry_run {
        spans.push(Span::styled("  [DRY RUN]", Styles::dry_run()));
    }

    let widget = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Center);
    f.render_widget(widget, area);
}

fn render_steps(f: &mut Frame, area: Rect, view: &ViewState) {
    let items: Vec<ListItem> = WizardStep::iter()
        .map(|step| {
            let stages = step.stages();
            let failed = view.failed.is_some_and(|id| stages.contains(&id));
            let done = if stages.is_empty() {
                view.wizard.current_step > step.index()
            } else {
                stages.iter().all(|id| view.completed.contains(id))
            };

            let (marker, style) = if failed {
                ("✗", Styles::failed())
            } else if step.index() == view.wizard.current_step {
                ("▶", Styles::current_step())
            } else if done {
                ("✓", Styles::done())
            } else {
                (" ", Styles::pending())
            };
            ListItem::new(Line::from(Span::styled(
                format!(" {} {}. {}", marker, step.index() + 1, step.title()),
                style,
            )))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Steps ")
            .title_style(Styles::title()),
    );
    f.render_widget(list, area);
}

fn render_status(f: &mut Frame, area: Rect, view: &ViewState) {
    let widget = Paragraph::new(view.status.as_str())
        .style(Styles::text())
        .block(Block::default().borders(Borders::ALL).title(" Status "));
    f.render_widget(widget, area);
}

fn render_output(f: &mut Frame, area: Rect, view: &ViewState) {
    let visible = area.height.saturating_sub(2) as usize;
    let skip = view.output.len().saturating_sub(visible);
    let lines: Vec<Line> = view
        .output
        .iter()
        .skip(skip)
        .map(|line| Line::from(line.as_str()))
        .collect();

    let widget = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Installer Output "),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(widget, area);
}

fn render_progress(f: &mut Frame, area: Rect, view: &ViewState) {
    let (percent, label, color) = match &view.stage {
        Some(event) => {
            let color = match event.kind {
                ProgressStatus::Completed => Colors::SUCCESS,
                ProgressStatus::Failed | ProgressStatus::Error => Colors::ERROR,
                _ => Colors::INFO,
            };
            (
                ((event.progress * 100.0).round() as u16).min(100),
                format!("{}: {}", event.stage_name, event.status),
                color,
            )
        }
        None => (0, "Waiting".to_string(), Colors::FG_MUTED),
    };

    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Installation Progress "),
        )
        .gauge_style(ratatui::style::Style::default().fg(color))
        .percent(percent)
        .label(label);
    f.render_widget(gauge, area);
}

fn render_keys(f: &mut Frame, area: Rect, view: &ViewState) {
    let text = if view.wizard.installation_active {
        "Installing... please wait (Ctrl+C aborts)".to_string()
    } else if let Some(notice) = &view.notice {
        notice.clone()
    } else {
        "[Enter] Continue   [b] Back   [q] Quit".to_string()
    };

    let widget = Paragraph::new(text)
        .style(Styles::hint())
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(widget, area);
}
