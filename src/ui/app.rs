//! Terminal event loop for the full-screen wizard.
//!
//! Key presses are read on a dedicated thread and forwarded over a channel.
//! Continuing a step moves the [`Wizard`] into a spawned task so the screen
//! keeps redrawing while stages run; the wizard comes back when the task
//! finishes. In raw mode Ctrl+C arrives as a key, not as SIGINT, so it is
//! handled here.

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::{JoinError, JoinHandle};

use super::{TuiModel, render};
use crate::wizard::{ContinueOutcome, Wizard};

/// Redraw interval while nothing else happens
const TICK: Duration = Duration::from_millis(100);

/// How the full-screen session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    Cancelled,
}

/// What a key press asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    Back,
    Quit,
    Confirm,
    Interrupt,
    Other,
    Ignored,
}

pub fn map_key(key: KeyEvent) -> KeyAction {
    if key.kind != KeyEventKind::Press {
        return KeyAction::Ignored;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => KeyAction::Interrupt,
        KeyCode::Enter | KeyCode::Right | KeyCode::Char('c') => KeyAction::Continue,
        KeyCode::Left | KeyCode::Backspace | KeyCode::Char('b') => KeyAction::Back,
        KeyCode::Esc | KeyCode::Char('q') => KeyAction::Quit,
        KeyCode::Char('y') | KeyCode::Char('Y') => KeyAction::Confirm,
        _ => KeyAction::Other,
    }
}

/// Raw mode plus alternate screen, restored on drop
struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;

        let setup = execute!(io::stdout(), EnterAlternateScreen)
            .context("Failed to enter alternate screen")
            .and_then(|_| {
                Terminal::new(CrosstermBackend::new(io::stdout()))
                    .context("Failed to create terminal")
            });

        match setup {
            Ok(terminal) => Ok(Self { terminal }),
            Err(e) => {
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                let _ = disable_raw_mode();
                Err(e)
            }
        }
    }

    fn draw(&mut self, model: &TuiModel) -> Result<()> {
        let view = model.snapshot();
        self.terminal
            .draw(|f| render(f, &view))
            .context("Failed to draw frame")?;
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            tracing::warn!("Failed to disable raw mode: {}", e);
        }
        if let Err(e) = execute!(self.terminal.backend_mut(), LeaveAlternateScreen) {
            tracing::warn!("Failed to leave alternate screen: {}", e);
        }
        let _ = self.terminal.show_cursor();
    }
}

/// Forward key presses from a blocking reader thread
fn spawn_key_reader() -> UnboundedReceiver<KeyEvent> {
    let (tx, rx) = unbounded_channel();
    std::thread::spawn(move || {
        loop {
            match event::poll(TICK) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Failed to read terminal event: {}", e);
                        break;
                    }
                },
                Ok(false) if tx.is_closed() => break,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Failed to poll terminal events: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

type StepTask = JoinHandle<(Wizard, ContinueOutcome)>;

async fn join_step(task: &mut Option<StepTask>) -> Result<(Wizard, ContinueOutcome), JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn start_step(mut wizard: Wizard) -> StepTask {
    tokio::spawn(async move {
        let outcome = wizard.continue_step().await;
        (wizard, outcome)
    })
}

/// Run the wizard full-screen until it completes or the operator leaves.
///
/// `confirm_wipe` names the target disk when running the disk stage must
/// be confirmed first (real installs only). Once that stage has succeeded
/// the prompt is not shown again.
pub async fn run(
    wizard: Wizard,
    model: Arc<TuiModel>,
    confirm_wipe: Option<String>,
) -> Result<SessionEnd> {
    let mut session = TerminalSession::enter()?;
    let mut keys = spawn_key_reader();
    let mut ticker = tokio::time::interval(TICK);

    let mut idle = Some(wizard);
    let mut running: Option<StepTask> = None;
    let mut awaiting_confirm = false;
    let mut finished = false;

    loop {
        session.draw(&model)?;

        tokio::select! {
            _ = ticker.tick() => {}

            joined = join_step(&mut running), if running.is_some() => {
                running = None;
                let (wizard, outcome) = joined.context("Wizard task failed")?;
                idle = Some(wizard);
                match outcome {
                    ContinueOutcome::Advanced => model.set_notice(None),
                    ContinueOutcome::Failed => model.set_notice(Some(
                        "Step failed, see the output. [Enter] Retry   [b] Back   [q] Quit".to_string(),
                    )),
                    ContinueOutcome::Completed => {
                        finished = true;
                        model.set_notice(Some(
                            "Installation complete. Press any key to exit.".to_string(),
                        ));
                    }
                }
            }

            Some(key) = keys.recv() => {
                let action = map_key(key);
                if action == KeyAction::Ignored {
                    continue;
                }

                if action == KeyAction::Interrupt {
                    tracing::info!("Interrupted from the keyboard");
                    if let Some(task) = running.take() {
                        task.abort();
                    }
                    return Ok(SessionEnd::Cancelled);
                }

                if finished {
                    return Ok(SessionEnd::Completed);
                }

                let Some(wizard) = idle.as_mut() else {
                    model.set_notice(Some("Installation in progress, please wait".to_string()));
                    continue;
                };

                if awaiting_confirm {
                    awaiting_confirm = false;
                    if action == KeyAction::Confirm {
                        model.set_notice(None);
                        running = idle.take().map(start_step);
                    } else {
                        model.set_notice(Some("Disk setup not confirmed".to_string()));
                    }
                    continue;
                }

                match action {
                    KeyAction::Continue => {
                        let needs_confirm = wizard.pending_destructive();
                        match confirm_wipe.as_deref() {
                            Some(disk) if needs_confirm => {
                                awaiting_confirm = true;
                                model.set_notice(Some(format!(
                                    "This will ERASE ALL DATA on {}. Press y to proceed, any other key to cancel",
                                    disk
                                )));
                            }
                            _ => {
                                model.set_notice(None);
                                running = idle.take().map(start_step);
                            }
                        }
                    }
                    KeyAction::Back => {
                        model.set_notice(None);
                        wizard.back();
                    }
                    KeyAction::Quit => return Ok(SessionEnd::Cancelled),
                    _ => {}
                }
            }
        }
    }
}
