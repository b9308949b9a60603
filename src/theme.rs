//! Colors and styles for the full-screen front end
//!
//! Every color the UI uses is defined here rather than hardcoded in the
//! rendering code.

use ratatui::style::{Color, Modifier, Style};

// =============================================================================
// COLOR PALETTE
// =============================================================================

pub struct Colors;

impl Colors {
    /// Default foreground text color
    pub const FG_PRIMARY: Color = Color::White;

    /// Secondary/muted text color
    pub const FG_SECONDARY: Color = Color::Gray;

    /// Steps not reached yet
    pub const FG_MUTED: Color = Color::DarkGray;

    /// Borders and titles. Gentoo purple.
    pub const PRIMARY: Color = Color::Rgb(84, 72, 122);

    /// The step the wizard is on
    pub const SECONDARY: Color = Color::Yellow;

    pub const SUCCESS: Color = Color::Green;

    pub const ERROR: Color = Color::Red;

    /// Dry-run banner
    pub const WARNING: Color = Color::Rgb(255, 165, 0);

    /// Progress gauge while a stage runs
    pub const INFO: Color = Color::Cyan;
}

// =============================================================================
// PRE-BUILT STYLES
// =============================================================================

pub struct Styles;

impl Styles {
    pub fn title() -> Style {
        Style::default()
            .fg(Colors::PRIMARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn current_step() -> Style {
        Style::default()
            .fg(Colors::SECONDARY)
            .add_modifier(Modifier::BOLD)
    }

    pub fn done() -> Style {
        Style::default().fg(Colors::SUCCESS)
    }

    pub fn failed() -> Style {
        Style::default().fg(Colors::ERROR).add_modifier(Modifier::BOLD)
    }

    pub fn pending() -> Style {
        Style::default().fg(Colors::FG_MUTED)
    }

    pub fn text() -> Style {
        Style::default().fg(Colors::FG_PRIMARY)
    }

    pub fn hint() -> Style {
        Style::default().fg(Colors::FG_SECONDARY)
    }

    pub fn dry_run() -> Style {
        Style::default()
            .fg(Colors::WARNING)
            .add_modifier(Modifier::BOLD)
    }
}
