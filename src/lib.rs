//! GentooTUI Library
//!
//! Core of the guided Gentoo Linux installer: the stage orchestrator, the
//! command runner the stages execute tools through, the progress channel
//! and the wizard navigator, plus the terminal front ends that drive them.

pub mod cli;
pub mod command_runner;
pub mod config;
pub mod error;
pub mod logging;
pub mod navigator;
pub mod orchestrator;
pub mod presenter;
pub mod process_guard;
pub mod progress;
pub mod stage;
pub mod stages;
pub mod system;
pub mod theme;
pub mod types;
pub mod ui;
pub mod wizard;

// Re-export main types for convenience
pub use command_runner::{CommandResult, CommandRunner, CommandSpec, Runner, run_command};
pub use config::InstallConfig;
pub use error::GentooTuiError;
pub use navigator::{DisplayRefresh, Navigator, WizardState, WizardStep};
pub use orchestrator::{Orchestrator, PrerequisiteReport, PrerequisiteSettings};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use progress::{ProgressEvent, ProgressSink, ProgressStatus, StageProgress, channel_sink};
pub use stage::{Stage, StageDescriptor, StageId, StageOutcome};
pub use stages::{CommandStage, build_stages};
pub use system::{HostInspector, SystemInspector};
pub use wizard::{ContinueOutcome, Wizard};
