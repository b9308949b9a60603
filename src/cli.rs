use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::types::LogLevel;

/// GentooTUI - A guided, step-by-step Gentoo Linux installer
#[derive(Parser, Debug)]
#[command(name = "gentootui")]
#[command(about = "A guided, step-by-step installer for Gentoo Linux")]
#[command(version)]
pub struct Cli {
    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Console log level (DEBUG, INFO, WARNING, ERROR)
    #[arg(short, long, global = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// File that receives a DEBUG-level copy of the log
    #[arg(long, global = true, default_value = crate::logging::DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Dry-run mode: log every command instead of executing it.
    ///
    /// No partitions, filesystems or files on the target are touched.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Skip the host compatibility check at startup
    #[arg(long, global = true)]
    pub skip_checks: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the installation wizard (default)
    Install {
        /// Continue through every step without prompting
        #[arg(long)]
        unattended: bool,

        /// Line-oriented prompts instead of the full-screen interface
        #[arg(long)]
        plain: bool,
    },
    /// Validate the configuration and report prerequisites
    Validate,
    /// List the installation stages in order
    Steps,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The subcommand to run, `install` if none was given
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or(Commands::Install {
                unattended: false,
                plain: false,
            })
    }
}
