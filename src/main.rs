//! GentooTUI - Main entry point
//!
//! Parses the command line, sets up logging and process cleanup, loads the
//! configuration and hands control to the installation wizard, full-screen
//! when stdout is a terminal.

use anyhow::Result;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, error, info, warn};

use gentootui::cli::{Cli, Commands};
use gentootui::command_runner::{CommandRunner, Runner};
use gentootui::config::InstallConfig;
use gentootui::navigator::WizardStep;
use gentootui::orchestrator::Orchestrator;
use gentootui::presenter::ConsolePresenter;
use gentootui::process_guard::{self, EXIT_CANCELLED, ProcessGuard};
use gentootui::logging;
use gentootui::system::{HostInspector, check_system_compatibility, detect_boot_mode};
use gentootui::ui::{self, TuiModel, app::SessionEnd};
use gentootui::wizard::{COMPLETION_MESSAGE, ContinueOutcome, Wizard};

/// How `install` talks to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frontend {
    FullScreen,
    Plain,
    Unattended,
}

impl Frontend {
    fn select(cli: &Cli) -> Option<Self> {
        match cli.command() {
            Commands::Install { unattended: true, .. } => Some(Self::Unattended),
            Commands::Install { plain: true, .. } => Some(Self::Plain),
            Commands::Install { .. } if std::io::stdout().is_terminal() => Some(Self::FullScreen),
            Commands::Install { .. } => Some(Self::Plain),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    let frontend = Frontend::select(&cli);

    let console = frontend != Some(Frontend::FullScreen);
    if let Err(e) = logging::init_logging(cli.log_level, Some(&cli.log_file), console) {
        eprintln!("Warning: {:#}", e);
    }
    info!("Starting GentooTUI application");

    // Child process groups are torn down on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    match run(&cli, frontend).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("\nFatal error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: &Cli, frontend: Option<Frontend>) -> Result<ExitCode> {
    let config = Arc::new(load_config(cli)?);

    match cli.command() {
        Commands::Steps => {
            print_steps();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate => validate(config),
        Commands::Install { .. } => {
            install(cli, config, frontend.unwrap_or(Frontend::Plain)).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<InstallConfig> {
    let mut config = match &cli.config {
        Some(path) => InstallConfig::load_from_file(path)?,
        None => {
            info!("Using default configuration");
            InstallConfig::default()
        }
    };
    if cli.dry_run {
        config.dry_run = true;
    }
    config.validate()?;
    debug!("Effective configuration: {:?}", config);
    Ok(config)
}

fn print_banner(config: &InstallConfig) {
    println!("GentooTUI v{}", env!("CARGO_PKG_VERSION"));
    println!("Guided installer for Gentoo Linux");
    println!();
    println!("  Target disk:  {}", config.disk.target_disk);
    println!("  Mount point:  {}", config.mount_point.display());
    println!("  Boot mode:    {}", detect_boot_mode());
    if config.dry_run {
        println!();
        println!("Running in DRY-RUN mode - no actual changes will be made");
    }
}

fn print_steps() {
    for (i, step) in <WizardStep as strum::IntoEnumIterator>::iter().enumerate() {
        println!("{}. {}", i + 1, step.title());
        for stage in step.stages() {
            println!("     {:<20} {}", stage.key(), stage.name());
        }
    }
}

fn validate(config: Arc<InstallConfig>) -> Result<ExitCode> {
    println!("Configuration is valid");

    let orchestrator = Orchestrator::from_config(config, Arc::new(CommandRunner::dry_run()))?;
    let report = orchestrator.check_prerequisites();
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    for error in &report.errors {
        println!("  error: {}", error);
    }

    if report.is_ok() {
        println!("Prerequisites satisfied");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

async fn install(cli: &Cli, config: Arc<InstallConfig>, frontend: Frontend) -> Result<ExitCode> {
    print_banner(&config);

    if cli.skip_checks {
        warn!("Skipping host compatibility checks");
    } else {
        let report = check_system_compatibility(&HostInspector);
        for warning in &report.warnings {
            println!("Warning: {}", warning);
        }
        if !report.is_ok() {
            for error in &report.errors {
                eprintln!("Error: {}", error);
            }
            eprintln!("System not compatible with Gentoo installation (use --skip-checks to override)");
            return Ok(ExitCode::from(1));
        }
    }

    let runner: Arc<dyn Runner> = if config.dry_run {
        Arc::new(CommandRunner::dry_run())
    } else {
        Arc::new(CommandRunner::new())
    };
    let orchestrator = Arc::new(Orchestrator::from_config(Arc::clone(&config), runner)?);

    let report = orchestrator.check_prerequisites();
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    if !report.is_ok() {
        for error in &report.errors {
            eprintln!("Error: {}", error);
        }
        return Ok(ExitCode::from(1));
    }

    if frontend == Frontend::FullScreen {
        return full_screen(orchestrator, &config).await;
    }

    let presenter = Arc::new(ConsolePresenter::stdout());
    orchestrator.register_progress_sink(presenter.progress_sink());
    let mut wizard = Wizard::new(orchestrator, presenter, config.dry_run);

    if frontend == Frontend::Unattended {
        return Ok(if wizard.run_to_completion().await {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(1)
        });
    }

    interactive(&mut wizard, &config).await
}

async fn full_screen(orchestrator: Arc<Orchestrator>, config: &InstallConfig) -> Result<ExitCode> {
    let model = Arc::new(TuiModel::new(config.dry_run));
    orchestrator.register_progress_sink(model.progress_sink());
    let wizard = Wizard::new(orchestrator, Arc::clone(&model) as _, config.dry_run);

    let confirm_wipe = (!config.dry_run).then(|| config.disk.target_disk.clone());
    match ui::app::run(wizard, model, confirm_wipe).await? {
        SessionEnd::Completed => {
            println!("{}", COMPLETION_MESSAGE);
            Ok(ExitCode::SUCCESS)
        }
        SessionEnd::Cancelled => Ok(cancelled()),
    }
}

/// Drive the wizard from stdin: Enter continues, `b` goes back, `q` quits
async fn interactive(wizard: &mut Wizard, config: &InstallConfig) -> Result<ExitCode> {
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("[Enter] continue   [b] back   [q] quit");
        let Some(line) = input.next_line().await? else {
            info!("Input closed, leaving installer");
            return Ok(cancelled());
        };

        match line.trim() {
            "" | "c" => {}
            "b" => {
                wizard.back();
                continue;
            }
            "q" => return Ok(cancelled()),
            other => {
                println!("Unknown choice: {}", other);
                continue;
            }
        }

        if wizard.pending_destructive()
            && !config.dry_run
            && !confirm_disk_wipe(&mut input, &config.disk.target_disk).await?
        {
            println!("Disk setup not confirmed");
            continue;
        }

        match wizard.continue_step().await {
            ContinueOutcome::Advanced => {}
            ContinueOutcome::Completed => {
                println!("{}", COMPLETION_MESSAGE);
                return Ok(ExitCode::SUCCESS);
            }
            ContinueOutcome::Failed => {
                println!("Step failed, see the log for details. Continue to retry.");
            }
        }
    }
}

async fn confirm_disk_wipe(input: &mut Lines<BufReader<Stdin>>, disk: &str) -> Result<bool> {
    println!("This will ERASE ALL DATA on {}. Type 'yes' to proceed:", disk);
    Ok(input
        .next_line()
        .await?
        .is_some_and(|answer| answer.trim() == "yes"))
}

fn cancelled() -> ExitCode {
    println!("Installation cancelled by user");
    ExitCode::from(EXIT_CANCELLED as u8)
}
