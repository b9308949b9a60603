//! Concrete installation stages.
//!
//! Every stage of the Gentoo installation is a [`CommandStage`]: a plan
//! from [`plan`] executed step by step through a [`Runner`]. The first
//! command that exits non-zero ends the stage with `Ok(false)`; failing to
//! write a file into the new system is a fault (`Err`).

pub mod plan;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use strum::IntoEnumIterator;

use crate::command_runner::Runner;
use crate::config::InstallConfig;
use crate::progress::StageProgress;
use crate::stage::{Stage, StageDescriptor, StageId};

pub use plan::{Action, DiskLayout, PlannedStep, Planner};

/// A stage driven by a command plan
pub struct CommandStage {
    descriptor: StageDescriptor,
    config: Arc<InstallConfig>,
    runner: Arc<dyn Runner>,
    planner: Planner,
}

impl CommandStage {
    pub fn new(id: StageId, config: Arc<InstallConfig>, runner: Arc<dyn Runner>) -> Self {
        Self {
            descriptor: id.into(),
            config,
            runner,
            planner: plan::planner_for(id),
        }
    }

    /// The steps this stage would perform with the current configuration
    pub fn plan(&self) -> Result<Vec<PlannedStep>> {
        (self.planner)(&self.config)
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<()> {
        if self.config.dry_run {
            tracing::info!("[dry-run] would write {} ({} bytes)", path.display(), contents.len());
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        tokio::fs::write(path, contents)
            .await
            .with_context(|| format!("Failed to write {:?}", path))?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, progress: &StageProgress) -> Result<bool> {
        let name = &self.descriptor.name;
        tracing::info!("Running {}", name);

        let steps = self
            .plan()
            .with_context(|| format!("Failed to plan {}", name))?;

        for step in steps {
            progress.report(step.fraction, step.label.as_str());

            for action in &step.actions {
                match action {
                    Action::Run(spec) => {
                        let result = self.runner.run(spec).await;
                        if !result.success() {
                            tracing::error!(
                                "Command failed with status {}: {}",
                                result.status,
                                spec.display()
                            );
                            if !result.stderr.trim().is_empty() {
                                tracing::error!("{}", result.stderr.trim());
                            }
                            return Ok(false);
                        }
                    }
                    Action::WriteFile { path, contents } => {
                        self.write_file(path, contents).await?;
                    }
                }
            }
        }

        tracing::info!("{} completed successfully", name);
        Ok(true)
    }
}

/// The ten installation stages in order
pub fn build_stages(config: Arc<InstallConfig>, runner: Arc<dyn Runner>) -> Vec<Box<dyn Stage>> {
    StageId::iter()
        .map(|id| {
            Box::new(CommandStage::new(id, Arc::clone(&config), Arc::clone(&runner)))
                as Box<dyn Stage>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{CommandResult, CommandSpec};
    use crate::progress::{ProgressEvent, SinkSlot};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every command; fails the first one whose argv contains `fail_on`
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        async fn run(&self, spec: &CommandSpec) -> CommandResult {
            self.calls.lock().unwrap().push(spec.display());
            match self.fail_on {
                Some(needle) if spec.argv().iter().any(|a| a == needle) => CommandResult {
                    status: 1,
                    stdout: String::new(),
                    stderr: "simulated failure".to_string(),
                },
                _ => CommandResult {
                    status: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                },
            }
        }
    }

    fn progress_for(id: StageId) -> (StageProgress, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let slot = SinkSlot::default();
        slot.set(Arc::new(move |e: ProgressEvent| captured.lock().unwrap().push(e)));
        (StageProgress::new(id.into(), slot), events)
    }

    fn dry_config() -> Arc<InstallConfig> {
        Arc::new(InstallConfig {
            dry_run: true,
            ..InstallConfig::default()
        })
    }

    #[test]
    fn test_build_stages_in_order() {
        let stages = build_stages(dry_config(), Arc::new(RecordingRunner::default()));
        let ids: Vec<StageId> = stages.iter().map(|s| s.id()).collect();
        assert_eq!(ids, StageId::iter().collect::<Vec<_>>());
        assert_eq!(stages[4].name(), "System configuration");
    }

    #[tokio::test]
    async fn test_disk_stage_reports_each_step() {
        let runner = Arc::new(RecordingRunner::default());
        let stage = CommandStage::new(StageId::DiskSetup, dry_config(), runner.clone());
        let (progress, events) = progress_for(StageId::DiskSetup);

        assert!(stage.run(&progress).await.unwrap());

        let fractions: Vec<f64> = events.lock().unwrap().iter().map(|e| e.progress).collect();
        assert_eq!(fractions, vec![0.1, 0.3, 0.6, 0.9]);
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls[0], "parted --script /dev/sda mklabel gpt");
    }

    #[tokio::test]
    async fn test_failed_command_stops_stage() {
        let runner = Arc::new(RecordingRunner {
            fail_on: Some("mkswap"),
            ..Default::default()
        });
        let stage = CommandStage::new(StageId::DiskSetup, dry_config(), runner.clone());
        let (progress, events) = progress_for(StageId::DiskSetup);

        assert!(!stage.run(&progress).await.unwrap());

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.last().map(String::as_str), Some("mkswap /dev/sda2"));
        assert!(!calls.iter().any(|c| c.starts_with("mount")));
        // Formatting was the last step reported
        assert_eq!(events.lock().unwrap().last().unwrap().progress, 0.6);
    }

    #[tokio::test]
    async fn test_plan_error_is_fault() {
        let mut config = InstallConfig::default();
        config.disk.swap_size = "lots".to_string();
        let stage = CommandStage::new(
            StageId::DiskSetup,
            Arc::new(config),
            Arc::new(RecordingRunner::default()),
        );
        let (progress, events) = progress_for(StageId::DiskSetup);

        let err = stage.run(&progress).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid swap size"));
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_swap_is_fault_before_any_command() {
        let mut config = InstallConfig::default();
        config.disk.swap_size = u64::MAX.to_string();
        let runner = Arc::new(RecordingRunner::default());
        let stage = CommandStage::new(StageId::DiskSetup, Arc::new(config), runner.clone());
        let (progress, _events) = progress_for(StageId::DiskSetup);

        let err = stage.run(&progress).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Swap size is too large"));
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_files_written_below_mount_point() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(InstallConfig {
            mount_point: dir.path().to_path_buf(),
            ..InstallConfig::default()
        });
        let stage = CommandStage::new(
            StageId::PortageSetup,
            config,
            Arc::new(RecordingRunner::default()),
        );
        let (progress, _) = progress_for(StageId::PortageSetup);

        assert!(stage.run(&progress).await.unwrap());

        let make_conf = std::fs::read_to_string(dir.path().join("etc/portage/make.conf")).unwrap();
        assert!(make_conf.contains("GENTOO_MIRRORS=\"https://distfiles.gentoo.org\""));
    }

    #[tokio::test]
    async fn test_dry_run_skips_file_writes() {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(InstallConfig {
            dry_run: true,
            mount_point: dir.path().to_path_buf(),
            ..InstallConfig::default()
        });
        let stage = CommandStage::new(
            StageId::SystemConfig,
            config,
            Arc::new(RecordingRunner::default()),
        );
        let (progress, _) = progress_for(StageId::SystemConfig);

        assert!(stage.run(&progress).await.unwrap());
        assert!(!dir.path().join("etc").exists());
    }
}
