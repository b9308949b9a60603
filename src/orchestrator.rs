//! Installation orchestrator.
//!
//! Owns the fixed, ordered list of stages and drives them one at a time.
//! Every started stage produces exactly one `Starting` event and exactly
//! one terminal event (`Completed`, `Failed` or `Error`). The first stage
//! that does not succeed ends the run: later stages are never attempted
//! and earlier ones are not rolled back.
//!
//! # Design Principles
//!
//! - **Fixed sequence**: stages are supplied at construction and never
//!   reordered; identifiers must be unique
//! - **Fail fast**: a failure or fault halts the run and `run_all` returns
//!   `false`; no error escapes as a panic or `Err`
//! - **Observable**: `current_stage()` can be polled from another task while
//!   a run is in flight
//! - **Advisory gate**: `validate_prerequisites()` is a separate call and is
//!   not enforced by `run_all`

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::command_runner::Runner;
use crate::config::InstallConfig;
use crate::error::{GentooTuiError, Result};
use crate::progress::{ProgressEvent, ProgressSink, SinkSlot, StageProgress};
use crate::stage::{Stage, StageId, StageOutcome};
use crate::stages;
use crate::system::{HostInspector, SystemInspector};

/// Value of `current` when no stage is executing
const IDLE: u8 = u8::MAX;

/// Settings the prerequisite gate needs from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteSettings {
    pub dry_run: bool,
    pub target_disk: PathBuf,
    pub mount_point: PathBuf,
}

impl PrerequisiteSettings {
    pub fn from_config(config: &InstallConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            target_disk: PathBuf::from(&config.disk.target_disk),
            mount_point: config.mount_point.clone(),
        }
    }
}

impl Default for PrerequisiteSettings {
    fn default() -> Self {
        Self::from_config(&InstallConfig::default())
    }
}

/// Outcome of the prerequisite gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerequisiteReport {
    /// Conditions that make a run unsafe
    pub errors: Vec<String>,
    /// Conditions the operator should know about
    pub warnings: Vec<String>,
}

impl PrerequisiteReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Sequences installation stages and reports their progress
pub struct Orchestrator {
    stages: Vec<Box<dyn Stage>>,
    sink: SinkSlot,
    current: AtomicU8,
    running: AtomicBool,
    /// Stages that succeeded in the current session
    succeeded: Mutex<HashSet<StageId>>,
    prerequisites: PrerequisiteSettings,
    inspector: Arc<dyn SystemInspector>,
}

impl Orchestrator {
    /// Create an orchestrator over `stages`, in the order given.
    ///
    /// # Errors
    ///
    /// - `Validation` if two stages share an identifier
    pub fn new(stages: Vec<Box<dyn Stage>>, prerequisites: PrerequisiteSettings) -> Result<Self> {
        let mut seen = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.id()) {
                return Err(GentooTuiError::validation(format!(
                    "Duplicate stage identifier: {}",
                    stage.id()
                )));
            }
        }

        tracing::info!("Orchestrator initialized with {} steps", stages.len());

        Ok(Self {
            stages,
            sink: SinkSlot::default(),
            current: AtomicU8::new(IDLE),
            running: AtomicBool::new(false),
            succeeded: Mutex::new(HashSet::new()),
            prerequisites,
            inspector: Arc::new(HostInspector),
        })
    }

    /// Create the standard ten-stage Gentoo installation
    pub fn from_config(config: Arc<InstallConfig>, runner: Arc<dyn Runner>) -> Result<Self> {
        let prerequisites = PrerequisiteSettings::from_config(&config);
        Self::new(stages::build_stages(config, runner), prerequisites)
    }

    /// Replace the host inspector used by the prerequisite gate
    pub fn with_inspector(mut self, inspector: Arc<dyn SystemInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Install the progress consumer. Replaces any previous one.
    pub fn register_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        self.sink.set(sink);
        tracing::debug!("Progress sink registered");
    }

    /// Stage currently executing, if any
    pub fn current_stage(&self) -> Option<StageId> {
        StageId::from_order(self.current.load(Ordering::Acquire))
    }

    /// True while `run_all` or `run_stages` is executing
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The fixed stage sequence as (identifier, name) pairs
    pub fn stages(&self) -> Vec<(StageId, &str)> {
        self.stages.iter().map(|s| (s.id(), s.name())).collect()
    }

    /// True if `id` already succeeded in this session
    pub fn has_succeeded(&self, id: StageId) -> bool {
        self.succeeded
            .lock()
            .map(|set| set.contains(&id))
            .unwrap_or_else(|poisoned| poisoned.into_inner().contains(&id))
    }

    /// Evaluate the prerequisite gate and log what it found.
    ///
    /// Root privilege and target-disk existence are skipped in dry-run
    /// mode. A non-empty mount point is only ever a warning.
    pub fn check_prerequisites(&self) -> PrerequisiteReport {
        tracing::info!("Validating installation prerequisites");

        let settings = &self.prerequisites;
        let mut report = PrerequisiteReport::default();

        if !settings.dry_run && !self.inspector.is_root() {
            report
                .errors
                .push("Installation must run as root".to_string());
        }

        if !settings.dry_run && !self.inspector.path_exists(&settings.target_disk) {
            report.errors.push(format!(
                "Target disk does not exist: {}",
                settings.target_disk.display()
            ));
        }

        if self.inspector.path_exists(&settings.mount_point)
            && !self.inspector.dir_is_empty(&settings.mount_point)
        {
            report.warnings.push(format!(
                "Mount point is not empty: {}",
                settings.mount_point.display()
            ));
        }

        for error in &report.errors {
            tracing::error!("{}", error);
        }
        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!("Prerequisites validation completed");

        report
    }

    /// Whether a run may proceed. Warnings do not block.
    pub fn validate_prerequisites(&self) -> bool {
        self.check_prerequisites().is_ok()
    }

    /// Run every stage in order, starting a fresh session.
    ///
    /// Returns `true` only if every stage succeeded. An empty sequence
    /// succeeds without emitting anything. Returns `false` without running
    /// anything if another run is already in progress.
    pub async fn run_all(&self) -> bool {
        let Some(_guard) = RunGuard::acquire(self) else {
            return false;
        };

        tracing::info!("Starting full installation");
        self.lock_succeeded().clear();

        let ok = self.run_sequence(|_| true).await;
        if ok {
            tracing::info!("Full installation completed successfully");
        }
        ok
    }

    /// Run the listed stages in sequence order with the same fail-fast
    /// semantics as `run_all`.
    ///
    /// Stages that already succeeded in this session are skipped without
    /// events. Identifiers not in the sequence are ignored.
    pub async fn run_stages(&self, ids: &[StageId]) -> bool {
        let Some(_guard) = RunGuard::acquire(self) else {
            return false;
        };

        let wanted: HashSet<StageId> = ids
            .iter()
            .copied()
            .filter(|id| !self.has_succeeded(*id))
            .collect();

        self.run_sequence(|id| wanted.contains(&id)).await
    }

    async fn run_sequence(&self, selected: impl Fn(StageId) -> bool) -> bool {
        let plan: Vec<&dyn Stage> = self
            .stages
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| selected(s.id()))
            .collect();
        let total = plan.len();

        for (i, stage) in plan.into_iter().enumerate() {
            let descriptor = stage.descriptor().clone();
            self.current.store(descriptor.id.order(), Ordering::Release);
            tracing::info!("Starting step {}/{}: {}", i + 1, total, descriptor.name);

            let progress = StageProgress::new(descriptor.clone(), self.sink.clone());
            progress.emit(ProgressEvent::starting(&descriptor));

            let outcome = StageOutcome::from_run(&descriptor.name, stage.run(&progress).await);

            match outcome {
                StageOutcome::Success => {
                    self.lock_succeeded().insert(descriptor.id);
                    progress.emit(ProgressEvent::completed(&descriptor));
                }
                StageOutcome::Failure(msg) => {
                    tracing::error!("{}", msg);
                    progress.emit(ProgressEvent::failed(&descriptor, msg));
                    return false;
                }
                StageOutcome::Fault(msg) => {
                    tracing::error!("{}", msg);
                    progress.emit(ProgressEvent::errored(&descriptor, msg));
                    return false;
                }
            }
        }

        true
    }

    fn lock_succeeded(&self) -> std::sync::MutexGuard<'_, HashSet<StageId>> {
        self.succeeded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.stages())
            .field("current", &self.current_stage())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Marks a run as active; clears the running flag and current stage on drop
struct RunGuard<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> RunGuard<'a> {
    fn acquire(orchestrator: &'a Orchestrator) -> Option<Self> {
        if orchestrator
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Installation run already in progress, refusing to start another");
            return None;
        }
        Some(Self { orchestrator })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.current.store(IDLE, Ordering::Release);
        self.orchestrator.running.store(false, Ordering::Release);
    }
}
