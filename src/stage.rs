//! Installation stages: identifiers and the contract every stage implements.
//!
//! # Stage Flow
//!
//! ```text
//! DiskSetup -> Stage3Download -> Stage3Extract -> PortageSetup
//!   -> SystemConfig -> KernelInstall -> KernelConfig -> KernelCompile
//!   -> BootloaderInstall -> Finalization
//! ```
//!
//! Order matters: each stage relies on the filesystem and package state
//! the previous one left behind (mounted partitions, unpacked stage3,
//! a configured Portage tree).

use async_trait::async_trait;
use strum::{EnumIter, IntoEnumIterator};

use crate::progress::StageProgress;

/// Stable identifier of one installation stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
#[repr(u8)]
pub enum StageId {
    DiskSetup = 0,
    Stage3Download = 1,
    Stage3Extract = 2,
    PortageSetup = 3,
    SystemConfig = 4,
    KernelInstall = 5,
    KernelConfig = 6,
    KernelCompile = 7,
    BootloaderInstall = 8,
    Finalization = 9,
}

impl StageId {
    /// Position in the installation sequence
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Inverse of [`StageId::order`]
    pub fn from_order(order: u8) -> Option<Self> {
        Self::iter().find(|id| id.order() == order)
    }

    /// Machine-friendly key, stable across releases
    pub const fn key(self) -> &'static str {
        match self {
            Self::DiskSetup => "disk_setup",
            Self::Stage3Download => "stage3_download",
            Self::Stage3Extract => "stage3_extract",
            Self::PortageSetup => "portage_setup",
            Self::SystemConfig => "system_config",
            Self::KernelInstall => "kernel_install",
            Self::KernelConfig => "kernel_config",
            Self::KernelCompile => "kernel_compile",
            Self::BootloaderInstall => "bootloader_install",
            Self::Finalization => "finalization",
        }
    }

    /// Human-readable name shown next to progress
    pub const fn name(self) -> &'static str {
        match self {
            Self::DiskSetup => "Setting up disk partitions",
            Self::Stage3Download => "Downloading Stage3",
            Self::Stage3Extract => "Extracting Stage3",
            Self::PortageSetup => "Configuring Portage",
            Self::SystemConfig => "System configuration",
            Self::KernelInstall => "Installing kernel sources",
            Self::KernelConfig => "Configuring kernel",
            Self::KernelCompile => "Compiling kernel",
            Self::BootloaderInstall => "Installing bootloader",
            Self::Finalization => "Finalizing installation",
        }
    }

    /// Returns true if this stage destroys data on the target disk
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::DiskSetup)
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Identity of a stage: what the orchestrator reports in every event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub id: StageId,
    pub name: String,
}

impl StageDescriptor {
    pub fn new(id: StageId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl From<StageId> for StageDescriptor {
    fn from(id: StageId) -> Self {
        Self::new(id, id.name())
    }
}

/// One unit of installation work.
///
/// `run` returns `Ok(true)` when the stage reached its goal and `Ok(false)`
/// when it determined that it did not (a tool exited non-zero, a check
/// failed). `Err` is reserved for unexpected faults. The orchestrator halts
/// the run on either of the last two.
#[async_trait]
pub trait Stage: Send + Sync {
    fn descriptor(&self) -> &StageDescriptor;

    async fn run(&self, progress: &StageProgress) -> anyhow::Result<bool>;

    fn id(&self) -> StageId {
        self.descriptor().id
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// How a single stage invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    /// The stage reported that it did not achieve its goal
    Failure(String),
    /// The stage raised an unexpected error
    Fault(String),
}

impl StageOutcome {
    /// Fold the result of [`Stage::run`] into an outcome
    pub fn from_run(name: &str, result: anyhow::Result<bool>) -> Self {
        match result {
            Ok(true) => Self::Success,
            Ok(false) => Self::Failure(format!("Step failed: {}", name)),
            Err(e) => Self::Fault(format!("Exception in step {}: {:#}", name, e)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure(msg) | Self::Fault(msg) => Some(msg),
        }
    }
}
