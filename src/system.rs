//! Host inspection: privilege, path and tool checks.
//!
//! The orchestrator's prerequisite gate and the startup compatibility check
//! only ever ask yes/no questions about the host. They ask them through the
//! [`SystemInspector`] trait so tests can answer with a fake.

use std::path::{Path, PathBuf};

use crate::types::BootMode;

/// Tools the installation stages cannot work without
pub const REQUIRED_TOOLS: &[&str] = &["fdisk", "mkfs.ext4", "mount", "wget", "tar", "chroot"];

/// Architectures stage3 tarballs are published for
const SUPPORTED_ARCHITECTURES: &[&str] = &["x86_64", "amd64", "i686", "arm64", "aarch64"];

/// Yes/no questions about the host
pub trait SystemInspector: Send + Sync {
    /// Effective UID is 0
    fn is_root(&self) -> bool;

    fn path_exists(&self, path: &Path) -> bool;

    /// True if `path` has no entries. A missing directory counts as empty.
    fn dir_is_empty(&self, path: &Path) -> bool;

    /// True if `name` resolves to an executable on PATH
    fn command_available(&self, name: &str) -> bool;
}

/// Inspector backed by the live system
#[derive(Debug, Clone, Copy, Default)]
pub struct HostInspector;

impl SystemInspector for HostInspector {
    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn dir_is_empty(&self, path: &Path) -> bool {
        match std::fs::read_dir(path) {
            Ok(mut entries) => entries.next().is_none(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", path.display(), e);
                false
            }
        }
    }

    fn command_available(&self, name: &str) -> bool {
        find_in_path(name).is_some()
    }
}

/// Resolve `name` against PATH the way a shell would
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let is_executable = |candidate: &Path| {
        candidate
            .metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if name.contains('/') {
        let candidate = PathBuf::from(name);
        return is_executable(&candidate).then_some(candidate);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

/// Result of the startup compatibility check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompatibilityReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub missing_tools: Vec<String>,
}

impl CompatibilityReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check whether this host can run an installation at all
pub fn check_system_compatibility(inspector: &dyn SystemInspector) -> CompatibilityReport {
    check_compatibility_for(std::env::consts::OS, std::env::consts::ARCH, inspector)
}

fn check_compatibility_for(
    os: &str,
    arch: &str,
    inspector: &dyn SystemInspector,
) -> CompatibilityReport {
    let mut report = CompatibilityReport::default();

    if os != "linux" {
        report.errors.push(format!("System is not Linux-based ({})", os));
        return report;
    }

    if !SUPPORTED_ARCHITECTURES.contains(&arch) {
        report
            .warnings
            .push(format!("Architecture {} may not be fully supported", arch));
    }

    report.missing_tools = REQUIRED_TOOLS
        .iter()
        .filter(|tool| !inspector.command_available(tool))
        .map(|tool| tool.to_string())
        .collect();

    if !report.missing_tools.is_empty() {
        report.errors.push(format!(
            "Missing required tools: {}",
            report.missing_tools.join(", ")
        ));
    }

    for warning in &report.warnings {
        tracing::warn!("{}", warning);
    }
    for error in &report.errors {
        tracing::error!("{}", error);
    }

    report
}

/// UEFI if the kernel exposes EFI variables, BIOS otherwise
pub fn detect_boot_mode() -> BootMode {
    if Path::new("/sys/firmware/efi").exists() {
        BootMode::Uefi
    } else {
        BootMode::Bios
    }
}
