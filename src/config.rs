//! Installation configuration: loading, saving and validation.
//!
//! The configuration is read once at startup, validated, and then shared
//! read-only (`Arc<InstallConfig>`) with the orchestrator and every stage.
//! Nothing downstream of this module mutates it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GentooTuiError;
use crate::stages::plan::parse_size_mib;
use crate::types::{
    Bootloader, DesktopEnvironment, Filesystem, KernelConfigMethod, KernelSource, LogLevel,
    PartitionScheme,
};

/// Disk partitioning options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub target_disk: String,
    pub partition_scheme: PartitionScheme,
    pub boot_partition_size: String,
    pub swap_size: String,
    pub root_filesystem: Filesystem,
    pub encryption_enabled: bool,
    pub encryption_cipher: String,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            target_disk: "/dev/sda".to_string(),
            partition_scheme: PartitionScheme::Gpt,
            boot_partition_size: "1G".to_string(),
            swap_size: "4G".to_string(),
            root_filesystem: Filesystem::Ext4,
            encryption_enabled: false,
            encryption_cipher: "aes-xts-plain64".to_string(),
        }
    }
}

/// Stage3 tarball options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage3Config {
    pub mirror_url: String,
    pub architecture: String,
    /// hardened, systemd, musl, ...
    pub variant: String,
    pub auto_select: bool,
    pub verify_signature: bool,
}

impl Default for Stage3Config {
    fn default() -> Self {
        Self {
            mirror_url: "https://distfiles.gentoo.org".to_string(),
            architecture: "amd64".to_string(),
            variant: "hardened".to_string(),
            auto_select: true,
            verify_signature: true,
        }
    }
}

/// Portage (make.conf) options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortageConfig {
    pub make_opts: String,
    pub use_flags: Vec<String>,
    pub accept_keywords: Vec<String>,
    pub mirrors: Vec<String>,
    pub emerge_opts: String,
}

impl Default for PortageConfig {
    fn default() -> Self {
        Self {
            make_opts: "-j$(nproc)".to_string(),
            use_flags: ["bindist", "-gtk", "-qt5", "systemd"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            accept_keywords: vec!["~amd64".to_string()],
            mirrors: vec!["https://distfiles.gentoo.org".to_string()],
            emerge_opts: "--verbose".to_string(),
        }
    }
}

/// Kernel build options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub kernel_source: KernelSource,
    pub config_method: KernelConfigMethod,
    pub initramfs: bool,
    pub modules_autoload: bool,
    pub firmware_install: bool,
    /// 0 = one job per available CPU
    pub compile_jobs: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel_source: KernelSource::GentooSources,
            config_method: KernelConfigMethod::Genkernel,
            initramfs: true,
            modules_autoload: true,
            firmware_install: true,
            compile_jobs: 0,
        }
    }
}

impl KernelConfig {
    /// Effective parallel job count for `make`/`genkernel`
    pub fn effective_jobs(&self) -> u32 {
        if self.compile_jobs > 0 {
            return self.compile_jobs;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }
}

/// Bootloader options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootloaderConfig {
    pub bootloader: Bootloader,
    /// x86_64-efi, i386-pc
    pub target: String,
    pub install_location: String,
    pub timeout: u32,
    pub additional_params: Vec<String>,
}

impl Default for BootloaderConfig {
    fn default() -> Self {
        Self {
            bootloader: Bootloader::Grub,
            target: "x86_64-efi".to_string(),
            install_location: "/boot/efi".to_string(),
            timeout: 5,
            additional_params: Vec::new(),
        }
    }
}

/// Base system settings applied inside the chroot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub hostname: String,
    pub timezone: String,
    pub locale: String,
    pub keymap: String,
    pub root_password: Option<String>,
    pub create_user: bool,
    pub username: String,
    pub user_password: Option<String>,
    pub enable_ssh: bool,
    pub install_desktop: bool,
    pub desktop_environment: DesktopEnvironment,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            hostname: "gentoo".to_string(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            keymap: "us".to_string(),
            root_password: None,
            create_user: true,
            username: "user".to_string(),
            user_password: None,
            enable_ssh: false,
            install_desktop: false,
            desktop_environment: DesktopEnvironment::Xfce,
        }
    }
}

/// Network settings for the installed system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub interface: String,
    pub dhcp: bool,
    pub static_ip: Option<String>,
    pub netmask: Option<String>,
    pub gateway: Option<String>,
    pub dns_servers: Vec<String>,
    pub hostname_resolution: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "auto".to_string(),
            dhcp: true,
            static_ip: None,
            netmask: None,
            gateway: None,
            dns_servers: vec!["8.8.8.8".to_string(), "8.8.4.4".to_string()],
            hostname_resolution: true,
        }
    }
}

/// Complete installation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub dry_run: bool,
    pub verbose: bool,
    pub log_level: LogLevel,

    pub disk: DiskConfig,
    pub stage3: Stage3Config,
    pub portage: PortageConfig,
    pub kernel: KernelConfig,
    pub bootloader: BootloaderConfig,
    pub system: SystemConfig,
    pub network: NetworkConfig,

    pub mount_point: PathBuf,
    pub work_dir: PathBuf,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
            log_level: LogLevel::Info,
            disk: DiskConfig::default(),
            stage3: Stage3Config::default(),
            portage: PortageConfig::default(),
            kernel: KernelConfig::default(),
            bootloader: BootloaderConfig::default(),
            system: SystemConfig::default(),
            network: NetworkConfig::default(),
            mount_point: PathBuf::from("/mnt/gentoo"),
            work_dir: PathBuf::from("/tmp/gentooui"),
        }
    }
}

impl InstallConfig {
    /// Save configuration to a JSON file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        tracing::info!("Saving configuration to {}", path.display());

        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        fs::write(path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path))?;

        Ok(())
    }

    /// Load and validate configuration from a JSON file.
    ///
    /// An empty file yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration from {:?}", path))?;

        if content.trim().is_empty() {
            tracing::warn!("Configuration file is empty, using defaults");
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            GentooTuiError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Deep-merge a JSON object of overrides on top of this configuration.
    ///
    /// Nested objects merge key by key; any other value replaces the base
    /// value. The merged result is validated before it is returned.
    pub fn merge_overrides(&self, overrides: &serde_json::Value) -> Result<Self> {
        tracing::info!("Merging configuration overrides");

        let mut base = serde_json::to_value(self).context("Failed to serialize base config")?;
        deep_merge(&mut base, overrides);

        let merged: Self = serde_json::from_value(base).map_err(|e| {
            GentooTuiError::config(format!("Merged configuration is not well-formed: {}", e))
        })?;
        merged.validate()?;
        Ok(merged)
    }

    /// Validate values that the type system cannot express
    pub fn validate(&self) -> std::result::Result<(), GentooTuiError> {
        if self.disk.target_disk.trim().is_empty() {
            return Err(GentooTuiError::validation("Target disk must be specified"));
        }
        if !self.disk.target_disk.starts_with("/dev/") {
            return Err(GentooTuiError::validation(format!(
                "Target disk must be a device path under /dev: {}",
                self.disk.target_disk
            )));
        }

        let boot_mib = parse_size_mib(&self.disk.boot_partition_size)
            .filter(|mib| *mib > 0)
            .ok_or_else(|| {
                GentooTuiError::validation(format!(
                    "Invalid boot partition size: {:?}",
                    self.disk.boot_partition_size
                ))
            })?;
        let swap_mib = parse_size_mib(&self.disk.swap_size).ok_or_else(|| {
            GentooTuiError::validation(format!("Invalid swap size: {:?}", self.disk.swap_size))
        })?;
        if boot_mib.saturating_add(swap_mib) > MAX_LAYOUT_MIB {
            return Err(GentooTuiError::validation(format!(
                "Boot and swap partitions do not fit on any disk: {}MiB + {}MiB",
                boot_mib, swap_mib
            )));
        }

        if !validate_hostname(&self.system.hostname) {
            return Err(GentooTuiError::validation(format!(
                "Invalid hostname: {:?}",
                self.system.hostname
            )));
        }

        if self.system.create_user && self.system.username.trim().is_empty() {
            return Err(GentooTuiError::validation(
                "Username must be specified when create_user is enabled",
            ));
        }

        let mirror = &self.stage3.mirror_url;
        if !(mirror.starts_with("https://") || mirror.starts_with("http://")) {
            return Err(GentooTuiError::validation(format!(
                "Stage3 mirror must be an http(s) URL: {}",
                mirror
            )));
        }

        if self.mount_point.as_os_str().is_empty() {
            return Err(GentooTuiError::validation("Mount point must be specified"));
        }

        Ok(())
    }
}

/// Upper bound for boot plus swap, 1 EiB
const MAX_LAYOUT_MIB: u64 = 1 << 40;

/// Recursively merge `overrides` into `base`
fn deep_merge(base: &mut serde_json::Value, overrides: &serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(override_map)) => {
            for (key, value) in override_map {
                let nested =
                    value.is_object() && base_map.get(key).is_some_and(|v| v.is_object());
                if nested {
                    if let Some(existing) = base_map.get_mut(key) {
                        deep_merge(existing, value);
                    }
                } else {
                    base_map.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overrides) => *base = overrides.clone(),
    }
}

/// Check a hostname against RFC 1123 label rules
pub fn validate_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }

    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = InstallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.disk.target_disk, "/dev/sda");
        assert_eq!(config.mount_point, PathBuf::from("/mnt/gentoo"));
        assert!(!config.dry_run);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("install.json");

        let mut config = InstallConfig::default();
        config.system.hostname = "workstation".to_string();
        config.disk.root_filesystem = Filesystem::Btrfs;
        config.save_to_file(&path).unwrap();

        let loaded = InstallConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.json");
        fs::write(&path, "  \n").unwrap();

        let loaded = InstallConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, InstallConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{"disk": {"target_disk": "/dev/nvme0n1"}}"#).unwrap();

        let loaded = InstallConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.disk.target_disk, "/dev/nvme0n1");
        assert_eq!(loaded.disk.swap_size, "4G");
        assert_eq!(loaded.system.hostname, "gentoo");
    }

    #[test]
    fn test_unknown_filesystem_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"disk": {"root_filesystem": "ntfs"}}"#).unwrap();

        let err = InstallConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GentooTuiError>(),
            Some(GentooTuiError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(InstallConfig::load_from_file("/nonexistent/gentootui.json").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = InstallConfig::default();
        config.disk.target_disk = "sda".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallConfig::default();
        config.system.hostname = "-bad-".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallConfig::default();
        config.stage3.mirror_url = "ftp://example.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_sizes() {
        let mut config = InstallConfig::default();
        config.disk.swap_size = u64::MAX.to_string();
        assert!(matches!(config.validate(), Err(GentooTuiError::Validation(_))));

        let mut config = InstallConfig::default();
        config.disk.boot_partition_size = "0".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallConfig::default();
        config.disk.boot_partition_size = "512B".to_string();
        assert!(config.validate().is_err());

        let mut config = InstallConfig::default();
        config.disk.swap_size = "0".to_string();
        config.disk.boot_partition_size = "512MiB".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_overrides_is_deep() {
        let base = InstallConfig::default();
        let overrides = serde_json::json!({
            "dry_run": true,
            "system": { "hostname": "builder" }
        });

        let merged = base.merge_overrides(&overrides).unwrap();
        assert!(merged.dry_run);
        assert_eq!(merged.system.hostname, "builder");
        // Sibling keys in the same section survive
        assert_eq!(merged.system.timezone, "UTC");
    }

    #[test]
    fn test_merge_overrides_validates() {
        let overrides = serde_json::json!({ "system": { "hostname": "" } });
        assert!(InstallConfig::default().merge_overrides(&overrides).is_err());
    }

    #[test]
    fn test_hostname_rules() {
        assert!(validate_hostname("gentoo"));
        assert!(validate_hostname("build-01.example.org"));
        assert!(!validate_hostname(""));
        assert!(!validate_hostname("bad_host"));
        assert!(!validate_hostname(&"a".repeat(64)));
    }

    #[test]
    fn test_effective_jobs() {
        let mut kernel = KernelConfig::default();
        assert!(kernel.effective_jobs() >= 1);
        kernel.compile_jobs = 3;
        assert_eq!(kernel.effective_jobs(), 3);
    }
}
