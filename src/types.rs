//! Type-safe configuration types for GentooTUI
//!
//! Option values with a fixed set of choices are enums rather than strings,
//! so an unsupported filesystem or bootloader is rejected while the config
//! is parsed instead of halfway through an installation.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Partition table type written to the target disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PartitionScheme {
    #[default]
    Gpt,
    Mbr,
}

impl PartitionScheme {
    /// Label name understood by `parted mklabel`
    pub fn parted_label(self) -> &'static str {
        match self {
            Self::Gpt => "gpt",
            Self::Mbr => "msdos",
        }
    }
}

/// Filesystem type for the root partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    #[default]
    Ext4,
    Xfs,
    Btrfs,
}

impl Filesystem {
    /// The mkfs helper that creates this filesystem
    pub fn mkfs_command(self) -> &'static str {
        match self {
            Self::Ext4 => "mkfs.ext4",
            Self::Xfs => "mkfs.xfs",
            Self::Btrfs => "mkfs.btrfs",
        }
    }
}

/// Kernel source package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum KernelSource {
    #[default]
    GentooSources,
    VanillaSources,
}

impl KernelSource {
    /// Portage atom for the sources package
    pub fn atom(self) -> &'static str {
        match self {
            Self::GentooSources => "sys-kernel/gentoo-sources",
            Self::VanillaSources => "sys-kernel/vanilla-sources",
        }
    }
}

/// How the kernel configuration is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KernelConfigMethod {
    /// genkernel builds config, kernel and initramfs in one go
    #[default]
    Genkernel,
    /// Start from `make defconfig`
    Manual,
    /// Reuse the running kernel's configuration
    Distribution,
}

/// Bootloader selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Bootloader {
    #[default]
    Grub,
    SystemdBoot,
    Lilo,
}

/// Desktop environment installed during finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DesktopEnvironment {
    #[default]
    Xfce,
    Kde,
    Gnome,
}

impl DesktopEnvironment {
    /// Portage atom for the desktop meta package
    pub fn atom(self) -> &'static str {
        match self {
            Self::Xfce => "xfce-base/xfce4-meta",
            Self::Kde => "kde-plasma/plasma-meta",
            Self::Gnome => "gnome-base/gnome",
        }
    }
}

/// Console log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

/// Firmware the live system booted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BootMode {
    #[strum(serialize = "UEFI")]
    Uefi,
    #[strum(serialize = "BIOS")]
    Bios,
}
