//! Stage plans.
//!
//! Translates an [`InstallConfig`] into the ordered list of steps each stage
//! performs. Each step carries the progress fraction and status label
//! reported when it starts, plus the commands and file writes it consists of.
//!
//! # Design
//!
//! - **Pure logic**: planning performs no I/O; `CommandStage` executes plans
//! - **Chroot-relative**: anything touching the new system runs via
//!   `chroot <mount_point>` or writes below the mount point
//! - **Secrets out of argv**: passwords travel in the environment so they
//!   never appear in logs or progress details

use anyhow::{Context, Result, anyhow, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::command_runner::CommandSpec;
use crate::config::InstallConfig;
use crate::stage::StageId;
use crate::types::{Bootloader, Filesystem, KernelConfigMethod, PartitionScheme};

/// Upper bound for any single download
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Name of the downloaded tarball inside the work directory
pub const STAGE3_TARBALL: &str = "stage3.tar.xz";

/// Signed pointer file naming the newest stage3 build
const STAGE3_POINTER: &str = "latest-stage3.txt";

/// Kernel source tree inside the new system
const KERNEL_TREE: &str = "/usr/src/linux";

const FETCH_STAGE3_SCRIPT: &str = r#"set -e
path=$(awk '/\.tar\.xz/ {print $1; exit}' latest-stage3.txt)
test -n "$path"
wget -q -O stage3.tar.xz "$STAGE3_BASE/$path"
echo "$path" > stage3.path
"#;

const VERIFY_STAGE3_SCRIPT: &str = r#"set -e
path=$(cat stage3.path)
wget -q -O stage3.tar.xz.asc "$STAGE3_BASE/$path.asc"
gpg --verify stage3.tar.xz.asc stage3.tar.xz
"#;

/// One unit of work inside a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(CommandSpec),
    WriteFile { path: PathBuf, contents: String },
}

impl Action {
    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::Run(spec) => spec.display(),
            Self::WriteFile { path, .. } => format!("write {}", path.display()),
        }
    }
}

/// A labelled group of actions reported as one progress update
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub fraction: f64,
    pub label: String,
    pub actions: Vec<Action>,
}

impl PlannedStep {
    fn new(fraction: f64, label: impl Into<String>) -> Self {
        Self {
            fraction,
            label: label.into(),
            actions: Vec::new(),
        }
    }

    fn run(mut self, spec: CommandSpec) -> Self {
        self.actions.push(Action::Run(spec));
        self
    }

    fn write(mut self, path: PathBuf, contents: impl Into<String>) -> Self {
        self.actions.push(Action::WriteFile {
            path,
            contents: contents.into(),
        });
        self
    }
}

/// Builds the plan for one stage from the configuration
pub type Planner = fn(&InstallConfig) -> Result<Vec<PlannedStep>>;

/// The planner for a stage identifier
pub fn planner_for(id: StageId) -> Planner {
    match id {
        StageId::DiskSetup => disk_setup,
        StageId::Stage3Download => stage3_download,
        StageId::Stage3Extract => stage3_extract,
        StageId::PortageSetup => portage_setup,
        StageId::SystemConfig => system_config,
        StageId::KernelInstall => kernel_install,
        StageId::KernelConfig => kernel_config,
        StageId::KernelCompile => kernel_compile,
        StageId::BootloaderInstall => bootloader_install,
        StageId::Finalization => finalization,
    }
}

// ============================================================================
// Disk layout
// ============================================================================

/// Partition devices produced by the disk stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskLayout {
    pub boot: String,
    pub swap: Option<String>,
    pub root: String,
    /// Where the boot partition is mounted inside the new system
    pub boot_mount: String,
    boot_mib: u64,
    swap_mib: u64,
}

impl DiskLayout {
    pub fn from_config(config: &InstallConfig) -> Result<Self> {
        let disk = &config.disk;
        let boot_mib = parse_size_mib(&disk.boot_partition_size)
            .filter(|mib| *mib > 0)
            .ok_or_else(|| anyhow!("Invalid boot partition size: {:?}", disk.boot_partition_size))?;
        let swap_mib = parse_size_mib(&disk.swap_size)
            .ok_or_else(|| anyhow!("Invalid swap size: {:?}", disk.swap_size))?;

        let boot_mount = match disk.partition_scheme {
            PartitionScheme::Gpt => config.bootloader.install_location.clone(),
            PartitionScheme::Mbr => "/boot".to_string(),
        };

        let swap = (swap_mib > 0).then(|| partition_path(&disk.target_disk, 2));
        let root_number = if swap.is_some() { 3 } else { 2 };

        Ok(Self {
            boot: partition_path(&disk.target_disk, 1),
            swap,
            root: partition_path(&disk.target_disk, root_number),
            boot_mount,
            boot_mib,
            swap_mib,
        })
    }

    fn boot_filesystem(scheme: PartitionScheme) -> &'static str {
        match scheme {
            PartitionScheme::Gpt => "vfat",
            PartitionScheme::Mbr => "ext4",
        }
    }
}

/// Generate a partition device path from a disk path and partition number.
///
/// Handles both `/dev/sdX` → `/dev/sdX1` and `/dev/nvme0n1` → `/dev/nvme0n1p1`.
pub fn partition_path(disk: &str, number: u32) -> String {
    // NVMe, mmcblk and loop devices use a 'p' separator
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, number)
    } else {
        format!("{}{}", disk, number)
    }
}

/// Parse a size like `512M`, `1G` or `2GiB` into MiB. A bare number is MiB.
pub fn parse_size_mib(size: &str) -> Option<u64> {
    let size = size.trim();
    let split = size
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(size.len());
    let (digits, unit) = size.split_at(split);
    let value: u64 = digits.parse().ok()?;

    match unit.trim().to_ascii_uppercase().as_str() {
        "" | "M" | "MB" | "MIB" => Some(value),
        "K" | "KB" | "KIB" => Some(value / 1024),
        "G" | "GB" | "GIB" => value.checked_mul(1024),
        "T" | "TB" | "TIB" => value.checked_mul(1024 * 1024),
        _ => None,
    }
}

fn mkfs(fs: Filesystem, device: &str) -> CommandSpec {
    let force = match fs {
        Filesystem::Ext4 => "-F",
        Filesystem::Xfs | Filesystem::Btrfs => "-f",
    };
    CommandSpec::new([fs.mkfs_command(), force, device])
}

fn parted(disk: &str, args: &[&str]) -> CommandSpec {
    let mut argv = vec!["parted", "--script", disk];
    argv.extend_from_slice(args);
    CommandSpec::new(argv)
}

fn disk_setup(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let disk = &config.disk;
    if disk.encryption_enabled {
        bail!("Encrypted root is not supported by the automatic disk layout");
    }

    let layout = DiskLayout::from_config(config)?;
    let target = disk.target_disk.as_str();
    let scheme = disk.partition_scheme;
    let parted = |args: &[&str]| parted(target, args);
    let part_name = |gpt_name: &'static str| match scheme {
        PartitionScheme::Gpt => gpt_name,
        PartitionScheme::Mbr => "primary",
    };

    let table = PlannedStep::new(0.1, "Creating partition table...")
        .run(parted(&["mklabel", scheme.parted_label()]));

    let boot_end = layout
        .boot_mib
        .checked_add(1)
        .ok_or_else(|| anyhow!("Boot partition size is too large: {}MiB", layout.boot_mib))?;
    let boot_hint = match scheme {
        PartitionScheme::Gpt => "fat32",
        PartitionScheme::Mbr => "ext4",
    };
    let mut partitions = PlannedStep::new(0.3, "Creating partitions...").run(parted(&[
        "mkpart",
        part_name("boot"),
        boot_hint,
        "1MiB",
        &format!("{}MiB", boot_end),
    ]));
    let mut root_start = boot_end;
    if layout.swap.is_some() {
        let swap_end = boot_end
            .checked_add(layout.swap_mib)
            .ok_or_else(|| anyhow!("Swap size is too large: {}MiB", layout.swap_mib))?;
        partitions = partitions.run(parted(&[
            "mkpart",
            part_name("swap"),
            "linux-swap",
            &format!("{}MiB", boot_end),
            &format!("{}MiB", swap_end),
        ]));
        root_start = swap_end;
    }
    let root_hint = disk.root_filesystem.to_string();
    partitions = partitions
        .run(parted(&[
            "mkpart",
            part_name("root"),
            &root_hint,
            &format!("{}MiB", root_start),
            "100%",
        ]))
        .run(match scheme {
            PartitionScheme::Gpt => parted(&["set", "1", "esp", "on"]),
            PartitionScheme::Mbr => parted(&["set", "1", "boot", "on"]),
        });

    let mut format = PlannedStep::new(0.6, "Formatting filesystems...");
    format = match scheme {
        PartitionScheme::Gpt => format.run(CommandSpec::new(["mkfs.vfat", "-F", "32", layout.boot.as_str()])),
        PartitionScheme::Mbr => format.run(mkfs(Filesystem::Ext4, &layout.boot)),
    };
    if let Some(swap) = &layout.swap {
        format = format.run(CommandSpec::new(["mkswap", swap.as_str()]));
    }
    format = format.run(mkfs(disk.root_filesystem, &layout.root));

    let mount_point = config.mount_point.display().to_string();
    let boot_dir = target_path(config, &layout.boot_mount).display().to_string();
    let mut mount = PlannedStep::new(0.9, "Mounting filesystems...")
        .run(CommandSpec::new(["mkdir", "-p", mount_point.as_str()]))
        .run(CommandSpec::new(["mount", layout.root.as_str(), mount_point.as_str()]))
        .run(CommandSpec::new(["mkdir", "-p", boot_dir.as_str()]))
        .run(CommandSpec::new(["mount", layout.boot.as_str(), boot_dir.as_str()]));
    if let Some(swap) = &layout.swap {
        mount = mount.run(CommandSpec::new(["swapon", swap.as_str()]));
    }

    Ok(vec![table, partitions, format, mount])
}

// ============================================================================
// Stage3
// ============================================================================

fn stage3_base_url(config: &InstallConfig) -> String {
    format!(
        "{}/releases/{}/autobuilds",
        config.stage3.mirror_url.trim_end_matches('/'),
        config.stage3.architecture
    )
}

fn stage3_download(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let stage3 = &config.stage3;
    let work_dir = config.work_dir.display().to_string();
    let base = stage3_base_url(config);
    let pointer_url = format!(
        "{}/latest-stage3-{}-{}.txt",
        base, stage3.architecture, stage3.variant
    );
    let pointer_path = config.work_dir.join(STAGE3_POINTER).display().to_string();

    let mut steps = vec![
        PlannedStep::new(0.05, "Preparing work directory...")
            .run(CommandSpec::new(["mkdir", "-p", work_dir.as_str()])),
        PlannedStep::new(0.1, "Locating latest Stage3...").run(
            CommandSpec::new(["wget", "-q", "-O", pointer_path.as_str(), pointer_url.as_str()])
                .with_timeout(DOWNLOAD_TIMEOUT),
        ),
        PlannedStep::new(0.3, "Downloading Stage3 tarball...").run(
            CommandSpec::new(["sh", "-c", FETCH_STAGE3_SCRIPT])
                .with_working_dir(&config.work_dir)
                .with_env("STAGE3_BASE", &base)
                .with_timeout(DOWNLOAD_TIMEOUT),
        ),
    ];

    if stage3.verify_signature {
        steps.push(
            PlannedStep::new(0.8, "Verifying Stage3 signature...").run(
                CommandSpec::new(["sh", "-c", VERIFY_STAGE3_SCRIPT])
                    .with_working_dir(&config.work_dir)
                    .with_env("STAGE3_BASE", &base)
                    .with_timeout(DOWNLOAD_TIMEOUT),
            ),
        );
    }

    Ok(steps)
}

fn stage3_extract(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let tarball = config.work_dir.join(STAGE3_TARBALL).display().to_string();
    let mount_point = config.mount_point.display().to_string();
    let portage_dir = target_path(config, "/etc/portage").display().to_string();

    Ok(vec![
        PlannedStep::new(0.1, "Unpacking Stage3 tarball...").run(CommandSpec::new([
            "tar",
            "xpf",
            tarball.as_str(),
            "--xattrs-include=*.*",
            "--numeric-owner",
            "-C",
            mount_point.as_str(),
        ])),
        PlannedStep::new(0.9, "Verifying extracted tree...")
            .run(CommandSpec::new(["test", "-d", portage_dir.as_str()])),
    ])
}

// ============================================================================
// Portage
// ============================================================================

/// Contents of `/etc/portage/make.conf`
pub fn make_conf(config: &InstallConfig) -> String {
    let portage = &config.portage;
    let make_opts = portage
        .make_opts
        .replace("$(nproc)", &config.kernel.effective_jobs().to_string());

    format!(
        "# Generated by gentootui\n\
         COMMON_FLAGS=\"-O2 -pipe\"\n\
         CFLAGS=\"${{COMMON_FLAGS}}\"\n\
         CXXFLAGS=\"${{COMMON_FLAGS}}\"\n\
         MAKEOPTS=\"{}\"\n\
         USE=\"{}\"\n\
         ACCEPT_KEYWORDS=\"{}\"\n\
         GENTOO_MIRRORS=\"{}\"\n\
         EMERGE_DEFAULT_OPTS=\"{}\"\n",
        make_opts,
        portage.use_flags.join(" "),
        portage.accept_keywords.join(" "),
        portage.mirrors.join(" "),
        portage.emerge_opts,
    )
}

fn portage_setup(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let target = |path: &str| target_path(config, path).display().to_string();

    Ok(vec![
        PlannedStep::new(0.1, "Writing make.conf...")
            .write(target_path(config, "/etc/portage/make.conf"), make_conf(config)),
        PlannedStep::new(0.3, "Copying DNS configuration...").run(CommandSpec::new([
            "cp",
            "--dereference",
            "/etc/resolv.conf",
            target("/etc/").as_str(),
        ])),
        PlannedStep::new(0.4, "Mounting pseudo-filesystems...")
            .run(CommandSpec::new(["mount", "--types", "proc", "/proc", target("/proc").as_str()]))
            .run(CommandSpec::new(["mount", "--rbind", "/sys", target("/sys").as_str()]))
            .run(CommandSpec::new(["mount", "--make-rslave", target("/sys").as_str()]))
            .run(CommandSpec::new(["mount", "--rbind", "/dev", target("/dev").as_str()]))
            .run(CommandSpec::new(["mount", "--make-rslave", target("/dev").as_str()]))
            .run(CommandSpec::new(["mount", "--bind", "/run", target("/run").as_str()])),
        PlannedStep::new(0.6, "Syncing Portage tree...")
            .run(in_chroot(config, &["emerge-webrsync"]).with_timeout(DOWNLOAD_TIMEOUT)),
    ])
}

// ============================================================================
// System configuration
// ============================================================================

/// Contents of `/etc/fstab` for the automatic layout
pub fn fstab(config: &InstallConfig) -> Result<String> {
    let layout = DiskLayout::from_config(config)?;
    let scheme = config.disk.partition_scheme;

    let mut fstab = String::from("# <fs>\t<mountpoint>\t<type>\t<opts>\t<dump/pass>\n");
    fstab.push_str(&format!(
        "{}\t/\t{}\tnoatime\t0 1\n",
        layout.root, config.disk.root_filesystem
    ));
    fstab.push_str(&format!(
        "{}\t{}\t{}\tdefaults,noatime\t0 2\n",
        layout.boot,
        layout.boot_mount,
        DiskLayout::boot_filesystem(scheme)
    ));
    if let Some(swap) = &layout.swap {
        fstab.push_str(&format!("{}\tnone\tswap\tsw\t0 0\n", swap));
    }
    Ok(fstab)
}

fn system_config(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let system = &config.system;
    let network = &config.network;
    let mut steps = Vec::new();

    steps.push(
        PlannedStep::new(0.1, "Writing fstab...")
            .write(target_path(config, "/etc/fstab"), fstab(config)?),
    );

    steps.push(
        PlannedStep::new(0.2, "Setting hostname...")
            .write(target_path(config, "/etc/hostname"), format!("{}\n", system.hostname))
            .write(
                target_path(config, "/etc/conf.d/hostname"),
                format!("hostname=\"{}\"\n", system.hostname),
            ),
    );

    steps.push(
        PlannedStep::new(0.3, "Setting timezone...")
            .write(target_path(config, "/etc/timezone"), format!("{}\n", system.timezone))
            .run(in_chroot(config, &["emerge", "--config", "sys-libs/timezone-data"])),
    );

    let charset = system.locale.split_once('.').map_or("UTF-8", |(_, cs)| cs);
    steps.push(
        PlannedStep::new(0.4, "Configuring locale...")
            .write(
                target_path(config, "/etc/locale.gen"),
                format!("{} {}\n", system.locale, charset),
            )
            .run(in_chroot(config, &["locale-gen"]))
            .write(
                target_path(config, "/etc/env.d/02locale"),
                format!("LANG=\"{}\"\n", system.locale),
            ),
    );

    steps.push(PlannedStep::new(0.5, "Setting keymap...").write(
        target_path(config, "/etc/conf.d/keymaps"),
        format!("keymap=\"{}\"\n", system.keymap),
    ));

    let mut net = PlannedStep::new(0.6, "Configuring network...");
    if network.dhcp {
        net = net
            .run(emerge(config, &["net-misc/dhcpcd"]))
            .run(in_chroot(config, &["rc-update", "add", "dhcpcd", "default"]));
    } else {
        let iface = match network.interface.as_str() {
            "auto" => "eth0",
            other => other,
        };
        let address = network
            .static_ip
            .as_deref()
            .context("Static networking requires static_ip")?;
        let mut conf = match &network.netmask {
            Some(mask) => format!("config_{}=\"{} netmask {}\"\n", iface, address, mask),
            None => format!("config_{}=\"{}\"\n", iface, address),
        };
        if let Some(gateway) = &network.gateway {
            conf.push_str(&format!("routes_{}=\"default via {}\"\n", iface, gateway));
        }
        let resolv: String = network
            .dns_servers
            .iter()
            .map(|server| format!("nameserver {}\n", server))
            .collect();
        net = net
            .write(target_path(config, "/etc/conf.d/net"), conf)
            .write(target_path(config, "/etc/resolv.conf"), resolv);
    }
    if network.hostname_resolution {
        net = net.write(
            target_path(config, "/etc/hosts"),
            format!(
                "127.0.0.1\t{h} localhost\n::1\t\t{h} localhost\n",
                h = system.hostname
            ),
        );
    }
    steps.push(net);

    if let Some(password) = &system.root_password {
        steps.push(
            PlannedStep::new(0.7, "Setting root password...").run(
                in_chroot(config, &["sh", "-c", "echo \"root:$NEW_PASSWORD\" | chpasswd"])
                    .with_env("NEW_PASSWORD", password),
            ),
        );
    }

    if system.create_user {
        let mut user = PlannedStep::new(0.8, format!("Creating user {}...", system.username)).run(
            in_chroot(
                config,
                &[
                    "useradd",
                    "-m",
                    "-G",
                    "users,wheel,audio,video",
                    "-s",
                    "/bin/bash",
                    &system.username,
                ],
            ),
        );
        if let Some(password) = &system.user_password {
            user = user.run(
                in_chroot(config, &["sh", "-c", "echo \"$NEW_USER:$NEW_PASSWORD\" | chpasswd"])
                    .with_env("NEW_USER", &system.username)
                    .with_env("NEW_PASSWORD", password),
            );
        }
        steps.push(user);
    }

    if system.enable_ssh {
        steps.push(
            PlannedStep::new(0.9, "Enabling SSH...")
                .run(in_chroot(config, &["rc-update", "add", "sshd", "default"])),
        );
    }

    Ok(steps)
}

// ============================================================================
// Kernel
// ============================================================================

fn kernel_install(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let kernel = &config.kernel;
    let mut steps = vec![
        PlannedStep::new(0.1, "Installing kernel sources...")
            .run(emerge(config, &[kernel.kernel_source.atom()])),
    ];
    if kernel.firmware_install {
        steps.push(
            PlannedStep::new(0.5, "Installing firmware...")
                .run(emerge(config, &["sys-kernel/linux-firmware"])),
        );
    }
    steps.push(
        PlannedStep::new(0.9, "Selecting kernel sources...")
            .run(in_chroot(config, &["eselect", "kernel", "set", "1"])),
    );
    Ok(steps)
}

fn kernel_config(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let step = match config.kernel.config_method {
        KernelConfigMethod::Genkernel => PlannedStep::new(0.3, "Installing genkernel...")
            .run(emerge(config, &["sys-kernel/genkernel"])),
        KernelConfigMethod::Manual => PlannedStep::new(0.5, "Generating default configuration...")
            .run(in_chroot(config, &["make", "-C", KERNEL_TREE, "defconfig"])),
        KernelConfigMethod::Distribution => {
            PlannedStep::new(0.5, "Reusing running kernel configuration...")
                .run(in_chroot(
                    config,
                    &["sh", "-c", "zcat /proc/config.gz > /usr/src/linux/.config"],
                ))
                .run(in_chroot(config, &["make", "-C", KERNEL_TREE, "olddefconfig"]))
        }
    };
    Ok(vec![step])
}

fn kernel_compile(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let kernel = &config.kernel;
    let jobs = format!("-j{}", kernel.effective_jobs());

    if kernel.config_method == KernelConfigMethod::Genkernel {
        let target = if kernel.initramfs { "all" } else { "kernel" };
        let makeopts = format!("--makeopts={}", jobs);
        return Ok(vec![
            PlannedStep::new(0.1, "Building kernel with genkernel...")
                .run(in_chroot(config, &["genkernel", &makeopts, target])),
        ]);
    }

    let mut steps = vec![
        PlannedStep::new(0.1, "Compiling kernel...")
            .run(in_chroot(config, &["make", "-C", KERNEL_TREE, &jobs])),
        PlannedStep::new(0.6, "Installing modules...")
            .run(in_chroot(config, &["make", "-C", KERNEL_TREE, "modules_install"])),
        PlannedStep::new(0.8, "Installing kernel image...")
            .run(in_chroot(config, &["make", "-C", KERNEL_TREE, "install"])),
    ];
    if kernel.initramfs {
        steps.push(
            PlannedStep::new(0.9, "Building initramfs...")
                .run(emerge(config, &["sys-kernel/dracut"]))
                .run(in_chroot(
                    config,
                    &[
                        "sh",
                        "-c",
                        "dracut --force --kver \"$(ls /lib/modules | sort -V | tail -n 1)\"",
                    ],
                )),
        );
    }
    Ok(steps)
}

// ============================================================================
// Bootloader
// ============================================================================

fn bootloader_install(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let boot = &config.bootloader;

    let steps = match boot.bootloader {
        Bootloader::Grub => {
            let grub_target = format!("--target={}", boot.target);
            let install = if boot.target.ends_with("-efi") {
                let efi_dir = format!("--efi-directory={}", boot.install_location);
                in_chroot(
                    config,
                    &["grub-install", &grub_target, &efi_dir, "--bootloader-id=Gentoo"],
                )
            } else {
                in_chroot(config, &["grub-install", &grub_target, &config.disk.target_disk])
            };
            let defaults = format!(
                "GRUB_DISTRIBUTOR=\"Gentoo\"\nGRUB_TIMEOUT={}\nGRUB_CMDLINE_LINUX=\"{}\"\n",
                boot.timeout,
                boot.additional_params.join(" ")
            );

            vec![
                PlannedStep::new(0.2, "Installing GRUB...").run(emerge(config, &["sys-boot/grub"])),
                PlannedStep::new(0.4, "Writing GRUB defaults...")
                    .write(target_path(config, "/etc/default/grub"), defaults),
                PlannedStep::new(0.6, "Installing GRUB to disk...").run(install),
                PlannedStep::new(0.9, "Generating GRUB configuration...")
                    .run(in_chroot(config, &["grub-mkconfig", "-o", "/boot/grub/grub.cfg"])),
            ]
        }
        Bootloader::SystemdBoot => {
            let esp = format!("--esp-path={}", boot.install_location);
            let loader_conf = format!(
                "{}/loader/loader.conf",
                boot.install_location.trim_end_matches('/')
            );
            vec![
                PlannedStep::new(0.3, "Installing systemd-boot...")
                    .run(in_chroot(config, &["bootctl", "install", &esp])),
                PlannedStep::new(0.8, "Writing loader configuration...").write(
                    target_path(config, &loader_conf),
                    format!("timeout {}\n", boot.timeout),
                ),
            ]
        }
        Bootloader::Lilo => {
            let layout = DiskLayout::from_config(config)?;
            let lilo_conf = format!(
                "boot={}\ntimeout={}\ndefault=gentoo\n\nimage=/boot/vmlinuz\n  label=gentoo\n  read-only\n  root={}\n  append=\"{}\"\n",
                config.disk.target_disk,
                boot.timeout * 10,
                layout.root,
                boot.additional_params.join(" ")
            );
            vec![
                PlannedStep::new(0.2, "Installing LILO...").run(emerge(config, &["sys-boot/lilo"])),
                PlannedStep::new(0.5, "Writing lilo.conf...")
                    .write(target_path(config, "/etc/lilo.conf"), lilo_conf),
                PlannedStep::new(0.8, "Installing LILO to disk...").run(in_chroot(config, &["lilo"])),
            ]
        }
    };
    Ok(steps)
}

// ============================================================================
// Finalization
// ============================================================================

fn finalization(config: &InstallConfig) -> Result<Vec<PlannedStep>> {
    let system = &config.system;
    let mut steps = Vec::new();

    if system.install_desktop {
        steps.push(
            PlannedStep::new(0.2, format!("Installing {} desktop...", system.desktop_environment))
                .run(emerge(config, &[system.desktop_environment.atom()])),
        );
    }

    let leftovers: Vec<String> = [STAGE3_TARBALL, "stage3.tar.xz.asc", "stage3.path", STAGE3_POINTER]
        .iter()
        .map(|name| config.work_dir.join(name).display().to_string())
        .collect();
    let mut rm = vec!["rm", "-f"];
    rm.extend(leftovers.iter().map(String::as_str));
    steps.push(PlannedStep::new(0.7, "Cleaning up...").run(CommandSpec::new(rm)));

    let mount_point = config.mount_point.display().to_string();
    let mut unmount = PlannedStep::new(0.9, "Unmounting filesystems...").run(CommandSpec::new(["sync"]));
    if let Some(swap) = DiskLayout::from_config(config)?.swap {
        unmount = unmount.run(CommandSpec::new(["swapoff", swap.as_str()]));
    }
    unmount = unmount.run(CommandSpec::new([
        "umount",
        "--recursive",
        "--lazy",
        mount_point.as_str(),
    ]));
    steps.push(unmount);

    Ok(steps)
}

// ============================================================================
// Helpers
// ============================================================================

/// `path` inside the new system, resolved below the mount point
fn target_path(config: &InstallConfig, path: &str) -> PathBuf {
    config.mount_point.join(path.trim_start_matches('/'))
}

fn in_chroot(config: &InstallConfig, args: &[&str]) -> CommandSpec {
    let mut argv = vec!["chroot".to_string(), config.mount_point.display().to_string()];
    argv.extend(args.iter().map(|arg| arg.to_string()));
    CommandSpec::new(argv)
}

fn emerge(config: &InstallConfig, atoms: &[&str]) -> CommandSpec {
    let mut args = vec!["emerge"];
    args.extend(config.portage.emerge_opts.split_whitespace());
    args.extend_from_slice(atoms);
    in_chroot(config, &args)
}
