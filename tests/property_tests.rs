//! Property-Based Tests for GentooTUI
//!
//! These tests verify:
//! - Wizard navigation never leaves its bounds
//! - Fail-fast sequencing for any stage count and failure position
//! - Enum string round-trips (to_string → parse)
//! - Partition naming and size parsing invariants

use async_trait::async_trait;
use proptest::prelude::*;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use strum::IntoEnumIterator;

use gentootui::navigator::Navigator;
use gentootui::orchestrator::{Orchestrator, PrerequisiteSettings};
use gentootui::progress::{ProgressEvent, ProgressStatus, StageProgress};
use gentootui::stage::{Stage, StageDescriptor, StageId};
use gentootui::stages::plan::{parse_size_mib, partition_path};
use gentootui::types::{Bootloader, Filesystem, LogLevel};

// =============================================================================
// Navigator Property Tests
// =============================================================================

proptest! {
    /// The step index stays within [0, total) for any move sequence
    #[test]
    fn prop_navigator_stays_in_bounds(
        total in 0usize..12,
        moves in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let mut nav = Navigator::with_total_steps(total, false);
        let total = total.max(1);

        for forward in moves {
            let before = nav.state().current_step;
            let moved = if forward { nav.advance() } else { nav.retreat() };
            let after = nav.state().current_step;

            prop_assert!(after < total);
            if moved {
                prop_assert_eq!(after, if forward { before + 1 } else { before - 1 });
            } else {
                prop_assert_eq!(after, before);
                let at_boundary = if forward { after == total - 1 } else { after == 0 };
                prop_assert!(at_boundary);
            }
        }
    }

    /// Advancing `total` times always lands on the last step
    #[test]
    fn prop_navigator_reaches_last_step(total in 1usize..12) {
        let mut nav = Navigator::with_total_steps(total, true);
        let advanced = (0..total).filter(|_| nav.advance()).count();
        prop_assert_eq!(advanced, total - 1);
        prop_assert!(nav.state().is_last());
    }
}

// =============================================================================
// Orchestrator Fail-Fast Property Tests
// =============================================================================

struct ScriptedStage {
    descriptor: StageDescriptor,
    result: Option<bool>,
}

#[async_trait]
impl Stage for ScriptedStage {
    fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    async fn run(&self, _progress: &StageProgress) -> anyhow::Result<bool> {
        match self.result {
            Some(ok) => Ok(ok),
            None => anyhow::bail!("stage raised"),
        }
    }
}

/// Outcome of the stage at the failure position
#[derive(Debug, Clone, Copy)]
enum Breakage {
    Fails,
    Raises,
}

fn breakage_strategy() -> impl Strategy<Value = Option<Breakage>> {
    prop_oneof![
        Just(None),
        Just(Some(Breakage::Fails)),
        Just(Some(Breakage::Raises)),
    ]
}

fn run_scripted(count: usize, broken_at: usize, breakage: Option<Breakage>) -> (bool, Vec<ProgressEvent>) {
    let stages: Vec<Box<dyn Stage>> = StageId::iter()
        .take(count)
        .enumerate()
        .map(|(i, id)| {
            let result = match breakage {
                Some(Breakage::Fails) if i == broken_at => Some(false),
                Some(Breakage::Raises) if i == broken_at => None,
                _ => Some(true),
            };
            Box::new(ScriptedStage {
                descriptor: id.into(),
                result,
            }) as Box<dyn Stage>
        })
        .collect();

    let orch = Orchestrator::new(stages, PrerequisiteSettings::default()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    orch.register_progress_sink(Arc::new(move |e: ProgressEvent| {
        captured.lock().unwrap().push(e);
    }));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let ok = runtime.block_on(orch.run_all());

    let events = events.lock().unwrap().clone();
    (ok, events)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Stages after the first failure never start, and every started stage
    /// is closed by exactly one terminal event
    #[test]
    fn prop_fail_fast(
        count in 0usize..=10,
        position in 0usize..10,
        breakage in breakage_strategy(),
    ) {
        let broken_at = if count == 0 { 0 } else { position % count };
        let breakage = if count == 0 { None } else { breakage };

        let (ok, events) = run_scripted(count, broken_at, breakage);

        let started: Vec<StageId> = events
            .iter()
            .filter(|e| e.kind == ProgressStatus::Starting)
            .map(|e| e.stage)
            .collect();
        let terminal: Vec<&ProgressEvent> = events.iter().filter(|e| e.is_terminal()).collect();

        match breakage {
            None => {
                prop_assert!(ok);
                prop_assert_eq!(started.len(), count);
                prop_assert!(terminal.iter().all(|e| e.kind == ProgressStatus::Completed));
            }
            Some(kind) => {
                prop_assert!(!ok);
                prop_assert_eq!(started.len(), broken_at + 1);
                let last = terminal.last().unwrap();
                let expected = match kind {
                    Breakage::Fails => ProgressStatus::Failed,
                    Breakage::Raises => ProgressStatus::Error,
                };
                prop_assert_eq!(last.kind, expected);
                prop_assert_eq!(last.progress, 0.0);
                prop_assert!(last.error.is_some());
            }
        }

        prop_assert_eq!(terminal.len(), started.len());
        prop_assert_eq!(events.len(), 2 * started.len());
        for pair in events.chunks(2) {
            prop_assert_eq!(pair[0].kind, ProgressStatus::Starting);
            prop_assert_eq!(pair[0].stage, pair[1].stage);
        }
    }
}

// =============================================================================
// Enum Round-Trip Property Tests
// =============================================================================

proptest! {
    /// Filesystem: to_string → parse round-trip is identity
    #[test]
    fn prop_filesystem_round_trip(fs in prop::sample::select(Filesystem::iter().collect::<Vec<_>>())) {
        prop_assert_eq!(Filesystem::from_str(&fs.to_string()).unwrap(), fs);
    }

    /// Bootloader: to_string → parse round-trip is identity
    #[test]
    fn prop_bootloader_round_trip(bl in prop::sample::select(Bootloader::iter().collect::<Vec<_>>())) {
        prop_assert_eq!(Bootloader::from_str(&bl.to_string()).unwrap(), bl);
    }

    /// LogLevel parses regardless of case
    #[test]
    fn prop_log_level_case_insensitive(
        level in prop::sample::select(LogLevel::iter().collect::<Vec<_>>()),
        lower in any::<bool>(),
    ) {
        let text = level.to_string();
        let text = if lower { text.to_lowercase() } else { text };
        prop_assert_eq!(LogLevel::from_str(&text).unwrap(), level);
    }
}

// =============================================================================
// Disk Naming Property Tests
// =============================================================================

proptest! {
    /// Disks ending in a digit get a 'p' separator, others do not
    #[test]
    fn prop_partition_path_separator(
        disk in prop_oneof![
            "/dev/sd[a-z]",
            "/dev/vd[a-z]",
            "/dev/nvme[0-9]n[1-9]",
            "/dev/mmcblk[0-9]",
        ],
        number in 1u32..16,
    ) {
        let path = partition_path(&disk, number);
        let expected = if disk.ends_with(|c: char| c.is_ascii_digit()) {
            format!("{}p{}", disk, number)
        } else {
            format!("{}{}", disk, number)
        };
        prop_assert_eq!(path, expected);
    }

    /// G sizes are 1024 times their M equivalent
    #[test]
    fn prop_size_units_scale(value in 0u64..100_000) {
        prop_assert_eq!(parse_size_mib(&format!("{}M", value)), Some(value));
        prop_assert_eq!(parse_size_mib(&format!("{}", value)), Some(value));
        prop_assert_eq!(parse_size_mib(&format!("{}G", value)), Some(value * 1024));
        prop_assert_eq!(parse_size_mib(&format!("{}GiB", value)), Some(value * 1024));
    }

    /// Garbage never parses
    #[test]
    fn prop_size_rejects_unknown_units(value in 0u64..1000, unit in "[QXYZ]") {
        prop_assert_eq!(parse_size_mib(&format!("{}{}", value, unit)), None);
    }
}
