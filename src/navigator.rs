//! Wizard navigation.
//!
//! # Step Flow
//!
//! ```text
//! Welcome -> Disk Setup -> Stage3 -> Configuration -> Kernel -> Bootloader -> Finalization
//! ```
//!
//! The navigator owns the displayed step index and nothing else. It never
//! looks at the orchestrator; the mapping from wizard steps to installation
//! stages lives on [`WizardStep`] and is consumed by [`crate::wizard`].
//!
//! # Invariants
//!
//! - `0 <= current_step < total_steps` at all times
//! - `advance()` at the last step and `retreat()` at the first are no-ops
//! - Retreating never undoes work already performed on the target system

use strum::{EnumIter, IntoEnumIterator};

use crate::stage::StageId;

/// One screen of the installation wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum WizardStep {
    /// System information and configuration review
    Welcome,
    DiskSetup,
    Stage3,
    Configuration,
    Kernel,
    Bootloader,
    Finalization,
}

impl WizardStep {
    /// Total number of wizard steps.
    pub const TOTAL_STEPS: usize = 7;

    /// Zero-based position in the wizard
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome",
            Self::DiskSetup => "Disk Setup",
            Self::Stage3 => "Stage3",
            Self::Configuration => "Configuration",
            Self::Kernel => "Kernel",
            Self::Bootloader => "Bootloader",
            Self::Finalization => "Finalization",
        }
    }

    /// Status line shown when the step is entered
    pub fn status(self) -> &'static str {
        match self {
            Self::Welcome => "Welcome - Review system information and configuration",
            Self::DiskSetup => "Disk Setup - Configure partitions and file systems",
            Self::Stage3 => "Stage3 - Download and extract base system",
            Self::Configuration => "Configuration - Set up system configuration",
            Self::Kernel => "Kernel - Configure and compile kernel",
            Self::Bootloader => "Bootloader - Install and configure bootloader",
            Self::Finalization => "Finalization - Complete installation and cleanup",
        }
    }

    /// Installation stages executed when continuing from this step
    pub fn stages(self) -> &'static [StageId] {
        match self {
            Self::Welcome => &[],
            Self::DiskSetup => &[StageId::DiskSetup],
            Self::Stage3 => &[StageId::Stage3Download, StageId::Stage3Extract],
            Self::Configuration => &[StageId::PortageSetup, StageId::SystemConfig],
            Self::Kernel => &[
                StageId::KernelInstall,
                StageId::KernelConfig,
                StageId::KernelCompile,
            ],
            Self::Bootloader => &[StageId::BootloaderInstall],
            Self::Finalization => &[StageId::Finalization],
        }
    }
}

/// Session-scoped wizard state handed to the display on every refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WizardState {
    pub current_step: usize,
    pub total_steps: usize,
    pub installation_active: bool,
    /// Copied from the configuration once at startup
    pub dry_run: bool,
}

impl WizardState {
    /// The named step at the current index, if the index names one
    pub fn step(&self) -> Option<WizardStep> {
        WizardStep::from_index(self.current_step)
    }

    pub fn is_first(&self) -> bool {
        self.current_step == 0
    }

    pub fn is_last(&self) -> bool {
        self.current_step + 1 >= self.total_steps
    }

    /// "Step 3/7"
    pub fn step_counter(&self) -> String {
        format!("Step {}/{}", self.current_step + 1, self.total_steps)
    }
}

/// Receives the wizard state after every transition
pub trait DisplayRefresh: Send + Sync {
    fn refresh(&self, state: &WizardState, status: &str);
}

/// Bounded linear state machine over the wizard steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    state: WizardState,
}

impl Navigator {
    /// Navigator over the standard seven wizard steps
    pub fn new(dry_run: bool) -> Self {
        Self::with_total_steps(WizardStep::TOTAL_STEPS, dry_run)
    }

    /// Navigator over `total_steps` steps. At least one step always exists.
    pub fn with_total_steps(total_steps: usize, dry_run: bool) -> Self {
        Self {
            state: WizardState {
                current_step: 0,
                total_steps: total_steps.max(1),
                installation_active: false,
                dry_run,
            },
        }
    }

    pub fn state(&self) -> &WizardState {
        &self.state
    }

    pub fn current_step(&self) -> Option<WizardStep> {
        self.state.step()
    }

    /// Move forward one step. Returns false at the last step.
    pub fn advance(&mut self) -> bool {
        if self.state.current_step + 1 < self.state.total_steps {
            self.state.current_step += 1;
            true
        } else {
            false
        }
    }

    /// Move back one step. Returns false at the first step.
    pub fn retreat(&mut self) -> bool {
        if self.state.current_step > 0 {
            self.state.current_step -= 1;
            true
        } else {
            false
        }
    }

    pub fn set_installation_active(&mut self, active: bool) {
        self.state.installation_active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_cover_every_stage_once_in_order() {
        let stages: Vec<StageId> = WizardStep::iter()
            .flat_map(|s| s.stages().iter().copied())
            .collect();
        assert_eq!(stages, StageId::iter().collect::<Vec<_>>());
        assert!(WizardStep::Welcome.stages().is_empty());
    }

    #[test]
    fn test_index_round_trip() {
        assert_eq!(WizardStep::iter().count(), WizardStep::TOTAL_STEPS);
        for step in WizardStep::iter() {
            assert_eq!(WizardStep::from_index(step.index()), Some(step));
        }
        assert_eq!(WizardStep::from_index(7), None);
    }

    #[test]
    fn test_initial_state() {
        let nav = Navigator::new(true);
        let state = nav.state();
        assert_eq!(state.current_step, 0);
        assert_eq!(state.total_steps, 7);
        assert!(state.dry_run);
        assert!(!state.installation_active);
        assert_eq!(nav.current_step(), Some(WizardStep::Welcome));
        assert_eq!(state.step_counter(), "Step 1/7");
    }

    #[test]
    fn test_retreat_at_first_step_is_noop() {
        let mut nav = Navigator::new(false);
        assert!(!nav.retreat());
        assert_eq!(nav.state().current_step, 0);
    }

    #[test]
    fn test_advance_at_last_step_is_noop() {
        let mut nav = Navigator::new(false);
        for _ in 0..6 {
            assert!(nav.advance());
        }
        assert_eq!(nav.current_step(), Some(WizardStep::Finalization));
        assert!(nav.state().is_last());

        assert!(!nav.advance());
        assert_eq!(nav.state().current_step, 6);
    }

    #[test]
    fn test_zero_steps_clamped_to_one() {
        let mut nav = Navigator::with_total_steps(0, false);
        assert_eq!(nav.state().total_steps, 1);
        assert!(!nav.advance());
        assert!(!nav.retreat());
        assert!(nav.state().is_first() && nav.state().is_last());
    }
}
