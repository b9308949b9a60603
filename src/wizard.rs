//! Wizard controller: ties navigation to stage execution.
//!
//! Continuing from a step runs that step's stages through the
//! orchestrator and advances only if they all succeed. Continuing from the
//! final step signals completion instead of advancing. Going back is a pure
//! display operation.

use std::sync::Arc;

use crate::navigator::{DisplayRefresh, Navigator, WizardState, WizardStep};
use crate::orchestrator::Orchestrator;

/// Status shown once the final step has been continued from
pub const COMPLETION_MESSAGE: &str = "Installation completed successfully!";

/// Result of [`Wizard::continue_step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueOutcome {
    /// The step's stages succeeded and the next step is shown
    Advanced,
    /// The final step's stages succeeded; the installation is done
    Completed,
    /// A stage failed or faulted; the wizard stays on the current step
    Failed,
}

pub struct Wizard {
    navigator: Navigator,
    orchestrator: Arc<Orchestrator>,
    display: Arc<dyn DisplayRefresh>,
}

impl Wizard {
    /// Create the wizard at the welcome step and draw it once
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        display: Arc<dyn DisplayRefresh>,
        dry_run: bool,
    ) -> Self {
        let wizard = Self {
            navigator: Navigator::new(dry_run),
            orchestrator,
            display,
        };
        wizard.refresh(WizardStep::Welcome.status());
        wizard
    }

    pub fn state(&self) -> &WizardState {
        self.navigator.state()
    }

    pub fn current_step(&self) -> Option<WizardStep> {
        self.navigator.current_step()
    }

    /// True if continuing would run a destructive stage that has not yet
    /// succeeded in this session
    pub fn pending_destructive(&self) -> bool {
        self.navigator.current_step().is_some_and(|step| {
            step.stages()
                .iter()
                .any(|id| id.is_destructive() && !self.orchestrator.has_succeeded(*id))
        })
    }

    /// Run the current step's stages and move on if they succeed
    pub async fn continue_step(&mut self) -> ContinueOutcome {
        let Some(step) = self.navigator.current_step() else {
            return ContinueOutcome::Failed;
        };

        let stages = step.stages();
        if !stages.is_empty() {
            tracing::info!("Continuing from {}: running {} stage(s)", step.title(), stages.len());
            self.navigator.set_installation_active(true);
            self.refresh(&format!("{} - Running...", step.title()));

            let ok = self.orchestrator.run_stages(stages).await;

            self.navigator.set_installation_active(false);
            if !ok {
                tracing::error!("{} did not complete", step.title());
                self.refresh(&format!("{} - Failed", step.title()));
                return ContinueOutcome::Failed;
            }
        }

        if self.navigator.state().is_last() {
            tracing::info!("Installation completed");
            self.refresh(COMPLETION_MESSAGE);
            return ContinueOutcome::Completed;
        }

        self.navigator.advance();
        self.refresh_current();
        ContinueOutcome::Advanced
    }

    /// Show the previous step. System changes already made are kept.
    pub fn back(&mut self) -> bool {
        let moved = self.navigator.retreat();
        if moved {
            self.refresh_current();
        }
        moved
    }

    /// Continue until the installation completes or a step fails
    pub async fn run_to_completion(&mut self) -> bool {
        loop {
            match self.continue_step().await {
                ContinueOutcome::Advanced => continue,
                ContinueOutcome::Completed => return true,
                ContinueOutcome::Failed => return false,
            }
        }
    }

    fn refresh_current(&self) {
        let status = self
            .navigator
            .current_step()
            .map_or("Ready", WizardStep::status);
        self.refresh(status);
    }

    fn refresh(&self, status: &str) {
        self.display.refresh(self.navigator.state(), status);
    }
}
