//! Progress events and the sink that carries them out of a running stage.
//!
//! A stage never talks to the presentation layer. It reports through a
//! [`StageProgress`] handed to it by the orchestrator, which stamps every
//! event with the stage's identity and forwards it to whichever
//! [`ProgressSink`] is registered at that moment. Delivery is synchronous on
//! the producing task, so sinks must return quickly.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::stage::{StageDescriptor, StageId};

/// Kind of progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Error,
}

impl ProgressStatus {
    /// True for the event that closes a started stage
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }
}

/// Point-in-time status of one stage
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub stage: StageId,
    pub stage_name: String,
    /// Completion fraction in [0.0, 1.0]
    pub progress: f64,
    pub kind: ProgressStatus,
    /// Short status text ("Starting...", "Formatting filesystems...")
    pub status: String,
    pub detail: Option<String>,
    /// Present only on Failed/Error events, which always carry progress 0.0
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn starting(stage: &StageDescriptor) -> Self {
        Self::new(stage, 0.0, ProgressStatus::Starting, "Starting...")
    }

    pub fn running(stage: &StageDescriptor, progress: f64, status: impl Into<String>) -> Self {
        Self::new(stage, progress, ProgressStatus::Running, status)
    }

    pub fn completed(stage: &StageDescriptor) -> Self {
        Self::new(stage, 1.0, ProgressStatus::Completed, "Completed")
    }

    pub fn failed(stage: &StageDescriptor, error: impl Into<String>) -> Self {
        Self::new(stage, 0.0, ProgressStatus::Failed, "Failed").with_error(error)
    }

    pub fn errored(stage: &StageDescriptor, error: impl Into<String>) -> Self {
        Self::new(stage, 0.0, ProgressStatus::Error, "Error").with_error(error)
    }

    fn new(
        stage: &StageDescriptor,
        progress: f64,
        kind: ProgressStatus,
        status: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.id,
            stage_name: stage.name.clone(),
            progress: clamp_fraction(progress),
            kind,
            status: status.into(),
            detail: None,
            error: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.progress = 0.0;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

fn clamp_fraction(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Consumer of progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Sink that forwards into a channel with a single receiver.
///
/// Sending never blocks; events sent after the receiver is dropped are
/// discarded.
pub fn channel_sink() -> (Arc<dyn ProgressSink>, UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = unbounded_channel();
    let sink = move |event: ProgressEvent| {
        if tx.send(event).is_err() {
            tracing::debug!("Progress receiver dropped, discarding event");
        }
    };
    (Arc::new(sink), rx)
}

/// Swappable slot holding the active sink. Last registration wins.
#[derive(Clone, Default)]
pub struct SinkSlot {
    inner: Arc<RwLock<Option<Arc<dyn ProgressSink>>>>,
}

impl SinkSlot {
    pub fn set(&self, sink: Arc<dyn ProgressSink>) {
        match self.inner.write() {
            Ok(mut slot) => *slot = Some(sink),
            Err(poisoned) => *poisoned.into_inner() = Some(sink),
        }
    }

    pub fn is_set(&self) -> bool {
        self.current().is_some()
    }

    /// Deliver `event` to the current sink, if any
    pub fn emit(&self, event: ProgressEvent) {
        // Clone the Arc out so the lock is not held while the sink runs
        if let Some(sink) = self.current() {
            sink.emit(event);
        }
    }

    fn current(&self) -> Option<Arc<dyn ProgressSink>> {
        match self.inner.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSlot")
            .field("registered", &self.is_set())
            .finish()
    }
}

/// Progress handle bound to one stage invocation
#[derive(Debug, Clone)]
pub struct StageProgress {
    stage: StageDescriptor,
    sink: SinkSlot,
}

impl StageProgress {
    pub fn new(stage: StageDescriptor, sink: SinkSlot) -> Self {
        Self { stage, sink }
    }

    pub fn stage(&self) -> &StageDescriptor {
        &self.stage
    }

    /// Report intermediate progress
    pub fn report(&self, progress: f64, status: impl Into<String>) {
        self.sink
            .emit(ProgressEvent::running(&self.stage, progress, status));
    }

    /// Report intermediate progress with extra detail (e.g. the command line)
    pub fn report_detail(&self, progress: f64, status: impl Into<String>, detail: impl Into<String>) {
        self.sink
            .emit(ProgressEvent::running(&self.stage, progress, status).with_detail(detail));
    }

    pub(crate) fn emit(&self, event: ProgressEvent) {
        self.sink.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_slot() -> (SinkSlot, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let slot = SinkSlot::default();
        slot.set(Arc::new(move |event: ProgressEvent| {
            captured.lock().unwrap().push(event);
        }));
        (slot, events)
    }

    #[test]
    fn test_error_events_have_zero_progress() {
        let stage = StageDescriptor::from(StageId::KernelCompile);
        let failed = ProgressEvent::failed(&stage, "make exited 2");
        assert_eq!(failed.progress, 0.0);
        assert_eq!(failed.error.as_deref(), Some("make exited 2"));
        assert!(failed.is_terminal());

        let errored = ProgressEvent::errored(&stage, "boom");
        assert_eq!(errored.progress, 0.0);
        assert_eq!(errored.kind, ProgressStatus::Error);
    }

    #[test]
    fn test_progress_is_clamped() {
        let stage = StageDescriptor::from(StageId::DiskSetup);
        assert_eq!(ProgressEvent::running(&stage, 1.7, "x").progress, 1.0);
        assert_eq!(ProgressEvent::running(&stage, -0.2, "x").progress, 0.0);
        assert_eq!(ProgressEvent::running(&stage, f64::NAN, "x").progress, 0.0);
    }

    #[test]
    fn test_adapter_stamps_stage_identity() {
        let (slot, events) = recording_slot();
        let progress = StageProgress::new(StageDescriptor::from(StageId::Stage3Extract), slot);

        progress.report(0.5, "Unpacking...");
        progress.report_detail(0.9, "Verifying", "tar tf stage3.tar.xz");

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.stage == StageId::Stage3Extract));
        assert_eq!(events[0].stage_name, "Extracting Stage3");
        assert_eq!(events[0].kind, ProgressStatus::Running);
        assert_eq!(events[1].detail.as_deref(), Some("tar tf stage3.tar.xz"));
    }

    #[test]
    fn test_empty_slot_drops_events() {
        let slot = SinkSlot::default();
        assert!(!slot.is_set());
        slot.emit(ProgressEvent::completed(&StageId::DiskSetup.into()));
    }

    #[test]
    fn test_last_registration_wins() {
        let (slot, first) = recording_slot();
        let second = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&second);
        slot.set(Arc::new(move |event: ProgressEvent| {
            captured.lock().unwrap().push(event);
        }));

        slot.emit(ProgressEvent::completed(&StageId::DiskSetup.into()));
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = channel_sink();
        let stage = StageDescriptor::from(StageId::PortageSetup);

        sink.emit(ProgressEvent::starting(&stage));
        sink.emit(ProgressEvent::completed(&stage));

        assert_eq!(rx.recv().await.unwrap().kind, ProgressStatus::Starting);
        assert_eq!(rx.recv().await.unwrap().kind, ProgressStatus::Completed);
    }
}
