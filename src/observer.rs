use crate::types::ProgressEvent;

/// Receives everything a scan run reports back to its caller.
///
/// Implementations are handed to the orchestrator per call. Progress is delivered
/// from the relay's drain task, log chunks and the finish signal from the scan task,
/// so a single field is never written from two tasks at once.
pub trait ScanObserver: Send + Sync {
    /// Fractional completion, in emission order.
    fn on_progress(&self, event: ProgressEvent);

    /// One chunk of the textual log. Errors start with `ERROR:`, warnings with `WARNINGS:`.
    fn on_log(&self, text: &str);

    /// The orchestrator is idle again. Called exactly once per started run.
    fn on_finished(&self);
}
