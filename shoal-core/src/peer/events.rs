//! Event emission toward the host shell.
//!
//! The download and upload engines never know what shell they run under;
//! they hold an [`EventSink`] capability and emit named events with JSON
//! payloads (`upload-status`, `download-queue`, `download-status`).

/// Capability for pushing events to whatever hosts this peer.
pub trait EventSink: Send + Sync {
    /// Emits one named event with a JSON payload.
    fn emit(&self, event: &str, payload: serde_json::Value);
}

/// Default sink: events become structured log lines.
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &str, payload: serde_json::Value) {
        tracing::info!(target: "shoal::events", %event, %payload, "event");
    }
}
