//! Output-side collaborator seams: telemetry, toasts, progress, and push
//! notifications. All are fire-and-forget from the pipeline's point of
//! view; a slow sink must do its own buffering.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Map;
use serde_json::Value;

use steward_protocol::PendingApproval;

/// A structured telemetry record emitted by the pipeline.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    /// `tool.started`, `tool.completed`, `tool.failed`, `shell.started`, …
    pub kind: String,
    pub tool_name: String,
    pub call_id: String,
    pub session_id: Option<String>,
    pub attempt: u32,
    pub fields: Map<String, Value>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Telemetry that just traces. The default when the embedder wires nothing.
#[derive(Debug, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        tracing::debug!(
            kind = %event.kind,
            tool = %event.tool_name,
            call_id = %event.call_id,
            attempt = event.attempt,
            "telemetry"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Error,
}

pub trait ToastSink: Send + Sync {
    fn toast(&self, level: ToastLevel, message: &str);
}

/// Indeterminate progress entries keyed by call id.
pub trait ProgressTracker: Send + Sync {
    fn begin(&self, call_id: &str, tool_name: &str);
    fn end(&self, call_id: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryProgress {
    active: RwLock<HashMap<String, String>>,
}

impl InMemoryProgress {
    pub fn active_calls(&self) -> Vec<(String, String)> {
        match self.active.read() {
            Ok(guard) => guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl ProgressTracker for InMemoryProgress {
    fn begin(&self, call_id: &str, tool_name: &str) {
        if let Ok(mut guard) = self.active.write() {
            guard.insert(call_id.to_string(), tool_name.to_string());
        }
    }

    fn end(&self, call_id: &str) {
        if let Ok(mut guard) = self.active.write() {
            guard.remove(call_id);
        }
    }
}

/// Delivery of approval prompts to operators who are not watching the event
/// stream (mobile push, chat bots). Out of scope beyond this contract.
pub trait PushNotifier: Send + Sync {
    fn notify_approval(&self, approval: &PendingApproval);
}
