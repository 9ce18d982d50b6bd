//! Envelopes for the command queue / event queue pair that connects a
//! transport to a session runner.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A request submitted to a session runner's command queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCommand {
    pub session_id: String,
    pub kind: CommandKind,
    /// Free-form payload. For `Input` this is the user text; for `Slash` the
    /// full `/word args…` line; for `Approval` either a JSON
    /// `{id, approved, reason}` object or a bare `approve|yes|y` shorthand.
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Input,
    Slash,
    Approval,
    Pause,
    Resume,
}

/// A structured event emitted by a runner. Transports forward these verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn now(kind: EventKind, session_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "message.updated")]
    MessageUpdated,
    #[serde(rename = "tool.started")]
    ToolStarted,
    #[serde(rename = "tool.completed")]
    ToolCompleted,
    #[serde(rename = "approval.required")]
    ApprovalRequired,
    #[serde(rename = "state.changed")]
    StateChanged,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warning")]
    Warning,
}

/// Runner lifecycle. `Stopped` is terminal: a stopped runner rejects every
/// further command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    #[default]
    Idle,
    Processing,
    Paused,
    Error,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Paused,
    Stopped,
}

/// A filesystem mutation observed after a successful tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: FileChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<PathBuf>,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Name of the tool that produced the change.
    pub tool_name: String,
    pub call_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn event_kind_uses_dotted_wire_names() {
        let ev = Event::now(
            EventKind::ToolStarted,
            "s1",
            serde_json::json!({"tool": "read_file"}),
        );
        let json = serde_json::to_value(&ev).expect("serialize");
        assert_eq!(json["type"], "tool.started");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn runner_state_round_trips() {
        for state in [
            RunnerState::Idle,
            RunnerState::Processing,
            RunnerState::Paused,
            RunnerState::Error,
            RunnerState::Stopped,
        ] {
            let json = serde_json::to_string(&state).expect("serialize");
            let back: RunnerState = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(state, back);
        }
    }
}
