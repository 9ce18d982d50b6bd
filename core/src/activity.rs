//! Groups the raw stream of tool calls into a human-readable timeline.
//! Consecutive calls with the same inferred intent collapse into one entry,
//! so "edited 14 files" reads as one activity instead of 14 rows.

use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityIntent {
    Reading,
    Editing,
    Running,
    Searching,
    InspectingHistory,
    Other,
}

/// Infer the timeline bucket from the tool name.
pub fn infer_intent(tool_name: &str) -> ActivityIntent {
    let name = tool_name.to_ascii_lowercase();
    if name.contains("read") || name.contains("cat") || name.contains("view") {
        ActivityIntent::Reading
    } else if name.contains("write")
        || name.contains("edit")
        || name.contains("delete")
        || name.contains("patch")
    {
        ActivityIntent::Editing
    } else if name.contains("shell") || name.contains("exec") || name.contains("run") {
        ActivityIntent::Running
    } else if name.contains("search") || name.contains("find") || name.contains("grep") {
        ActivityIntent::Searching
    } else if name.contains("git") || name.contains("log") || name.contains("diff") {
        ActivityIntent::InspectingHistory
    } else {
        ActivityIntent::Other
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub call_id: String,
    pub tool_name: String,
    pub summary: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub intent: ActivityIntent,
    pub began_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub calls: Vec<CallSummary>,
}

#[derive(Default)]
pub struct ActivityTracker {
    entries: Mutex<Vec<TimelineEntry>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call_id: &str, tool_name: &str, summary: &str, succeeded: bool) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        let intent = infer_intent(tool_name);
        let call = CallSummary {
            call_id: call_id.to_string(),
            tool_name: tool_name.to_string(),
            summary: summary.to_string(),
            succeeded,
        };
        let now = Utc::now();
        match entries.last_mut() {
            Some(last) if last.intent == intent => {
                last.calls.push(call);
                last.ended_at = now;
            }
            _ => entries.push(TimelineEntry {
                intent,
                began_at: now,
                ended_at: now,
                calls: vec![call],
            }),
        }
    }

    pub fn timeline(&self) -> Vec<TimelineEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn consecutive_same_intent_calls_coalesce() {
        let tracker = ActivityTracker::new();
        tracker.record("c1", "read_file", "read src/a.rs", true);
        tracker.record("c2", "read_file", "read src/b.rs", true);
        tracker.record("c3", "write_file", "wrote src/a.rs", true);
        tracker.record("c4", "read_file", "read src/a.rs", true);

        let timeline = tracker.timeline();
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].intent, ActivityIntent::Reading);
        assert_eq!(timeline[0].calls.len(), 2);
        assert_eq!(timeline[1].intent, ActivityIntent::Editing);
        assert_eq!(timeline[2].intent, ActivityIntent::Reading);
    }

    #[test]
    fn intents_cover_the_builtin_tools() {
        assert_eq!(infer_intent("run_shell"), ActivityIntent::Running);
        assert_eq!(infer_intent("apply_patch"), ActivityIntent::Editing);
        assert_eq!(infer_intent("git_log"), ActivityIntent::InspectingHistory);
        assert_eq!(infer_intent("search_text"), ActivityIntent::Searching);
        assert_eq!(infer_intent("mystery_tool"), ActivityIntent::Other);
    }
}
