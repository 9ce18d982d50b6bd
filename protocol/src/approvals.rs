//! Records decided out of band: mission-control change reviews, risk-scored
//! tool approvals, and the audit trail both feed.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A unit of review for the mission-control gate: a file path, a unified
/// diff, and a status decided by a reviewer while the originating tool call
/// stays parked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    pub agent_id: String,
    pub session_id: String,
    /// Target file path, or a synthetic identifier for patches that touch
    /// several files.
    pub file_path: String,
    pub diff: String,
    pub reason: String,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// A risk-scored tool call waiting on an operator decision. The id is the
/// tool call id, so a response can be matched against exactly one wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub arguments: String,
    pub risk_score: i64,
    pub risk_reasons: Vec<String>,
    pub status: ApprovalStatus,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// An operator's answer to a pending approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    /// Parse an approval command payload: either a JSON object or the
    /// shorthand `approve|yes|y` (which targets the currently pending
    /// approval, if any).
    pub fn parse(content: &str, pending_id: Option<&str>) -> Option<Self> {
        if let Ok(response) = serde_json::from_str::<Self>(content) {
            return Some(response);
        }
        let word = content.trim().to_ascii_lowercase();
        if matches!(word.as_str(), "approve" | "yes" | "y") {
            return pending_id.map(|id| Self {
                id: id.to_string(),
                approved: true,
                reason: None,
            });
        }
        None
    }
}

/// One row of the execution audit trail. Tool outputs are truncated to 10 KB
/// before an entry is logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub tool_name: String,
    pub tool_input: String,
    pub tool_output: String,
    pub risk_score: i64,
    pub decision: AuditDecision,
    pub decided_by: String,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Auto,
    Approved,
    Rejected,
    Expired,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_json_approval() {
        let response =
            ApprovalResponse::parse(r#"{"id":"call-7","approved":false,"reason":"nope"}"#, None)
                .expect("should parse");
        assert_eq!(
            response,
            ApprovalResponse {
                id: "call-7".to_string(),
                approved: false,
                reason: Some("nope".to_string()),
            }
        );
    }

    #[test]
    fn shorthand_targets_pending_approval() {
        let response = ApprovalResponse::parse("  y ", Some("call-3")).expect("should parse");
        assert!(response.approved);
        assert_eq!(response.id, "call-3");
    }

    #[test]
    fn shorthand_without_pending_is_rejected() {
        assert_eq!(ApprovalResponse::parse("yes", None), None);
        assert_eq!(ApprovalResponse::parse("maybe", Some("call-3")), None);
    }
}
