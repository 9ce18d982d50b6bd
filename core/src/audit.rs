//! Audit-trail construction. Every executed, rejected, or expired tool call
//! leaves exactly one row; outputs are clipped to 10 KB before logging.

use chrono::Utc;

use steward_protocol::AuditDecision;
use steward_protocol::AuditEntry;

const MAX_AUDIT_OUTPUT: usize = 10 * 1024;

/// Clip on a char boundary and mark the cut.
pub fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_AUDIT_OUTPUT {
        return output.to_string();
    }
    let mut cut = MAX_AUDIT_OUTPUT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated]", &output[..cut])
}

#[allow(clippy::too_many_arguments)]
pub fn build_entry(
    session_id: &str,
    approval_id: Option<&str>,
    tool_name: &str,
    tool_input: &str,
    tool_output: &str,
    risk_score: i64,
    decision: AuditDecision,
    decided_by: &str,
    duration_ms: u64,
) -> AuditEntry {
    AuditEntry {
        session_id: session_id.to_string(),
        approval_id: approval_id.map(str::to_string),
        tool_name: tool_name.to_string(),
        tool_input: truncate_output(tool_input),
        tool_output: truncate_output(tool_output),
        risk_score,
        decision,
        decided_by: decided_by.to_string(),
        executed_at: Utc::now(),
        duration_ms,
    }
}
