//! Shared types for a steward session: the command/event envelopes exchanged
//! with transports, the conversation model, tool results, and the approval
//! records decided out of band.
//!
//! Transports (HTTP, WebSocket, SSE) live outside this workspace; they speak
//! these types and nothing more.

mod approvals;
mod git_url;
mod models;
mod protocol;
mod slash;

pub use approvals::ApprovalResponse;
pub use approvals::ApprovalStatus;
pub use approvals::AuditDecision;
pub use approvals::AuditEntry;
pub use approvals::ChangeStatus;
pub use approvals::PendingApproval;
pub use approvals::PendingChange;
pub use git_url::looks_like_git_url;
pub use models::DiffPreview;
pub use models::Message;
pub use models::ToolCallRequest;
pub use models::ToolResult;
pub use protocol::CommandKind;
pub use protocol::Event;
pub use protocol::EventKind;
pub use protocol::FileChange;
pub use protocol::FileChangeKind;
pub use protocol::RunnerState;
pub use protocol::SessionCommand;
pub use protocol::SessionStatus;
pub use slash::SlashCommand;
pub use slash::SlashParse;
pub use slash::WorkflowOp;
pub use slash::parse_slash;
