//! Persistence seams. The runtime never talks to a database directly; it
//! appends conversation messages, records approvals and mission changes,
//! and writes audit rows through these traits. In-tree implementations
//! cover embedding and testing; production backends live elsewhere.

mod memory;
mod transcript;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
pub use memory::InMemoryMissionStore;
pub use memory::InMemoryPolicyStore;
pub use transcript::JsonlTranscriptStore;

use steward_policy::Policy;
use steward_protocol::ApprovalStatus;
use steward_protocol::AuditEntry;
use steward_protocol::ChangeStatus;
use steward_protocol::Message;
use steward_protocol::PendingApproval;
use steward_protocol::PendingChange;

/// Append-only conversation history for one session.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>>;
    async fn append(&self, session_id: &str, message: &Message) -> Result<()>;
    async fn clear(&self, session_id: &str) -> Result<()>;
}

/// A store-side notification: approvals created, decided, or expired.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// `approval.created`, `approval.decided`, `approval.expired`, …
    pub kind: String,
    pub entity_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

pub type StoreObserver = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Policies, pending approvals, and the audit log.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_active_policy(&self) -> Result<Option<Policy>>;
    async fn save_policy(&self, policy: &Policy) -> Result<()>;

    async fn create_pending_approval(&self, approval: &PendingApproval) -> Result<()>;
    async fn get_pending_approval(&self, id: &str) -> Result<Option<PendingApproval>>;
    async fn update_pending_approval(
        &self,
        id: &str,
        status: ApprovalStatus,
        decided_by: Option<&str>,
    ) -> Result<()>;
    async fn list_pending_approvals(&self, session_id: Option<&str>)
    -> Result<Vec<PendingApproval>>;
    /// Flip every pending approval whose deadline has passed to `Expired`.
    /// Returns how many were expired.
    async fn expire_pending_approvals(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn log_tool_execution(&self, entry: &AuditEntry) -> Result<()>;
    async fn get_audit_log(&self, session_id: &str) -> Result<Vec<AuditEntry>>;

    fn add_observer(&self, observer: StoreObserver);
}

/// Mission-control change reviews.
#[async_trait]
pub trait MissionStore: Send + Sync {
    async fn record_change(&self, change: &PendingChange) -> Result<()>;
    async fn get_change(&self, id: &str) -> Result<Option<PendingChange>>;
    async fn decide_change(&self, id: &str, status: ChangeStatus, reviewer: &str) -> Result<()>;
    async fn list_pending(&self, session_id: Option<&str>) -> Result<Vec<PendingChange>>;
}
