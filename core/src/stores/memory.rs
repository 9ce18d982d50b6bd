//! RwLock'd map-backed stores for embedding and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;

use crate::error::Result;
use crate::error::StewardErr;
use crate::stores::MissionStore;
use crate::stores::PolicyStore;
use crate::stores::StoreEvent;
use crate::stores::StoreObserver;
use steward_policy::Policy;
use steward_protocol::ApprovalStatus;
use steward_protocol::AuditEntry;
use steward_protocol::ChangeStatus;
use steward_protocol::PendingApproval;
use steward_protocol::PendingChange;

#[derive(Default)]
struct PolicyState {
    policy: Option<Policy>,
    approvals: HashMap<String, PendingApproval>,
    audit: Vec<AuditEntry>,
}

#[derive(Default)]
pub struct InMemoryPolicyStore {
    state: RwLock<PolicyState>,
    observers: RwLock<Vec<StoreObserver>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, kind: &str, entity_id: &str, session_id: &str, data: serde_json::Value) {
        // Copy the observer list under the lock, call outside it.
        let observers = match self.observers.read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };
        let event = StoreEvent {
            kind: kind.to_string(),
            entity_id: entity_id.to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            data,
        };
        for observer in observers {
            observer(&event);
        }
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, PolicyState>> {
        self.state
            .write()
            .map_err(|_| StewardErr::Store("policy store lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, PolicyState>> {
        self.state
            .read()
            .map_err(|_| StewardErr::Store("policy store lock poisoned".to_string()))
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_active_policy(&self) -> Result<Option<Policy>> {
        Ok(self.read()?.policy.clone().filter(|p| p.active))
    }

    async fn save_policy(&self, policy: &Policy) -> Result<()> {
        self.write()?.policy = Some(policy.clone());
        Ok(())
    }

    async fn create_pending_approval(&self, approval: &PendingApproval) -> Result<()> {
        self.write()?
            .approvals
            .insert(approval.id.clone(), approval.clone());
        self.notify(
            "approval.created",
            &approval.id,
            &approval.session_id,
            serde_json::json!({
                "tool_name": approval.tool_name,
                "risk_score": approval.risk_score,
            }),
        );
        Ok(())
    }

    async fn get_pending_approval(&self, id: &str) -> Result<Option<PendingApproval>> {
        Ok(self.read()?.approvals.get(id).cloned())
    }

    async fn update_pending_approval(
        &self,
        id: &str,
        status: ApprovalStatus,
        decided_by: Option<&str>,
    ) -> Result<()> {
        let session_id = {
            let mut state = self.write()?;
            let Some(approval) = state.approvals.get_mut(id) else {
                return Err(StewardErr::Store(format!("no pending approval {id}")));
            };
            approval.status = status;
            approval.session_id.clone()
        };
        let kind = match status {
            ApprovalStatus::Expired => "approval.expired",
            _ => "approval.decided",
        };
        self.notify(
            kind,
            id,
            &session_id,
            serde_json::json!({ "status": status, "decided_by": decided_by }),
        );
        Ok(())
    }

    async fn list_pending_approvals(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<PendingApproval>> {
        Ok(self
            .read()?
            .approvals
            .values()
            .filter(|approval| approval.status == ApprovalStatus::Pending)
            .filter(|approval| session_id.is_none_or(|sid| approval.session_id == sid))
            .cloned()
            .collect())
    }

    async fn expire_pending_approvals(&self, now: DateTime<Utc>) -> Result<usize> {
        let expired: Vec<(String, String)> = {
            let mut state = self.write()?;
            let mut expired = Vec::new();
            for approval in state.approvals.values_mut() {
                if approval.status == ApprovalStatus::Pending && approval.expires_at <= now {
                    approval.status = ApprovalStatus::Expired;
                    expired.push((approval.id.clone(), approval.session_id.clone()));
                }
            }
            expired
        };
        for (id, session_id) in &expired {
            self.notify(
                "approval.expired",
                id,
                session_id,
                serde_json::json!({ "status": ApprovalStatus::Expired }),
            );
        }
        Ok(expired.len())
    }

    async fn log_tool_execution(&self, entry: &AuditEntry) -> Result<()> {
        self.write()?.audit.push(entry.clone());
        Ok(())
    }

    async fn get_audit_log(&self, session_id: &str) -> Result<Vec<AuditEntry>> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .cloned()
            .collect())
    }

    fn add_observer(&self, observer: StoreObserver) {
        if let Ok(mut guard) = self.observers.write() {
            guard.push(observer);
        }
    }
}

#[derive(Default)]
pub struct InMemoryMissionStore {
    changes: RwLock<HashMap<String, PendingChange>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard_err() -> StewardErr {
        StewardErr::Store("mission store lock poisoned".to_string())
    }
}

#[async_trait]
impl MissionStore for InMemoryMissionStore {
    async fn record_change(&self, change: &PendingChange) -> Result<()> {
        self.changes
            .write()
            .map_err(|_| Self::guard_err())?
            .insert(change.id.clone(), change.clone());
        Ok(())
    }

    async fn get_change(&self, id: &str) -> Result<Option<PendingChange>> {
        Ok(self
            .changes
            .read()
            .map_err(|_| Self::guard_err())?
            .get(id)
            .cloned())
    }

    async fn decide_change(&self, id: &str, status: ChangeStatus, reviewer: &str) -> Result<()> {
        let mut changes = self.changes.write().map_err(|_| Self::guard_err())?;
        let Some(change) = changes.get_mut(id) else {
            return Err(StewardErr::Store(format!("no pending change {id}")));
        };
        change.status = status;
        change.reviewed_by = Some(reviewer.to_string());
        change.decided_at = Some(Utc::now());
        Ok(())
    }

    async fn list_pending(&self, session_id: Option<&str>) -> Result<Vec<PendingChange>> {
        Ok(self
            .changes
            .read()
            .map_err(|_| Self::guard_err())?
            .values()
            .filter(|change| change.status == ChangeStatus::Pending)
            .filter(|change| session_id.is_none_or(|sid| change.session_id == sid))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn observers_see_approval_lifecycle() {
        let store = InMemoryPolicyStore::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.add_observer(Arc::new(move |event| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(event.kind.clone());
            }
        }));

        let approval = PendingApproval {
            id: "call-1".to_string(),
            session_id: "s1".to_string(),
            tool_name: "write_file".to_string(),
            arguments: "{}".to_string(),
            risk_score: 100,
            risk_reasons: vec!["touches_secrets".to_string()],
            status: ApprovalStatus::Pending,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        };
        store
            .create_pending_approval(&approval)
            .await
            .expect("create");
        store
            .update_pending_approval("call-1", ApprovalStatus::Approved, Some("op"))
            .await
            .expect("decide");

        let kinds = seen.lock().expect("lock").clone();
        assert_eq!(kinds, vec!["approval.created", "approval.decided"]);
    }

    #[tokio::test]
    async fn expiry_sweep_only_touches_overdue_pending() {
        let store = InMemoryPolicyStore::new();
        let mut stale = PendingApproval {
            id: "old".to_string(),
            session_id: "s1".to_string(),
            tool_name: "run_shell".to_string(),
            arguments: "{}".to_string(),
            risk_score: 0,
            risk_reasons: Vec::new(),
            status: ApprovalStatus::Pending,
            expires_at: Utc::now() - chrono::Duration::minutes(1),
        };
        store.create_pending_approval(&stale).await.expect("create");
        stale.id = "fresh".to_string();
        stale.expires_at = Utc::now() + chrono::Duration::minutes(5);
        store.create_pending_approval(&stale).await.expect("create");

        let expired = store
            .expire_pending_approvals(Utc::now())
            .await
            .expect("sweep");
        assert_eq!(expired, 1);
        let remaining = store
            .list_pending_approvals(Some("s1"))
            .await
            .expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "fresh");
    }
}
