//! The session record owned by the registry.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use steward_protocol::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// The owning principal (user or service identity).
    pub principal: String,
    pub workspace: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: impl Into<String>, principal: impl Into<String>, workspace: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            principal: principal.into(),
            workspace,
            repo_url: None,
            branch: None,
            created_at: now,
            last_active: now,
            status: SessionStatus::Active,
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}
