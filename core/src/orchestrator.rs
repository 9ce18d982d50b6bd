//! The planning collaborator behind `/plan`, `/execute`, and friends. The
//! real orchestrator lives outside this workspace; runners call through
//! this trait and persist whatever human-readable summary comes back.

use async_trait::async_trait;

use crate::error::Result;
use steward_protocol::WorkflowOp;

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Create a named plan; returns a human-readable summary.
    async fn create_plan(&self, session_id: &str, name: &str, description: &str)
    -> Result<String>;

    /// Execute the current plan, or a single task of it.
    async fn execute(&self, session_id: &str, task_id: Option<&str>) -> Result<String>;

    async fn status(&self, session_id: &str) -> Result<String>;

    async fn list_plans(&self, session_id: &str) -> Result<String>;

    async fn resume_plan(&self, session_id: &str, plan_id: &str) -> Result<String>;

    async fn workflow(&self, session_id: &str, op: WorkflowOp) -> Result<String>;
}
