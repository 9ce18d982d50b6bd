//! The mission-control change gate. File-mutating calls (and clipboard
//! reads, which exfiltrate user data) are parked behind a recorded pending
//! change carrying a unified diff; the call proceeds only once a reviewer
//! approves the change out of band. The store is polled cooperatively, so
//! a stopped session abandons the wait promptly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::config::MissionConfig;
use crate::error::Result;
use crate::paths;
use crate::stores::MissionStore;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use steward_apply_patch::build_unified_diff;
use steward_apply_patch::parse_unified;
use steward_protocol::ChangeStatus;
use steward_protocol::PendingChange;
use steward_protocol::ToolResult;

/// Tools whose effects must be reviewed before they happen.
const GATED_TOOLS: [&str; 3] = ["write_file", "apply_patch", "browser_clipboard_read"];

pub struct MissionGate {
    pub store: Arc<dyn MissionStore>,
    pub config: MissionConfig,
    pub poll_interval: Duration,
    pub work_dir: PathBuf,
}

pub fn middleware(gate: Option<MissionGate>) -> MiddlewareFn {
    let gate = gate.map(Arc::new);
    Arc::new(move |next: Executor| {
        let gate = gate.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let gate = gate.clone();
            Box::pin(async move {
                let armed = gate
                    .as_ref()
                    .is_some_and(|g| g.config.require_approval && ctx.session_id.is_some());
                if !armed || !GATED_TOOLS.contains(&ctx.tool_name.as_str()) {
                    return next(ctx).await;
                }
                let Some(gate) = gate else {
                    return next(ctx).await;
                };

                match wait_for_decision(&gate, &ctx).await? {
                    ChangeStatus::Approved => next(ctx).await,
                    status => Ok(rejection_result(&ctx.tool_name, status)),
                }
            })
        })
    })
}

async fn wait_for_decision(gate: &MissionGate, ctx: &ExecutionContext) -> Result<ChangeStatus> {
    let (file_path, diff) = describe_change(gate, ctx);
    let session_id = ctx.session_id.clone().unwrap_or_default();
    let change = PendingChange {
        id: Uuid::new_v4().to_string(),
        agent_id: gate.config.agent_id.clone(),
        session_id,
        file_path,
        diff,
        reason: change_reason(ctx),
        status: ChangeStatus::Pending,
        reviewed_by: None,
        created_at: Utc::now(),
        decided_at: None,
    };
    gate.store.record_change(&change).await?;
    ctx.insert_metadata("pending_change_id", json!(change.id));
    tracing::info!(
        change_id = %change.id,
        tool = %ctx.tool_name,
        "tool call parked pending change review"
    );

    let deadline = tokio::time::Instant::now() + gate.config.decision_timeout;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(gate.poll_interval) => {}
            _ = ctx.cancel.cancelled() => {
                gate.store
                    .decide_change(&change.id, ChangeStatus::Expired, "system")
                    .await
                    .ok();
                return Ok(ChangeStatus::Expired);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            gate.store
                .decide_change(&change.id, ChangeStatus::Expired, "system")
                .await
                .ok();
            return Ok(ChangeStatus::Expired);
        }
        match gate.store.get_change(&change.id).await? {
            Some(current) if current.status != ChangeStatus::Pending => {
                return Ok(current.status);
            }
            Some(_) => {}
            // The change vanished from the store; treat as expired rather
            // than looping forever.
            None => return Ok(ChangeStatus::Expired),
        }
    }
}

/// The reviewable document: target path plus a unified diff of what the
/// call intends to do.
fn describe_change(gate: &MissionGate, ctx: &ExecutionContext) -> (String, String) {
    match ctx.tool_name.as_str() {
        "write_file" => {
            let path = param_str(&ctx.params, "path").unwrap_or("unknown");
            let new = param_str(&ctx.params, "content").unwrap_or_default();
            let resolved = paths::resolve(&gate.work_dir, std::path::Path::new(path));
            let old = std::fs::read_to_string(&resolved).unwrap_or_default();
            (path.to_string(), build_unified_diff(path, &old, new))
        }
        "apply_patch" => {
            let patch = param_str(&ctx.params, "patch").unwrap_or_default();
            let file_path = parse_unified(patch)
                .ok()
                .and_then(|parsed| parsed.affected_paths().first().cloned())
                .map_or_else(
                    || format!("patch:{}", ctx.call_id),
                    |p| p.to_string_lossy().into_owned(),
                );
            (file_path, patch.to_string())
        }
        // No file is touched; reviewers still see what would leave the
        // workspace.
        _ => (
            format!("clipboard:{}", ctx.call_id),
            "clipboard read requested".to_string(),
        ),
    }
}

fn change_reason(ctx: &ExecutionContext) -> String {
    param_str(&ctx.params, "reason")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} requested by session agent", ctx.tool_name))
}

fn rejection_result(tool_name: &str, status: ChangeStatus) -> ToolResult {
    let verb = match status {
        ChangeStatus::Rejected => "rejected by reviewer",
        ChangeStatus::Expired => "expired before review",
        _ => "not approved",
    };
    let mut result = ToolResult::failure(format!("{tool_name} change {verb}"));
    result
        .data
        .insert("change_status".to_string(), json!(status));
    result
}

fn param_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::stores::InMemoryMissionStore;
    use crate::tools::Tool;
    use crate::tools::compose;

    struct WriteStub;

    #[async_trait]
    impl Tool for WriteStub {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value) -> ToolResult {
            ToolResult::ok().with_data("written", json!(true))
        }
    }

    fn gated_executor(store: Arc<InMemoryMissionStore>, work_dir: PathBuf) -> Executor {
        let gate = MissionGate {
            store,
            config: MissionConfig {
                require_approval: true,
                agent_id: "agent-1".to_string(),
                decision_timeout: Duration::from_secs(5),
            },
            poll_interval: Duration::from_millis(10),
            work_dir,
        };
        let chain = [middleware(Some(gate))];
        compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        )
    }

    fn write_ctx(dir: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(WriteStub),
            Some("s1".to_string()),
            "c1".to_string(),
            json!({"path": dir.join("note.txt").to_string_lossy(), "content": "new"}),
        )
    }

    #[tokio::test]
    async fn approved_change_lets_the_write_proceed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("note.txt"), "old").expect("seed");
        let store = Arc::new(InMemoryMissionStore::new());
        let executor = gated_executor(Arc::clone(&store), dir.path().to_path_buf());

        let approver = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                loop {
                    let pending = store.list_pending(None).await.expect("list");
                    if let Some(change) = pending.first() {
                        assert!(change.diff.contains("-old"));
                        assert!(change.diff.contains("+new"));
                        store
                            .decide_change(&change.id, ChangeStatus::Approved, "reviewer")
                            .await
                            .expect("approve");
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = executor(write_ctx(dir.path())).await.expect("run");
        approver.await.expect("approver task");
        assert!(result.success);
    }

    #[tokio::test]
    async fn rejected_change_blocks_the_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryMissionStore::new());
        let executor = gated_executor(Arc::clone(&store), dir.path().to_path_buf());

        let rejecter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                loop {
                    let pending = store.list_pending(None).await.expect("list");
                    if let Some(change) = pending.first() {
                        store
                            .decide_change(&change.id, ChangeStatus::Rejected, "reviewer")
                            .await
                            .expect("reject");
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let result = executor(write_ctx(dir.path())).await.expect("run");
        rejecter.await.expect("rejecter task");
        assert!(!result.success);
        assert_eq!(result.data["change_status"], json!("rejected"));
    }

    #[tokio::test]
    async fn ungated_tool_passes_straight_through() {
        struct ReadStub;
        #[async_trait]
        impl Tool for ReadStub {
            fn name(&self) -> &str {
                "read_file"
            }
            fn description(&self) -> &str {
                ""
            }
            fn parameters(&self) -> Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _params: Value) -> ToolResult {
                ToolResult::ok()
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(InMemoryMissionStore::new());
        let executor = gated_executor(store, dir.path().to_path_buf());
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(ReadStub),
            Some("s1".to_string()),
            "c2".to_string(),
            json!({"path": "x"}),
        );
        let result = executor(ctx).await.expect("run");
        assert!(result.success);
    }
}
