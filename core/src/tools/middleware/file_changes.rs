//! Innermost layer: after a successful mutation, tell the file watcher
//! what changed. Paths come from the result when the tool reported one,
//! from the params otherwise; `apply_patch` changes are recovered from the
//! patch itself.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

use crate::paths;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use crate::watcher::FileWatcher;
use steward_apply_patch::FileOp;
use steward_apply_patch::parse_unified;
use steward_protocol::FileChange;
use steward_protocol::FileChangeKind;
use steward_protocol::ToolResult;

const MUTATING_TOOLS: [&str; 4] = ["write_file", "edit_file", "delete_file", "apply_patch"];

pub fn middleware(watcher: Arc<FileWatcher>, work_dir: PathBuf) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let watcher = Arc::clone(&watcher);
        let work_dir = work_dir.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let watcher = Arc::clone(&watcher);
            let work_dir = work_dir.clone();
            Box::pin(async move {
                let outcome = next(ctx.clone()).await;
                if let Ok(result) = &outcome
                    && result.success
                    && !result.needs_approval
                    && MUTATING_TOOLS.contains(&ctx.tool_name.as_str())
                {
                    for (path, kind) in affected(&ctx, result) {
                        watcher.notify(build_change(&work_dir, &ctx, path, kind));
                    }
                }
                outcome
            })
        })
    })
}

fn affected(ctx: &ExecutionContext, result: &ToolResult) -> Vec<(PathBuf, FileChangeKind)> {
    match ctx.tool_name.as_str() {
        "write_file" => {
            let created = result
                .data
                .get("created")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let kind = if created {
                FileChangeKind::Created
            } else {
                FileChangeKind::Modified
            };
            reported_path(ctx, result)
                .map(|path| vec![(path, kind)])
                .unwrap_or_default()
        }
        "edit_file" => reported_path(ctx, result)
            .map(|path| vec![(path, FileChangeKind::Modified)])
            .unwrap_or_default(),
        "delete_file" => reported_path(ctx, result)
            .map(|path| vec![(path, FileChangeKind::Deleted)])
            .unwrap_or_default(),
        "apply_patch" => {
            let Some(patch) = ctx.params.get("patch").and_then(Value::as_str) else {
                return Vec::new();
            };
            match parse_unified(patch) {
                Ok(parsed) => parsed
                    .files
                    .iter()
                    .map(|file| {
                        let kind = match file.op {
                            FileOp::Add => FileChangeKind::Created,
                            FileOp::Delete => FileChangeKind::Deleted,
                            FileOp::Update if file.old_path.is_some() => FileChangeKind::Renamed,
                            FileOp::Update => FileChangeKind::Modified,
                        };
                        (file.path.clone(), kind)
                    })
                    .collect(),
                Err(_) => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Prefer the path the tool reported in its result; fall back to the params.
fn reported_path(ctx: &ExecutionContext, result: &ToolResult) -> Option<PathBuf> {
    for source in [&result.data, &result.display_data] {
        for key in ["path", "file_path"] {
            if let Some(path) = source.get(key).and_then(Value::as_str) {
                return Some(PathBuf::from(path));
            }
        }
    }
    ctx.params
        .get("path")
        .or_else(|| ctx.params.get("file_path"))
        .and_then(Value::as_str)
        .map(PathBuf::from)
}

fn build_change(
    work_dir: &Path,
    ctx: &ExecutionContext,
    path: PathBuf,
    kind: FileChangeKind,
) -> FileChange {
    let resolved = paths::resolve(work_dir, &path);
    let (size, modified_at) = std::fs::metadata(&resolved)
        .map(|meta| {
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            (meta.len(), modified)
        })
        .unwrap_or((0, Utc::now()));
    FileChange {
        path,
        kind,
        old_path: None,
        size,
        modified_at,
        tool_name: ctx.tool_name.clone(),
        call_id: ctx.call_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;

    struct WriteStub;

    #[async_trait]
    impl Tool for WriteStub {
        fn name(&self) -> &str {
            "write_file"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: serde_json::Value) -> ToolResult {
            ToolResult::ok()
                .with_data("path", params["path"].clone())
                .with_data("created", json!(true))
        }
    }

    #[tokio::test]
    async fn successful_write_notifies_the_watcher() {
        let watcher = Arc::new(FileWatcher::new(8));
        let chain = [middleware(Arc::clone(&watcher), PathBuf::from("/ws"))];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(WriteStub),
            None,
            "c1".to_string(),
            json!({"path": "notes/todo.md"}),
        );
        executor(ctx).await.expect("run");

        let recent = watcher.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].path, PathBuf::from("notes/todo.md"));
        assert_eq!(recent[0].kind, FileChangeKind::Created);
        assert_eq!(recent[0].tool_name, "write_file");
    }

    #[tokio::test]
    async fn patch_changes_come_from_the_diff_headers() {
        struct PatchStub;
        #[async_trait]
        impl Tool for PatchStub {
            fn name(&self) -> &str {
                "apply_patch"
            }
            fn description(&self) -> &str {
                ""
            }
            fn parameters(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _params: serde_json::Value) -> ToolResult {
                ToolResult::ok()
            }
        }

        let watcher = Arc::new(FileWatcher::new(8));
        let chain = [middleware(Arc::clone(&watcher), PathBuf::from("/ws"))];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let patch = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1 @@\n+hi\n";
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(PatchStub),
            None,
            "c2".to_string(),
            json!({"patch": patch}),
        );
        executor(ctx).await.expect("run");

        let recent = watcher.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, FileChangeKind::Created);
        assert_eq!(recent[0].path, PathBuf::from("new.txt"));
    }

    #[tokio::test]
    async fn failed_results_do_not_notify() {
        struct FailingWrite;
        #[async_trait]
        impl Tool for FailingWrite {
            fn name(&self) -> &str {
                "write_file"
            }
            fn description(&self) -> &str {
                ""
            }
            fn parameters(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            async fn execute(&self, _params: serde_json::Value) -> ToolResult {
                ToolResult::failure("denied")
            }
        }

        let watcher = Arc::new(FileWatcher::new(8));
        let chain = [middleware(Arc::clone(&watcher), PathBuf::from("/ws"))];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(FailingWrite),
            None,
            "c3".to_string(),
            json!({"path": "x.txt"}),
        );
        executor(ctx).await.expect("run");
        assert!(watcher.recent(10).is_empty());
    }
}
