//! Indeterminate progress entries for long-running tools. The entry is
//! cleared by a drop guard, so even a panic unwinding through the chain
//! (or a dropped future after cancellation) cannot leave a stale spinner.

use std::collections::HashSet;
use std::sync::Arc;

use crate::sinks::ProgressTracker;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;

struct ProgressGuard {
    tracker: Arc<dyn ProgressTracker>,
    call_id: String,
}

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.tracker.end(&self.call_id);
    }
}

pub fn middleware(tracker: Arc<dyn ProgressTracker>, long_running: HashSet<String>) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let tracker = Arc::clone(&tracker);
        let long_running = long_running.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let tracker = Arc::clone(&tracker);
            let tracked = long_running.contains(&ctx.tool_name);
            Box::pin(async move {
                let _guard = tracked.then(|| {
                    tracker.begin(&ctx.call_id, &ctx.tool_name);
                    ProgressGuard {
                        tracker: Arc::clone(&tracker),
                        call_id: ctx.call_id.clone(),
                    }
                });
                next(ctx).await
            })
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::sinks::InMemoryProgress;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;
    use steward_protocol::ToolResult;

    struct ShellStub;

    #[async_trait]
    impl Tool for ShellStub {
        fn name(&self) -> &str {
            "run_shell"
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

    #[tokio::test]
    async fn entry_is_cleared_even_when_the_inner_layer_errors() {
        let progress = Arc::new(InMemoryProgress::default());
        let chain = [middleware(
            Arc::clone(&progress) as Arc<dyn ProgressTracker>,
            ["run_shell".to_string()].into_iter().collect(),
        )];
        let seen_during = Arc::new(std::sync::Mutex::new(false));
        let seen = Arc::clone(&seen_during);
        let progress_inner = Arc::clone(&progress);
        let executor = compose(
            Arc::new(move |_ctx: ExecutionContext| {
                let seen = Arc::clone(&seen);
                let progress = Arc::clone(&progress_inner);
                Box::pin(async move {
                    if let Ok(mut guard) = seen.lock() {
                        *guard = !progress.active_calls().is_empty();
                    }
                    Err(crate::error::StewardErr::Transient("boom".to_string()))
                })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(ShellStub),
            None,
            "c1".to_string(),
            json!({}),
        );
        executor(ctx).await.expect_err("inner fails");
        assert!(*seen_during.lock().expect("lock"), "entry missing mid-run");
        assert!(progress.active_calls().is_empty(), "entry not cleared");
    }
}
