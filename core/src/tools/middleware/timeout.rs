//! Per-tool deadlines. The layer narrows the call's cancellation scope to
//! one bound by the deadline, so in-flight work (child processes, walks)
//! observes the same signal the racing select does.

use std::sync::Arc;

use crate::config::ToolTimeouts;
use crate::error::StewardErr;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;

pub fn middleware(timeouts: ToolTimeouts) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let timeouts = timeouts.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let timeout = timeouts.for_tool(&ctx.tool_name);
            Box::pin(async move {
                let Some(timeout) = timeout else {
                    return next(ctx).await;
                };
                let scoped = ctx.cancel.child_token();
                let inner_ctx = ctx.with_cancel(scoped.clone());
                tokio::select! {
                    outcome = next(inner_ctx) => outcome,
                    _ = tokio::time::sleep(timeout) => {
                        scoped.cancel();
                        Err(StewardErr::ToolDeadline(timeout))
                    }
                }
            })
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::collections::HashMap;
    use std::time::Duration;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;
    use steward_protocol::ToolResult;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: serde_json::Value) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ToolResult::ok()
        }
    }

    fn timeouts(default_ms: u64) -> ToolTimeouts {
        ToolTimeouts {
            default: Some(Duration::from_millis(default_ms)),
            per_tool: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn slow_tool_hits_the_deadline() {
        let chain = [middleware(timeouts(20))];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(SlowTool),
            None,
            "c1".to_string(),
            json!({}),
        );
        let err = executor(ctx).await.expect_err("must time out");
        assert!(matches!(err, StewardErr::ToolDeadline(_)));
    }

    #[tokio::test]
    async fn zero_timeout_disables_the_deadline() {
        let chain = [middleware(ToolTimeouts {
            default: Some(Duration::ZERO),
            per_tool: HashMap::new(),
        })];
        let executor = compose(
            Arc::new(|_ctx: ExecutionContext| {
                Box::pin(async move { Ok(ToolResult::ok()) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(SlowTool),
            None,
            "c1".to_string(),
            json!({}),
        );
        assert!(executor(ctx).await.expect("run").success);
    }
}
