//! Panic containment. A panicking tool must not take the runner down; the
//! panic value and a captured backtrace land in the call metadata and the
//! caller sees an ordinary failure result.

use std::backtrace::Backtrace;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::json;

use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use steward_protocol::ToolResult;

pub fn middleware() -> MiddlewareFn {
    Arc::new(|next: Executor| {
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            Box::pin(async move {
                match std::panic::AssertUnwindSafe(next(ctx.clone()))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic);
                        let stack = Backtrace::force_capture().to_string();
                        tracing::error!(
                            tool = %ctx.tool_name,
                            call_id = %ctx.call_id,
                            %message,
                            "tool panicked"
                        );
                        ctx.insert_metadata("panic", json!(message));
                        ctx.insert_metadata("panic_stack", json!(stack));
                        Ok(ToolResult::failure(format!("tool panicked: {message}")))
                    }
                }
            })
        })
    })
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
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

    struct PanickyTool;

    #[async_trait]
    impl Tool for PanickyTool {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: serde_json::Value) -> ToolResult {
            panic!("deliberate test panic");
        }
    }

    #[tokio::test]
    async fn panic_becomes_failure_result_with_metadata() {
        let chain = [middleware()];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(PanickyTool),
            None,
            "c1".to_string(),
            json!({}),
        );
        let result = executor(ctx.clone()).await.expect("recovered");
        assert!(!result.success);
        assert!(result.error.expect("error").contains("deliberate test panic"));
        let metadata = ctx.metadata_snapshot();
        assert!(metadata.contains_key("panic"));
        assert!(metadata.contains_key("panic_stack"));
    }
}
