//! Surface tool failures as toast notifications. Successes stay quiet.

use std::sync::Arc;

use crate::sinks::ToastLevel;
use crate::sinks::ToastSink;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;

pub fn middleware(sink: Option<Arc<dyn ToastSink>>) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let sink = sink.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let sink = sink.clone();
            Box::pin(async move {
                let tool_name = ctx.tool_name.clone();
                let outcome = next(ctx).await;
                if let Some(sink) = sink {
                    match &outcome {
                        Ok(result) if !result.success => {
                            let summary = result.error.as_deref().unwrap_or("failed");
                            sink.toast(ToastLevel::Error, &format!("{tool_name}: {summary}"));
                        }
                        Err(err) => {
                            sink.toast(ToastLevel::Error, &format!("{tool_name}: {err}"));
                        }
                        Ok(_) => {}
                    }
                }
                outcome
            })
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::Mutex;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;
    use steward_protocol::ToolResult;

    #[derive(Default)]
    struct CapturingToasts {
        messages: Mutex<Vec<String>>,
    }

    impl ToastSink for CapturingToasts {
        fn toast(&self, _level: ToastLevel, message: &str) {
            if let Ok(mut guard) = self.messages.lock() {
                guard.push(message.to_string());
            }
        }
    }

    struct FlakyTool {
        fail: bool,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: serde_json::Value) -> ToolResult {
            if self.fail {
                ToolResult::failure("disk full")
            } else {
                ToolResult::ok()
            }
        }
    }

    async fn run(fail: bool) -> Vec<String> {
        let toasts = Arc::new(CapturingToasts::default());
        let chain = [middleware(Some(Arc::clone(&toasts) as Arc<dyn ToastSink>))];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(FlakyTool { fail }),
            None,
            "c1".to_string(),
            json!({}),
        );
        executor(ctx).await.expect("run");
        let messages = toasts.messages.lock().expect("lock").clone();
        messages
    }

    #[tokio::test]
    async fn failure_raises_a_toast() {
        let messages = run(true).await;
        assert_eq!(messages, vec!["flaky: disk full"]);
    }

    #[tokio::test]
    async fn success_stays_quiet() {
        assert!(run(false).await.is_empty());
    }
}
