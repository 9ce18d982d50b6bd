//! Cap the serialized size of tool results. Oversized string fields are
//! clipped to half the budget first; if the result is still too large the
//! data payload is replaced wholesale. Results that already declare their
//! own abridging are left alone.

use std::sync::Arc;

use serde_json::Value;
use serde_json::json;

use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use steward_protocol::ToolResult;

const DEFAULT_SUFFIX: &str = "...[truncated]";

pub fn middleware(max_bytes: usize, suffix: Option<&str>) -> MiddlewareFn {
    let suffix = suffix.unwrap_or(DEFAULT_SUFFIX).to_string();
    Arc::new(move |next: Executor| {
        let suffix = suffix.clone();
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let suffix = suffix.clone();
            Box::pin(async move {
                let mut result = next(ctx.clone()).await?;
                if result.should_abridge {
                    return Ok(result);
                }
                let serialized = serde_json::to_vec(&result)?.len();
                if serialized <= max_bytes {
                    return Ok(result);
                }

                let budget = max_bytes / 2;
                clip_strings(&mut result.data, budget, &suffix);
                clip_strings(&mut result.display_data, budget, &suffix);
                if let Some(error) = result.error.take() {
                    result.error = Some(clip(&error, budget, &suffix));
                }
                ctx.insert_metadata("truncated", json!(true));

                if serde_json::to_vec(&result)?.len() > max_bytes {
                    result.data = serde_json::Map::new();
                    result.data.insert("truncated".to_string(), json!(true));
                    result.display_data = serde_json::Map::new();
                    result.display_data.insert(
                        "message".to_string(),
                        json!("result too large to display"),
                    );
                }
                Ok(result)
            })
        })
    })
}

fn clip_strings(map: &mut serde_json::Map<String, Value>, budget: usize, suffix: &str) {
    for value in map.values_mut() {
        if let Value::String(text) = value
            && text.len() > budget
        {
            *text = clip(text, budget, suffix);
        }
    }
}

fn clip(text: &str, budget: usize, suffix: &str) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{suffix}", &text[..cut])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use async_trait::async_trait;

    struct ChattyTool {
        payload: String,
        abridged: bool,
    }

    #[async_trait]
    impl Tool for ChattyTool {
        fn name(&self) -> &str {
            "chatty"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value) -> ToolResult {
            let mut result = ToolResult::ok().with_data("output", json!(self.payload));
            result.should_abridge = self.abridged;
            result
        }
    }

    async fn run(payload: String, abridged: bool, max: usize) -> ToolResult {
        let chain = [middleware(max, None)];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        );
        let ctx = ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(ChattyTool { payload, abridged }),
            None,
            "c1".to_string(),
            json!({}),
        );
        executor(ctx).await.expect("run")
    }

    #[tokio::test]
    async fn result_is_clipped_under_the_cap() {
        let result = run("x".repeat(4096), false, 1024).await;
        let size = serde_json::to_vec(&result).expect("serialize").len();
        assert!(size <= 1024, "serialized size {size} exceeds cap");
        assert!(
            result.data["output"]
                .as_str()
                .expect("string")
                .ends_with("...[truncated]")
        );
    }

    #[tokio::test]
    async fn pre_abridged_results_are_left_alone() {
        let payload = "x".repeat(4096);
        let result = run(payload.clone(), true, 1024).await;
        assert_eq!(result.data["output"], json!(payload));
    }

    #[tokio::test]
    async fn small_results_pass_untouched() {
        let result = run("short".to_string(), false, 1024).await;
        assert_eq!(result.data["output"], json!("short"));
    }
}
