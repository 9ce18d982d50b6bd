//! Extension hooks around tool invocation. Pre-hooks run globals-first and
//! may rewrite params or abort the call with a synthetic result; post-hooks
//! run in reverse registration order and may rewrite the outcome.

use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::Result;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use steward_protocol::ToolResult;

pub enum PreHookOutcome {
    /// Proceed, possibly with rewritten params.
    Continue(Value),
    /// Skip the tool entirely. Without a synthetic result the caller gets a
    /// failure result carrying the reason.
    Abort {
        reason: String,
        result: Option<ToolResult>,
    },
}

pub type PreHook = Arc<dyn Fn(&ExecutionContext, Value) -> PreHookOutcome + Send + Sync>;
pub type PostHook = Arc<dyn Fn(&ExecutionContext, Result<ToolResult>) -> Result<ToolResult> + Send + Sync>;

const GLOBAL: &str = "*";

#[derive(Default)]
struct Hooks {
    pre: Vec<(String, PreHook)>,
    post: Vec<(String, PostHook)>,
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Hooks>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `pattern` is `*` for all tools or an exact tool name.
    pub fn register_pre(&self, pattern: &str, hook: PreHook) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.pre.push((pattern.to_string(), hook));
        }
    }

    pub fn register_post(&self, pattern: &str, hook: PostHook) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.post.push((pattern.to_string(), hook));
        }
    }

    /// Applicable pre-hooks: globals first, then tool-specific, each group
    /// in registration order.
    fn pre_hooks_for(&self, tool: &str) -> Vec<PreHook> {
        let Ok(hooks) = self.hooks.read() else {
            return Vec::new();
        };
        let globals = hooks
            .pre
            .iter()
            .filter(|(pattern, _)| pattern == GLOBAL)
            .map(|(_, hook)| Arc::clone(hook));
        let specific = hooks
            .pre
            .iter()
            .filter(|(pattern, _)| pattern == tool)
            .map(|(_, hook)| Arc::clone(hook));
        globals.chain(specific).collect()
    }

    /// Applicable post-hooks in reverse registration order.
    fn post_hooks_for(&self, tool: &str) -> Vec<PostHook> {
        let Ok(hooks) = self.hooks.read() else {
            return Vec::new();
        };
        hooks
            .post
            .iter()
            .rev()
            .filter(|(pattern, _)| pattern == GLOBAL || pattern == tool)
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }
}

pub fn middleware(registry: Arc<HookRegistry>) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let registry = Arc::clone(&registry);
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let registry = Arc::clone(&registry);
            Box::pin(async move {
                let mut params = ctx.params.clone();
                for hook in registry.pre_hooks_for(&ctx.tool_name) {
                    match hook(&ctx, params) {
                        PreHookOutcome::Continue(next_params) => params = next_params,
                        PreHookOutcome::Abort { reason, result } => {
                            tracing::debug!(tool = %ctx.tool_name, %reason, "pre-hook aborted call");
                            return Ok(result.unwrap_or_else(|| {
                                ToolResult::failure(format!("aborted by hook: {reason}"))
                            }));
                        }
                    }
                }

                let mut outcome = next(ctx.clone().with_params(params)).await;
                for hook in registry.post_hooks_for(&ctx.tool_name) {
                    outcome = hook(&ctx, outcome);
                }
                outcome
            })
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;

    struct ParamEcho;

    #[async_trait]
    impl Tool for ParamEcho {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            ""
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: Value) -> ToolResult {
            ToolResult::ok().with_data("params", params)
        }
    }

    fn executor_with(registry: Arc<HookRegistry>) -> Executor {
        let chain = [middleware(registry)];
        compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move { Ok(ctx.tool.execute(ctx.params.clone()).await) })
            }),
            &chain,
        )
    }

    fn ctx(params: Value) -> ExecutionContext {
        ExecutionContext::new(
            CancellationToken::new(),
            Arc::new(ParamEcho),
            None,
            "c1".to_string(),
            params,
        )
    }

    #[tokio::test]
    async fn pre_hook_rewrites_params_globals_first() {
        let registry = Arc::new(HookRegistry::new());
        registry.register_pre(
            "echo",
            Arc::new(|_, mut params| {
                params["order"] = json!(format!("{}-specific", params["order"].as_str().unwrap_or("")));
                PreHookOutcome::Continue(params)
            }),
        );
        registry.register_pre(
            "*",
            Arc::new(|_, mut params| {
                params["order"] = json!("global");
                PreHookOutcome::Continue(params)
            }),
        );

        let result = executor_with(registry)(ctx(json!({"order": "start"})))
            .await
            .expect("run");
        // The global ran first even though it registered second.
        assert_eq!(result.data["params"]["order"], json!("global-specific"));
    }

    #[tokio::test]
    async fn abort_skips_the_tool() {
        let registry = Arc::new(HookRegistry::new());
        registry.register_pre(
            "*",
            Arc::new(|_, _| PreHookOutcome::Abort {
                reason: "blocked by test".to_string(),
                result: None,
            }),
        );
        let result = executor_with(registry)(ctx(json!({}))).await.expect("run");
        assert!(!result.success);
        assert!(result.error.expect("error").contains("blocked by test"));
    }

    #[tokio::test]
    async fn post_hooks_run_in_reverse_order() {
        let registry = Arc::new(HookRegistry::new());
        for tag in ["a", "b"] {
            let tag = tag.to_string();
            registry.register_post(
                "*",
                Arc::new(move |_, outcome| {
                    let mut result = outcome?;
                    result.data.insert("last_post".to_string(), json!(tag));
                    Ok(result)
                }),
            );
        }
        let result = executor_with(registry)(ctx(json!({}))).await.expect("run");
        // Reverse registration order: "a" runs last.
        assert_eq!(result.data["last_post"], json!("a"));
    }
}
