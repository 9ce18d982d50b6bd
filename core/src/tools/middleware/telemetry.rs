//! Outermost layer: exactly one `tool.started` per call, followed by
//! exactly one of `tool.completed` / `tool.failed`, on every path out of
//! the chain including panics and gate rejections. Shell calls get an
//! additional `shell.*` pair with command, duration, and output previews.

use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::sinks::TelemetryEvent;
use crate::sinks::TelemetrySink;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;

const PREVIEW_BYTES: usize = 256;
const COMMAND_PREVIEW_BYTES: usize = 200;

pub fn middleware(sink: Arc<dyn TelemetrySink>) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let sink = Arc::clone(&sink);
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                let is_shell = ctx.tool_name == "run_shell";
                sink.emit(event(&ctx, "tool.started", operation_fields(&ctx)));
                if is_shell {
                    let mut fields = Map::new();
                    fields.insert("command".to_string(), json!(command_preview(&ctx)));
                    sink.emit(event(&ctx, "shell.started", fields));
                }

                let outcome = next(ctx.clone()).await;

                let duration_ms = ctx.start_time.elapsed().as_millis() as u64;
                let mut fields = operation_fields(&ctx);
                fields.insert("duration_ms".to_string(), json!(duration_ms));
                let metadata = ctx.metadata_snapshot();
                if let Some(stack) = metadata.get("panic_stack") {
                    fields.insert("panic_stack".to_string(), stack.clone());
                }

                let kind = match &outcome {
                    Ok(result) if result.success => "tool.completed",
                    Ok(result) => {
                        if let Some(error) = &result.error {
                            fields.insert("error".to_string(), json!(error));
                        }
                        "tool.failed"
                    }
                    Err(err) => {
                        fields.insert("error".to_string(), json!(err.to_string()));
                        "tool.failed"
                    }
                };
                if let Ok(result) = &outcome
                    && let Some(diff) = &result.diff_preview
                {
                    fields.insert("added_lines".to_string(), json!(diff.added_lines));
                    fields.insert("removed_lines".to_string(), json!(diff.removed_lines));
                }
                sink.emit(event(&ctx, kind, fields));

                if is_shell {
                    let mut fields = Map::new();
                    fields.insert("command".to_string(), json!(command_preview(&ctx)));
                    fields.insert("duration_ms".to_string(), json!(duration_ms));
                    let kind = match &outcome {
                        Ok(result) if result.success => {
                            shell_output_fields(&mut fields, result);
                            "shell.completed"
                        }
                        Ok(result) => {
                            shell_output_fields(&mut fields, result);
                            "shell.failed"
                        }
                        Err(err) => {
                            fields.insert("error".to_string(), json!(err.to_string()));
                            "shell.failed"
                        }
                    };
                    sink.emit(event(&ctx, kind, fields));
                }

                outcome
            })
        })
    })
}

fn event(ctx: &ExecutionContext, kind: &str, fields: Map<String, Value>) -> TelemetryEvent {
    TelemetryEvent {
        kind: kind.to_string(),
        tool_name: ctx.tool_name.clone(),
        call_id: ctx.call_id.clone(),
        session_id: ctx.session_id.clone(),
        attempt: ctx.attempt(),
        fields,
    }
}

/// File path, line ranges, and command pulled from the params, when present.
fn operation_fields(ctx: &ExecutionContext) -> Map<String, Value> {
    let mut fields = Map::new();
    for key in ["path", "file_path"] {
        if let Some(path) = ctx.params.get(key).and_then(Value::as_str) {
            fields.insert("file_path".to_string(), json!(path));
            break;
        }
    }
    for key in ["start_line", "end_line", "offset", "limit"] {
        if let Some(value) = ctx.params.get(key).and_then(Value::as_u64) {
            fields.insert(key.to_string(), json!(value));
        }
    }
    if ctx.tool_name == "run_shell" {
        fields.insert("command".to_string(), json!(command_preview(ctx)));
    }
    fields
}

/// Single-line, length-capped rendering of the shell command. Tokenizing
/// through shlex collapses quoting artifacts; commands it cannot tokenize
/// fall back to whitespace normalization.
fn command_preview(ctx: &ExecutionContext) -> String {
    let command = ctx
        .params
        .get("command")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let collapsed = shlex::split(command)
        .map(|parts| parts.join(" "))
        .unwrap_or_else(|| command.split_whitespace().collect::<Vec<_>>().join(" "));
    truncate(&collapsed, COMMAND_PREVIEW_BYTES)
}

fn shell_output_fields(fields: &mut Map<String, Value>, result: &steward_protocol::ToolResult) {
    if let Some(code) = result.data.get("exit_code").and_then(Value::as_i64) {
        fields.insert("exit_code".to_string(), json!(code));
    }
    for stream in ["stdout", "stderr"] {
        if let Some(text) = result.data.get(stream).and_then(Value::as_str) {
            fields.insert(format!("{stream}_preview"), json!(truncate(text, PREVIEW_BYTES)));
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::tools::Tool;
    use crate::tools::compose;
    use steward_protocol::ToolResult;

    #[derive(Default)]
    struct CapturingSink {
        kinds: Mutex<Vec<String>>,
    }

    impl TelemetrySink for CapturingSink {
        fn emit(&self, event: TelemetryEvent) {
            if let Ok(mut guard) = self.kinds.lock() {
                guard.push(event.kind);
            }
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value) -> ToolResult {
            ToolResult::failure("boom")
        }
    }

    fn run_ctx(tool: Arc<dyn Tool>) -> ExecutionContext {
        ExecutionContext::new(
            CancellationToken::new(),
            tool,
            Some("s1".to_string()),
            "c1".to_string(),
            json!({}),
        )
    }

    #[tokio::test]
    async fn started_is_paired_with_exactly_one_terminal_event() {
        let sink = Arc::new(CapturingSink::default());
        let chain = [middleware(Arc::clone(&sink) as Arc<dyn TelemetrySink>)];
        let executor = compose(
            Arc::new(|ctx: ExecutionContext| {
                Box::pin(async move {
                    let _ = ctx;
                    Ok(ToolResult::ok())
                })
            }),
            &chain,
        );
        executor(run_ctx(Arc::new(FailTool))).await.expect("run");
        let kinds = sink.kinds.lock().expect("lock").clone();
        assert_eq!(kinds, vec!["tool.started", "tool.completed"]);
    }

    #[tokio::test]
    async fn failure_result_emits_tool_failed() {
        let sink = Arc::new(CapturingSink::default());
        let chain = [middleware(Arc::clone(&sink) as Arc<dyn TelemetrySink>)];
        let tool: Arc<dyn Tool> = Arc::new(FailTool);
        let inner_tool = Arc::clone(&tool);
        let executor = compose(
            Arc::new(move |ctx: ExecutionContext| {
                let tool = Arc::clone(&inner_tool);
                Box::pin(async move { Ok(tool.execute(ctx.params).await) })
            }),
            &chain,
        );
        executor(run_ctx(tool)).await.expect("run");
        let kinds = sink.kinds.lock().expect("lock").clone();
        assert_eq!(kinds, vec!["tool.started", "tool.failed"]);
    }
}
