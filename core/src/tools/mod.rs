//! The tool contract and the execution pipeline around it.
//!
//! A tool is a named, schema'd operation. The registry owns the name→tool
//! map and a single composed executor: the inner invocation wrapped by the
//! middleware chain, outermost first. Optional capabilities (work dir, env,
//! limits, sandbox, rich metadata) are separate traits a tool opts into by
//! returning `Some(self)` from the matching accessor; the registry fans
//! configuration out to whoever advertises the capability and skips the
//! rest.

pub mod builtins;
pub mod container;
pub mod middleware;
mod registry;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub use crate::config::SandboxConfig;
use crate::error::Result;
pub use registry::ToolRegistry;
use steward_protocol::ToolResult;

/// Rich metadata a tool may report for UIs and telemetry.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub category: String,
    pub intent: String,
    pub summary: String,
    pub impact: String,
    pub cost: String,
    pub example_usage: String,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-Schema-shaped parameter description advertised to the model.
    fn parameters(&self) -> Value;
    async fn execute(&self, params: Value) -> ToolResult;

    // Optional capabilities. The default is "not supported".
    fn contextual(&self) -> Option<&dyn ContextualExecute> {
        None
    }
    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        None
    }
    fn env_aware(&self) -> Option<&dyn EnvAware> {
        None
    }
    fn limit_aware(&self) -> Option<&dyn LimitAware> {
        None
    }
    fn sandbox_aware(&self) -> Option<&dyn SandboxAware> {
        None
    }
    fn info(&self) -> Option<ToolInfo> {
        None
    }
}

/// Cancellation-aware execution. Tools that spawn processes or loop over
/// large trees implement this so a stopped session kills them promptly.
#[async_trait]
pub trait ContextualExecute: Send + Sync {
    async fn execute_with_context(&self, ctx: &ExecutionContext, params: Value) -> ToolResult;
}

pub trait WorkDirAware: Send + Sync {
    fn set_work_dir(&self, dir: &Path);
}

pub trait EnvAware: Send + Sync {
    fn set_env(&self, env: &HashMap<String, String>);
}

pub trait LimitAware: Send + Sync {
    fn set_max_file_size_bytes(&self, _bytes: u64) {}
    fn set_max_exec_time_seconds(&self, _seconds: u64) {}
    fn set_max_output_bytes(&self, _bytes: usize) {}
}

pub trait SandboxAware: Send + Sync {
    fn set_sandbox_config(&self, config: &SandboxConfig);
}

/// Everything a middleware layer can see about one invocation. Cheap to
/// clone; `attempt` and `metadata` are shared so an inner layer's updates
/// are visible to the outer ones on the way out.
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationToken,
    pub tool_name: String,
    pub tool: Arc<dyn Tool>,
    pub session_id: Option<String>,
    pub call_id: String,
    pub params: Value,
    pub start_time: Instant,
    attempt: Arc<AtomicU32>,
    metadata: Arc<Mutex<Map<String, Value>>>,
}

impl ExecutionContext {
    pub fn new(
        cancel: CancellationToken,
        tool: Arc<dyn Tool>,
        session_id: Option<String>,
        call_id: String,
        params: Value,
    ) -> Self {
        Self {
            cancel,
            tool_name: tool.name().to_string(),
            tool,
            session_id,
            call_id,
            params,
            start_time: Instant::now(),
            attempt: Arc::new(AtomicU32::new(1)),
            metadata: Arc::new(Mutex::new(Map::new())),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn bump_attempt(&self) -> u32 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn insert_metadata(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut guard) = self.metadata.lock() {
            guard.insert(key.into(), value);
        }
    }

    pub fn metadata_snapshot(&self) -> Map<String, Value> {
        self.metadata.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Replace the cancellation scope (the timeout middleware narrows it).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

pub type ExecFuture = BoxFuture<'static, Result<ToolResult>>;

/// The composed invocation function. Middleware wrap one of these and
/// return another.
pub type Executor = Arc<dyn Fn(ExecutionContext) -> ExecFuture + Send + Sync>;

pub type MiddlewareFn = Arc<dyn Fn(Executor) -> Executor + Send + Sync>;

/// Wrap `base` with `chain`, first element outermost.
pub fn compose(base: Executor, chain: &[MiddlewareFn]) -> Executor {
    let mut executor = base;
    for middleware in chain.iter().rev() {
        executor = middleware(executor);
    }
    executor
}
