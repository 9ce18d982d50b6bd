//! The name→tool map plus the cached composed executor. Reads (lookup,
//! listing, execution) take the read lock; every mutation takes the write
//! lock and rebuilds the executor before releasing it, so the execution
//! path always sees a chain consistent with the tool set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::ToolSchema;
use crate::config::CALL_ID_PARAM;
use crate::error::Result;
use crate::error::StewardErr;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use crate::tools::SandboxConfig;
use crate::tools::Tool;
use crate::tools::compose;
use crate::tools::container::ContainerSettings;
use crate::tools::container::run_in_container;
use steward_protocol::ToolResult;

struct RegistryState {
    tools: HashMap<String, Arc<dyn Tool>>,
    middleware: Vec<MiddlewareFn>,
    executor: Executor,
}

pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    container: Option<ContainerSettings>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_container(None)
    }

    pub fn with_container(container: Option<ContainerSettings>) -> Self {
        let state = RegistryState {
            tools: HashMap::new(),
            middleware: Vec::new(),
            executor: base_executor(container.clone()),
        };
        Self {
            state: RwLock::new(state),
            container,
        }
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| StewardErr::Store("tool registry lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| StewardErr::Store("tool registry lock poisoned".to_string()))
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        if tool.name().is_empty() {
            return Err(StewardErr::EmptyToolName);
        }
        let mut state = self.write()?;
        state.tools.insert(tool.name().to_string(), tool);
        self.rebuild(&mut state);
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.write()?;
        state.tools.remove(name);
        self.rebuild(&mut state);
        Ok(())
    }

    /// Append a middleware layer. Layers added first sit outermost.
    pub fn use_middleware(&self, middleware: MiddlewareFn) -> Result<()> {
        let mut state = self.write()?;
        state.middleware.push(middleware);
        self.rebuild(&mut state);
        Ok(())
    }

    /// Drop every tool the predicate rejects. Used for per-session
    /// allow/deny lists.
    pub fn filter(&self, predicate: impl Fn(&str) -> bool) -> Result<()> {
        let mut state = self.write()?;
        state.tools.retain(|name, _| predicate(name));
        self.rebuild(&mut state);
        Ok(())
    }

    fn rebuild(&self, state: &mut RegistryState) {
        state.executor = compose(base_executor(self.container.clone()), &state.middleware);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().ok()?.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        match self.read() {
            Ok(state) => {
                let mut names: Vec<String> = state.tools.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Function schemas for the chat request, sorted by name so requests
    /// are stable across runs.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        match self.read() {
            Ok(state) => {
                let mut schemas: Vec<ToolSchema> = state
                    .tools
                    .values()
                    .map(|tool| ToolSchema {
                        name: tool.name().to_string(),
                        description: tool.description().to_string(),
                        parameters: tool.parameters(),
                    })
                    .collect();
                schemas.sort_by(|a, b| a.name.cmp(&b.name));
                schemas
            }
            Err(_) => Vec::new(),
        }
    }

    /// Run one call through the full middleware chain. The call id is taken
    /// from the reserved params key when the runner injected one, otherwise
    /// freshly generated.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        session_id: Option<String>,
        name: &str,
        mut params: Value,
    ) -> Result<ToolResult> {
        if name.is_empty() {
            return Err(StewardErr::EmptyToolName);
        }
        let (tool, executor) = {
            let state = self.read()?;
            let tool = state
                .tools
                .get(name)
                .cloned()
                .ok_or_else(|| StewardErr::ToolNotFound(name.to_string()))?;
            (tool, Arc::clone(&state.executor))
        };

        let call_id = params
            .as_object_mut()
            .and_then(|map| map.remove(CALL_ID_PARAM))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let ctx = ExecutionContext::new(cancel, tool, session_id, call_id, params);
        executor(ctx).await
    }

    // Capability fan-out: each setter reaches every tool that advertises
    // the capability and skips the rest.

    pub fn set_work_dir(&self, dir: &std::path::Path) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.work_dir_aware() {
                aware.set_work_dir(dir);
            }
        });
    }

    pub fn set_env(&self, env: &HashMap<String, String>) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.env_aware() {
                aware.set_env(env);
            }
        });
    }

    pub fn set_max_file_size_bytes(&self, bytes: u64) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.limit_aware() {
                aware.set_max_file_size_bytes(bytes);
            }
        });
    }

    pub fn set_max_exec_time_seconds(&self, seconds: u64) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.limit_aware() {
                aware.set_max_exec_time_seconds(seconds);
            }
        });
    }

    pub fn set_max_output_bytes(&self, bytes: usize) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.limit_aware() {
                aware.set_max_output_bytes(bytes);
            }
        });
    }

    pub fn set_sandbox_config(&self, config: &SandboxConfig) {
        self.for_each_tool(|tool| {
            if let Some(aware) = tool.sandbox_aware() {
                aware.set_sandbox_config(config);
            }
        });
    }

    fn for_each_tool(&self, f: impl Fn(&Arc<dyn Tool>)) {
        if let Ok(state) = self.read() {
            for tool in state.tools.values() {
                f(tool);
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The innermost executor: route to the container runner when configured,
/// otherwise prefer the tool's cancellation-aware entry point.
fn base_executor(container: Option<ContainerSettings>) -> Executor {
    Arc::new(move |ctx: ExecutionContext| {
        let container = container.clone();
        Box::pin(async move {
            if let Some(settings) = container {
                return run_in_container(&settings, &ctx).await;
            }
            let params = ctx.params.clone();
            let result: ToolResult = match ctx.tool.contextual() {
                Some(contextual) => contextual.execute_with_context(&ctx, params).await,
                None => ctx.tool.execute(params).await,
            };
            Ok(result)
        })
    })
}
