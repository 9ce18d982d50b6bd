//! Read-only git tools, shelling out to the git CLI with a short timeout
//! so a huge repository cannot wedge a session.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::tools::Tool;
use crate::tools::WorkDirAware;
use steward_protocol::ToolResult;

const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

async fn run_git(cwd: &Path, args: &[&str]) -> ToolResult {
    let mut command = tokio::process::Command::new("git");
    command.args(args).current_dir(cwd).kill_on_drop(true);

    let output = match tokio::time::timeout(GIT_COMMAND_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => return ToolResult::failure(format!("git: {err}")),
        Err(_) => return ToolResult::failure("git command timed out"),
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if output.status.success() {
        ToolResult::ok().with_data("output", json!(stdout))
    } else {
        ToolResult::failure(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        ))
        .with_data("output", json!(stdout))
    }
}

pub struct GitDiffTool {
    work_dir: Mutex<PathBuf>,
}

impl GitDiffTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for GitDiffTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show the working-tree diff, optionally staged or scoped to a path."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "staged": { "type": "boolean" },
                "path": { "type": "string" }
            }
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let cwd = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();
        let mut args = vec!["diff"];
        if params
            .get("staged")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            args.push("--staged");
        }
        let path = params.get("path").and_then(Value::as_str);
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        run_git(&cwd, &args).await
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for GitDiffTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

pub struct GitLogTool {
    work_dir: Mutex<PathBuf>,
}

impl GitLogTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for GitLogTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        "git_log"
    }

    fn description(&self) -> &str {
        "Show recent commits, one line each."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_count": { "type": "integer" },
                "path": { "type": "string" }
            }
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let cwd = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();
        let max_count = params
            .get("max_count")
            .and_then(Value::as_u64)
            .unwrap_or(20)
            .to_string();
        let mut args = vec!["log", "--oneline", "-n", max_count.as_str()];
        let path = params.get("path").and_then(Value::as_str);
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        run_git(&cwd, &args).await
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for GitLogTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}
