//! The shell tool. Output is captured with byte and line caps, the child
//! is killed on timeout or cancellation, and interactive sessions are
//! refused outright: there is no terminal on the other side.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use crate::tools::ContextualExecute;
use crate::tools::EnvAware;
use crate::tools::ExecutionContext;
use crate::tools::LimitAware;
use crate::tools::SandboxAware;
use crate::tools::SandboxConfig;
use crate::tools::Tool;
use crate::tools::ToolInfo;
use crate::tools::WorkDirAware;
use steward_protocol::ToolResult;

const DEFAULT_MAX_OUTPUT: usize = 10 * 1024;
const MAX_OUTPUT_LINES: usize = 256;
const DEFAULT_EXEC_SECS: u64 = 120;

// Synthetic exit codes for killed children: 128 + signal-ish code.
const TIMEOUT_EXIT: i32 = 128 + 64;
const CANCEL_EXIT: i32 = 128 + 9;

/// Set in the child environment when the sandbox config forbids network
/// access, so cooperating wrappers can refuse early.
pub const NETWORK_DISABLED_ENV_VAR: &str = "STEWARD_SANDBOX_NETWORK_DISABLED";

pub struct RunShellTool {
    work_dir: Mutex<PathBuf>,
    env: Mutex<HashMap<String, String>>,
    sandbox: Mutex<SandboxConfig>,
    max_output_bytes: AtomicUsize,
    max_exec_secs: AtomicU64,
}

impl RunShellTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
            env: Mutex::new(HashMap::new()),
            sandbox: Mutex::new(SandboxConfig::default()),
            max_output_bytes: AtomicUsize::new(DEFAULT_MAX_OUTPUT),
            max_exec_secs: AtomicU64::new(DEFAULT_EXEC_SECS),
        }
    }

    async fn run(&self, params: Value, cancel: CancellationToken) -> ToolResult {
        let Some(command) = params.get("command").and_then(Value::as_str) else {
            return ToolResult::failure("missing required param \"command\"");
        };
        if params
            .get("interactive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return ToolResult::failure(
                "interactive shells are not available in headless sessions",
            );
        }

        let max_secs = self.max_exec_secs.load(Ordering::SeqCst);
        let timeout_secs = params
            .get("timeout_seconds")
            .and_then(Value::as_u64)
            .map_or(max_secs, |requested| requested.min(max_secs));
        let max_output = self.max_output_bytes.load(Ordering::SeqCst);

        let cwd = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();
        let env = self.env.lock().map(|e| e.clone()).unwrap_or_default();
        let sandbox = self
            .sandbox
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .envs(&env)
            // No stdin: commands probing for a terminal should see EOF, not
            // hang forever.
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if sandbox.enabled && !sandbox.allow_network {
            cmd.env(NETWORK_DISABLED_ENV_VAR, "1");
        }

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return ToolResult::failure(format!("failed to spawn shell: {err}")),
        };

        let stdout_handle = child.stdout.take().map(|pipe| {
            tokio::spawn(read_capped(BufReader::new(pipe), max_output, MAX_OUTPUT_LINES))
        });
        let stderr_handle = child.stderr.take().map(|pipe| {
            tokio::spawn(read_capped(BufReader::new(pipe), max_output, MAX_OUTPUT_LINES))
        });

        let exit_code = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => return ToolResult::failure(format!("waiting on shell: {err}")),
            },
            _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
                child.start_kill().ok();
                TIMEOUT_EXIT
            }
            _ = cancel.cancelled() => {
                child.start_kill().ok();
                CANCEL_EXIT
            }
        };

        let stdout = collect_stream(stdout_handle).await;
        let stderr = collect_stream(stderr_handle).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut result = if exit_code == 0 {
            ToolResult::ok()
        } else if exit_code == TIMEOUT_EXIT {
            ToolResult::failure(format!("command timed out after {timeout_secs}s"))
        } else if exit_code == CANCEL_EXIT {
            ToolResult::failure("command cancelled")
        } else {
            ToolResult::failure(format!("command exited with status {exit_code}"))
        };
        result = result
            .with_data("command", json!(command))
            .with_data("exit_code", json!(exit_code))
            .with_data("stdout", json!(stdout))
            .with_data("stderr", json!(stderr))
            .with_data("duration_ms", json!(duration_ms));
        result
    }
}

impl Default for RunShellTool {
    fn default() -> Self {
        Self::new()
    }
}

async fn collect_stream(
    handle: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>,
) -> String {
    match handle {
        Some(handle) => match handle.await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            _ => String::new(),
        },
        None => String::new(),
    }
}

/// Read to EOF, keeping only the first `max_output` bytes / `max_lines`
/// lines. Reading continues past the caps so the child never blocks on a
/// full pipe.
async fn read_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    max_output: usize,
    max_lines: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(max_output.min(8 * 1024));
    let mut tmp = [0u8; 8192];
    let mut remaining_bytes = max_output;
    let mut remaining_lines = max_lines;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if remaining_bytes > 0 && remaining_lines > 0 {
            let mut copy_len = 0;
            for &byte in &tmp[..n] {
                if remaining_bytes == 0 || remaining_lines == 0 {
                    break;
                }
                copy_len += 1;
                remaining_bytes -= 1;
                if byte == b'\n' {
                    remaining_lines -= 1;
                }
            }
            buf.extend_from_slice(&tmp[..copy_len]);
        }
    }
    Ok(buf)
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        "run_shell"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and capture its output."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_seconds": { "type": "integer" },
                "interactive": { "type": "boolean", "description": "Unsupported in headless sessions" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        self.run(params, CancellationToken::new()).await
    }

    fn contextual(&self) -> Option<&dyn ContextualExecute> {
        Some(self)
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }

    fn env_aware(&self) -> Option<&dyn EnvAware> {
        Some(self)
    }

    fn limit_aware(&self) -> Option<&dyn LimitAware> {
        Some(self)
    }

    fn sandbox_aware(&self) -> Option<&dyn SandboxAware> {
        Some(self)
    }

    fn info(&self) -> Option<ToolInfo> {
        Some(ToolInfo {
            category: "shell".to_string(),
            intent: "execute".to_string(),
            summary: "Run a shell command".to_string(),
            impact: "workspace and environment".to_string(),
            cost: "medium".to_string(),
            example_usage: r#"{"command": "cargo check", "timeout_seconds": 300}"#.to_string(),
        })
    }
}

#[async_trait]
impl ContextualExecute for RunShellTool {
    async fn execute_with_context(&self, ctx: &ExecutionContext, params: Value) -> ToolResult {
        self.run(params, ctx.cancel.clone()).await
    }
}

impl WorkDirAware for RunShellTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

impl EnvAware for RunShellTool {
    fn set_env(&self, env: &HashMap<String, String>) {
        if let Ok(mut guard) = self.env.lock() {
            *guard = env.clone();
        }
    }
}

impl LimitAware for RunShellTool {
    fn set_max_exec_time_seconds(&self, seconds: u64) {
        self.max_exec_secs.store(seconds, Ordering::SeqCst);
    }

    fn set_max_output_bytes(&self, bytes: usize) {
        self.max_output_bytes.store(bytes, Ordering::SeqCst);
    }
}

impl SandboxAware for RunShellTool {
    fn set_sandbox_config(&self, config: &SandboxConfig) {
        if let Ok(mut guard) = self.sandbox.lock() {
            *guard = config.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let shell = RunShellTool::new();
        let result = shell.execute(json!({"command": "echo hello"})).await;
        assert!(result.success);
        assert_eq!(result.data["exit_code"], json!(0));
        assert_eq!(result.data["stdout"], json!("hello\n"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_output() {
        let shell = RunShellTool::new();
        let result = shell
            .execute(json!({"command": "echo oops >&2; exit 3"}))
            .await;
        assert!(!result.success);
        assert_eq!(result.data["exit_code"], json!(3));
        assert_eq!(result.data["stderr"], json!("oops\n"));
    }

    #[tokio::test]
    async fn interactive_mode_is_refused() {
        let shell = RunShellTool::new();
        let result = shell
            .execute(json!({"command": "bash", "interactive": true}))
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn output_is_capped_by_bytes() {
        let shell = RunShellTool::new();
        shell.set_max_output_bytes(100);
        let result = shell
            .execute(json!({"command": "yes x | head -n 1000"}))
            .await;
        assert!(result.success);
        let stdout = result.data["stdout"].as_str().expect("stdout");
        assert!(stdout.len() <= 100);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let shell = RunShellTool::new();
        let result = shell
            .execute(json!({"command": "sleep 30", "timeout_seconds": 1}))
            .await;
        assert!(!result.success);
        assert_eq!(result.data["exit_code"], json!(TIMEOUT_EXIT));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let shell = std::sync::Arc::new(RunShellTool::new());
        let cancel = CancellationToken::new();
        let handle = {
            let shell = std::sync::Arc::clone(&shell);
            let cancel = cancel.clone();
            tokio::spawn(async move { shell.run(json!({"command": "sleep 30"}), cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let result = handle.await.expect("join");
        assert!(!result.success);
        assert_eq!(result.data["exit_code"], json!(CANCEL_EXIT));
    }
}
