//! Plugin tools: external commands described by a small JSON manifest and
//! invoked with the call params piped over stdin. Loading is opt-in and
//! scans the user directory, the project directory, and nothing else.

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::tools::Tool;
use crate::tools::ToolRegistry;
use crate::tools::WorkDirAware;
use steward_protocol::ToolResult;

#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub description: String,
    #[serde(default = "default_parameters")]
    pub parameters: Value,
    /// argv to spawn; params arrive as JSON on stdin, a `ToolResult` is
    /// expected as JSON on stdout.
    pub command: Vec<String>,
}

fn default_parameters() -> Value {
    json!({"type": "object"})
}

pub struct CommandPluginTool {
    manifest: PluginManifest,
    work_dir: Mutex<PathBuf>,
}

impl CommandPluginTool {
    pub fn new(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

#[async_trait]
impl Tool for CommandPluginTool {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn parameters(&self) -> Value {
        self.manifest.parameters.clone()
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(program) = self.manifest.command.first() else {
            return ToolResult::failure("plugin manifest has an empty command");
        };
        let cwd = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();

        let mut command = tokio::process::Command::new(program);
        command
            .args(&self.manifest.command[1..])
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ToolResult::failure(format!("failed to spawn plugin {program}: {err}"));
            }
        };
        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&params).unwrap_or_default();
            if let Err(err) = stdin.write_all(&payload).await {
                return ToolResult::failure(format!("writing plugin params: {err}"));
            }
        }

        let mut stdout = Vec::new();
        if let Some(mut pipe) = child.stdout.take()
            && let Err(err) = pipe.read_to_end(&mut stdout).await
        {
            return ToolResult::failure(format!("reading plugin output: {err}"));
        }
        match child.wait().await {
            Ok(status) if status.success() => serde_json::from_slice(&stdout)
                .unwrap_or_else(|err| {
                    ToolResult::failure(format!("unparseable plugin result: {err}"))
                }),
            Ok(status) => ToolResult::failure(format!("plugin exited with {status}")),
            Err(err) => ToolResult::failure(format!("waiting on plugin: {err}")),
        }
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for CommandPluginTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

/// Load manifests from `~/.steward/plugins` and `<workspace>/.steward/
/// plugins`. Missing directories are fine; malformed manifests are skipped
/// with a warning. Returns how many tools were registered.
pub async fn load_default_plugins(registry: &ToolRegistry, workspace: &Path) -> Result<usize> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".steward").join("plugins"));
    }
    candidates.push(workspace.join(".steward").join("plugins"));

    let mut loaded = 0;
    for dir in candidates {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let manifest: PluginManifest = match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str(&contents) {
                    Ok(manifest) => manifest,
                    Err(err) => {
                        warn!(path = %path.display(), %err, "skipping malformed plugin manifest");
                        continue;
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), %err, "unreadable plugin manifest");
                    continue;
                }
            };
            debug!(name = %manifest.name, path = %path.display(), "loading plugin");
            registry.register(std::sync::Arc::new(CommandPluginTool::new(manifest)))?;
            loaded += 1;
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use super::*;

    #[tokio::test]
    async fn loads_manifests_from_the_workspace_dir() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let plugin_dir = workspace.path().join(".steward/plugins");
        std::fs::create_dir_all(&plugin_dir).expect("mkdir");
        std::fs::write(
            plugin_dir.join("hello.json"),
            r#"{"name":"hello","description":"say hello","command":["true"]}"#,
        )
        .expect("write manifest");
        std::fs::write(plugin_dir.join("notes.txt"), "ignored").expect("write noise");

        let registry = ToolRegistry::new();
        let loaded = load_default_plugins(&registry, workspace.path())
            .await
            .expect("load");
        assert_eq!(loaded, 1);
        assert!(registry.get("hello").is_some());
    }

    #[tokio::test]
    async fn missing_directories_load_nothing() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let registry = ToolRegistry::new();
        let loaded = load_default_plugins(&registry, workspace.path())
            .await
            .expect("load");
        assert_eq!(loaded, 0);
    }
}
