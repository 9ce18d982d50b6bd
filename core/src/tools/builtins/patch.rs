//! Apply a unified diff to the workspace.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::tools::Tool;
use crate::tools::ToolInfo;
use crate::tools::WorkDirAware;
use steward_apply_patch::apply_patch_to_dir;
use steward_protocol::ToolResult;

pub struct ApplyPatchTool {
    work_dir: Mutex<PathBuf>,
}

impl ApplyPatchTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for ApplyPatchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Apply a unified diff to the workspace. Additions, deletions, and renames are supported."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patch": { "type": "string", "description": "Unified diff text" }
            },
            "required": ["patch"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(patch) = params.get("patch").and_then(Value::as_str) else {
            return ToolResult::failure("missing required param \"patch\"");
        };
        let work_dir = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();

        match apply_patch_to_dir(patch, &work_dir) {
            Ok(applied) => {
                let files: Vec<String> = applied
                    .iter()
                    .map(|file| file.path.to_string_lossy().into_owned())
                    .collect();
                ToolResult::ok()
                    .with_data("files", json!(files))
                    .with_data("count", json!(files.len()))
                    .with_display("summary", json!(format!("patched {} file(s)", files.len())))
            }
            Err(err) => ToolResult::failure(err.to_string()),
        }
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }

    fn info(&self) -> Option<ToolInfo> {
        Some(ToolInfo {
            category: "file".to_string(),
            intent: "mutate".to_string(),
            summary: "Apply a unified diff".to_string(),
            impact: "workspace".to_string(),
            cost: "low".to_string(),
            example_usage: r#"{"patch": "--- a/f\n+++ b/f\n@@ -1 +1 @@\n-a\n+b\n"}"#.to_string(),
        })
    }
}

impl WorkDirAware for ApplyPatchTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn applies_a_patch_inside_the_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("f.txt"), "a\n").expect("seed");
        let tool = ApplyPatchTool::new();
        tool.set_work_dir(dir.path());

        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-a\n+b\n";
        let result = tool.execute(json!({"patch": patch})).await;
        assert!(result.success);
        assert_eq!(result.data["count"], json!(1));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).expect("read"),
            "b\n"
        );
    }

    #[tokio::test]
    async fn bad_patch_is_a_failure_result() {
        let tool = ApplyPatchTool::new();
        let result = tool.execute(json!({"patch": "not a diff"})).await;
        assert!(!result.success);
    }
}
