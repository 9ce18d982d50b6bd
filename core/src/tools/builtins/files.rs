//! File I/O tools: read, write, edit, delete.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::paths;
use crate::tools::LimitAware;
use crate::tools::Tool;
use crate::tools::ToolInfo;
use crate::tools::WorkDirAware;
use steward_apply_patch::build_unified_diff;
use steward_apply_patch::count_changed_lines;
use steward_protocol::DiffPreview;
use steward_protocol::ToolResult;

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

fn work_dir_of(slot: &Mutex<PathBuf>) -> PathBuf {
    slot.lock().map(|d| d.clone()).unwrap_or_default()
}

fn param_path(params: &Value) -> Option<&str> {
    params.get("path").and_then(Value::as_str)
}

fn diff_preview(path: &str, old: &str, new: &str) -> DiffPreview {
    let unified_diff = build_unified_diff(path, old, new);
    let (added_lines, removed_lines) = count_changed_lines(&unified_diff);
    DiffPreview {
        file_path: path.to_string(),
        unified_diff,
        added_lines,
        removed_lines,
    }
}

pub struct ReadFileTool {
    work_dir: Mutex<PathBuf>,
    max_file_size: AtomicU64,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
            max_file_size: AtomicU64::new(DEFAULT_MAX_FILE_SIZE),
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace, optionally a line range of it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path, relative to the workspace" },
                "offset": { "type": "integer", "description": "1-based first line to return" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(path) = param_path(&params) else {
            return ToolResult::failure("missing required param \"path\"");
        };
        let resolved = paths::resolve(&work_dir_of(&self.work_dir), Path::new(path));

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.len() > self.max_file_size.load(Ordering::SeqCst) => {
                return ToolResult::failure(format!(
                    "{path} is {} bytes, over the configured limit",
                    meta.len()
                ));
            }
            Ok(_) => {}
            Err(err) => return ToolResult::failure(format!("{path}: {err}")),
        }

        let contents = match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => contents,
            Err(err) => return ToolResult::failure(format!("{path}: {err}")),
        };

        let offset = params.get("offset").and_then(Value::as_u64).unwrap_or(1) as usize;
        let limit = params.get("limit").and_then(Value::as_u64).map(|n| n as usize);
        let total_lines = contents.lines().count();
        let selected: String = match limit {
            Some(limit) => contents
                .lines()
                .skip(offset.saturating_sub(1))
                .take(limit)
                .collect::<Vec<_>>()
                .join("\n"),
            None if offset > 1 => contents
                .lines()
                .skip(offset - 1)
                .collect::<Vec<_>>()
                .join("\n"),
            None => contents,
        };

        ToolResult::ok()
            .with_data("path", json!(path))
            .with_data("content", json!(selected))
            .with_data("total_lines", json!(total_lines))
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }

    fn limit_aware(&self) -> Option<&dyn LimitAware> {
        Some(self)
    }

    fn info(&self) -> Option<ToolInfo> {
        Some(ToolInfo {
            category: "file".to_string(),
            intent: "inspect".to_string(),
            summary: "Read file contents".to_string(),
            impact: "none".to_string(),
            cost: "low".to_string(),
            example_usage: r#"{"path": "src/main.rs", "offset": 1, "limit": 80}"#.to_string(),
        })
    }
}

impl WorkDirAware for ReadFileTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

impl LimitAware for ReadFileTool {
    fn set_max_file_size_bytes(&self, bytes: u64) {
        self.max_file_size.store(bytes, Ordering::SeqCst);
    }
}

pub struct WriteFileTool {
    work_dir: Mutex<PathBuf>,
    max_file_size: AtomicU64,
}

impl WriteFileTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
            max_file_size: AtomicU64::new(DEFAULT_MAX_FILE_SIZE),
        }
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(path) = param_path(&params) else {
            return ToolResult::failure("missing required param \"path\"");
        };
        let content = params
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if content.len() as u64 > self.max_file_size.load(Ordering::SeqCst) {
            return ToolResult::failure(format!(
                "refusing to write {} bytes to {path}, over the configured limit",
                content.len()
            ));
        }

        let resolved = paths::resolve(&work_dir_of(&self.work_dir), Path::new(path));
        let old = tokio::fs::read_to_string(&resolved).await.ok();
        let created = old.is_none();
        if let Some(parent) = resolved.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::failure(format!("{path}: {err}"));
        }
        if let Err(err) = tokio::fs::write(&resolved, content).await {
            return ToolResult::failure(format!("{path}: {err}"));
        }

        let mut result = ToolResult::ok()
            .with_data("path", json!(path))
            .with_data("created", json!(created))
            .with_data("bytes", json!(content.len()));
        result.diff_preview = Some(diff_preview(path, old.as_deref().unwrap_or(""), content));
        result
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }

    fn limit_aware(&self) -> Option<&dyn LimitAware> {
        Some(self)
    }

    fn info(&self) -> Option<ToolInfo> {
        Some(ToolInfo {
            category: "file".to_string(),
            intent: "mutate".to_string(),
            summary: "Create or overwrite a file".to_string(),
            impact: "workspace".to_string(),
            cost: "low".to_string(),
            example_usage: "{\"path\": \"notes.md\", \"content\": \"# Notes\\n\"}".to_string(),
        })
    }
}

impl WorkDirAware for WriteFileTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

impl LimitAware for WriteFileTool {
    fn set_max_file_size_bytes(&self, bytes: u64) {
        self.max_file_size.store(bytes, Ordering::SeqCst);
    }
}

pub struct EditFileTool {
    work_dir: Mutex<PathBuf>,
}

impl EditFileTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for EditFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. The target must be unique unless replace_all is set."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean" }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(path) = param_path(&params) else {
            return ToolResult::failure("missing required param \"path\"");
        };
        let Some(old_string) = params.get("old_string").and_then(Value::as_str) else {
            return ToolResult::failure("missing required param \"old_string\"");
        };
        let new_string = params
            .get("new_string")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let replace_all = params
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let resolved = paths::resolve(&work_dir_of(&self.work_dir), Path::new(path));
        let contents = match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => contents,
            Err(err) => return ToolResult::failure(format!("{path}: {err}")),
        };

        let occurrences = contents.matches(old_string).count();
        if occurrences == 0 {
            return ToolResult::failure(format!("old_string not found in {path}"));
        }
        if occurrences > 1 && !replace_all {
            return ToolResult::failure(format!(
                "old_string matches {occurrences} times in {path}; pass replace_all to change every occurrence"
            ));
        }

        let updated = if replace_all {
            contents.replace(old_string, new_string)
        } else {
            contents.replacen(old_string, new_string, 1)
        };
        if let Err(err) = tokio::fs::write(&resolved, &updated).await {
            return ToolResult::failure(format!("{path}: {err}"));
        }

        let mut result = ToolResult::ok()
            .with_data("path", json!(path))
            .with_data(
                "replacements",
                json!(if replace_all { occurrences } else { 1 }),
            );
        result.diff_preview = Some(diff_preview(path, &contents, &updated));
        result
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for EditFileTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

pub struct DeleteFileTool {
    work_dir: Mutex<PathBuf>,
}

impl DeleteFileTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for DeleteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a single file from the workspace."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(path) = param_path(&params) else {
            return ToolResult::failure("missing required param \"path\"");
        };
        let resolved = paths::resolve(&work_dir_of(&self.work_dir), Path::new(path));
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => ToolResult::ok().with_data("path", json!(path)),
            Err(err) => ToolResult::failure(format!("{path}: {err}")),
        }
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for DeleteFileTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}
