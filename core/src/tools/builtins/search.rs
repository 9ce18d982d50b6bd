//! Search tools: regex matches over file contents and glob matches over
//! file names. Both walk the workspace, skip VCS internals, and cap their
//! result counts.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use globset::Glob;
use regex_lite::Regex;
use serde_json::Value;
use serde_json::json;
use walkdir::WalkDir;

use crate::paths;
use crate::tools::Tool;
use crate::tools::WorkDirAware;
use steward_protocol::ToolResult;

const DEFAULT_MAX_RESULTS: usize = 100;
const SKIPPED_DIRS: [&str; 4] = [".git", "target", "node_modules", ".steward"];

fn should_skip(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| SKIPPED_DIRS.contains(&name))
}

pub struct SearchTextTool {
    work_dir: Mutex<PathBuf>,
}

impl SearchTextTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for SearchTextTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTextTool {
    fn name(&self) -> &str {
        "search_text"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string", "description": "Subdirectory to search" },
                "max_results": { "type": "integer" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(pattern) = params.get("pattern").and_then(Value::as_str) else {
            return ToolResult::failure("missing required param \"pattern\"");
        };
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(err) => return ToolResult::failure(format!("invalid pattern: {err}")),
        };
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize);

        let work_dir = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();
        let root = params
            .get("path")
            .and_then(Value::as_str)
            .map_or_else(|| work_dir.clone(), |p| paths::resolve(&work_dir, Path::new(p)));

        let mut matches = Vec::new();
        let mut truncated = false;
        'walk: for entry in WalkDir::new(&root)
            .into_iter()
            .filter_entry(|e| !should_skip(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            // Binary files fail the UTF-8 read and are skipped.
            let Ok(contents) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            let display = entry
                .path()
                .strip_prefix(&work_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            for (index, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    if matches.len() == max_results {
                        truncated = true;
                        break 'walk;
                    }
                    matches.push(json!({
                        "path": display,
                        "line": index + 1,
                        "text": line,
                    }));
                }
            }
        }

        ToolResult::ok()
            .with_data("matches", json!(matches))
            .with_data("count", json!(matches.len()))
            .with_data("truncated", json!(truncated))
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for SearchTextTool {
    fn set_work_dir(&self, dir: &Path) {
        if let Ok(mut guard) = self.work_dir.lock() {
            *guard = dir.to_path_buf();
        }
    }
}

pub struct FindFilesTool {
    work_dir: Mutex<PathBuf>,
}

impl FindFilesTool {
    pub fn new() -> Self {
        Self {
            work_dir: Mutex::new(PathBuf::from(".")),
        }
    }
}

impl Default for FindFilesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FindFilesTool {
    fn name(&self) -> &str {
        "find_files"
    }

    fn description(&self) -> &str {
        "Find files whose workspace-relative path matches a glob."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "glob": { "type": "string" },
                "max_results": { "type": "integer" }
            },
            "required": ["glob"]
        })
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let Some(glob) = params.get("glob").and_then(Value::as_str) else {
            return ToolResult::failure("missing required param \"glob\"");
        };
        let matcher = match Glob::new(glob) {
            Ok(glob) => glob.compile_matcher(),
            Err(err) => return ToolResult::failure(format!("invalid glob: {err}")),
        };
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize);

        let work_dir = self.work_dir.lock().map(|d| d.clone()).unwrap_or_default();
        let mut files = Vec::new();
        let mut truncated = false;
        for entry in WalkDir::new(&work_dir)
            .into_iter()
            .filter_entry(|e| !should_skip(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry.path().strip_prefix(&work_dir).unwrap_or(entry.path());
            if matcher.is_match(relative) {
                if files.len() == max_results {
                    truncated = true;
                    break;
                }
                files.push(json!(relative.to_string_lossy()));
            }
        }

        ToolResult::ok()
            .with_data("files", json!(files))
            .with_data("count", json!(files.len()))
            .with_data("truncated", json!(truncated))
    }

    fn work_dir_aware(&self) -> Option<&dyn WorkDirAware> {
        Some(self)
    }
}

impl WorkDirAware for FindFilesTool {
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

    fn seed(dir: &Path) {
        std::fs::create_dir_all(dir.join("src")).expect("mkdir");
        std::fs::write(dir.join("src/lib.rs"), "pub fn alpha() {}\n").expect("seed");
        std::fs::write(dir.join("src/main.rs"), "fn main() { alpha(); }\n").expect("seed");
        std::fs::write(dir.join("README.md"), "# alpha project\n").expect("seed");
    }

    #[tokio::test]
    async fn finds_matching_lines_with_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path());
        let search = SearchTextTool::new();
        search.set_work_dir(dir.path());

        let result = search.execute(json!({"pattern": r"fn \w+"})).await;
        assert!(result.success);
        assert_eq!(result.data["count"], json!(2));
    }

    #[tokio::test]
    async fn respects_max_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path());
        let search = SearchTextTool::new();
        search.set_work_dir(dir.path());

        let result = search
            .execute(json!({"pattern": "alpha", "max_results": 1}))
            .await;
        assert_eq!(result.data["count"], json!(1));
        assert_eq!(result.data["truncated"], json!(true));
    }

    #[tokio::test]
    async fn glob_matches_relative_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        seed(dir.path());
        let find = FindFilesTool::new();
        find.set_work_dir(dir.path());

        let result = find.execute(json!({"glob": "src/*.rs"})).await;
        assert!(result.success);
        assert_eq!(result.data["count"], json!(2));
    }
}
