//! The workspace-scoped builtin tool set. Every tool resolves relative
//! paths against its configured work directory and advertises exactly the
//! capabilities it honors, so registry fan-out reaches the right ones.

mod files;
mod git;
mod patch;
mod search;
mod shell;

use std::sync::Arc;

pub use files::DeleteFileTool;
pub use files::EditFileTool;
pub use files::ReadFileTool;
pub use files::WriteFileTool;
pub use git::GitDiffTool;
pub use git::GitLogTool;
pub use patch::ApplyPatchTool;
pub use search::FindFilesTool;
pub use search::SearchTextTool;
pub use shell::RunShellTool;

use crate::error::Result;
use crate::tools::Tool;
use crate::tools::ToolRegistry;

pub fn default_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool::new()),
        Arc::new(WriteFileTool::new()),
        Arc::new(EditFileTool::new()),
        Arc::new(DeleteFileTool::new()),
        Arc::new(ApplyPatchTool::new()),
        Arc::new(RunShellTool::new()),
        Arc::new(SearchTextTool::new()),
        Arc::new(FindFilesTool::new()),
        Arc::new(GitDiffTool::new()),
        Arc::new(GitLogTool::new()),
    ]
}

pub fn register_builtins(registry: &ToolRegistry) -> Result<()> {
    for tool in default_tools() {
        registry.register(tool)?;
    }
    Ok(())
}
