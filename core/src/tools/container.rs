//! Container-routed execution. When a compose file is configured, tool
//! calls run inside the project's service container instead of in-process:
//! the tool name is invoked with the JSON params piped over stdin and a
//! JSON `ToolResult` is read back from stdout.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

use crate::config::ContainerConfig;
use crate::error::Result;
use crate::error::StewardErr;
use crate::tools::ExecutionContext;
use steward_protocol::ToolResult;

#[derive(Debug, Clone)]
pub struct ContainerSettings {
    pub engine: String,
    pub compose_file: PathBuf,
    pub service: String,
}

impl ContainerSettings {
    pub fn from_config(config: &ContainerConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            compose_file: config.compose_file.clone(),
            service: config.service.clone(),
        }
    }
}

pub async fn run_in_container(
    settings: &ContainerSettings,
    ctx: &ExecutionContext,
) -> Result<ToolResult> {
    let mut command = tokio::process::Command::new(&settings.engine);
    command
        .arg("compose")
        .arg("-f")
        .arg(&settings.compose_file)
        .arg("run")
        .arg("--rm")
        .arg("-T")
        .arg(&settings.service)
        .arg(&ctx.tool_name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|err| {
        StewardErr::Container(format!("failed to spawn {}: {err}", settings.engine))
    })?;

    let params = serde_json::to_vec(&ctx.params)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&params)
            .await
            .map_err(|err| StewardErr::Container(format!("writing params: {err}")))?;
        drop(stdin);
    }

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut out_pipe = child
        .stdout
        .take()
        .ok_or_else(|| StewardErr::Container("stdout pipe unavailable".to_string()))?;
    let mut err_pipe = child
        .stderr
        .take()
        .ok_or_else(|| StewardErr::Container("stderr pipe unavailable".to_string()))?;

    let status = tokio::select! {
        status = async {
            let (_, _, status) = tokio::join!(
                out_pipe.read_to_end(&mut stdout),
                err_pipe.read_to_end(&mut stderr),
                child.wait(),
            );
            status
        } => status.map_err(StewardErr::Io)?,
        _ = ctx.cancel.cancelled() => {
            child.start_kill().ok();
            return Err(StewardErr::Cancelled);
        }
    };

    if !status.success() {
        return Err(StewardErr::Container(format!(
            "{} exited with {status}: {}",
            ctx.tool_name,
            String::from_utf8_lossy(&stderr)
        )));
    }

    serde_json::from_slice::<ToolResult>(&stdout).map_err(|err| {
        StewardErr::Container(format!("unparseable tool result from container: {err}"))
    })
}
