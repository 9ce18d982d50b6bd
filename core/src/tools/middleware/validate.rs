//! Parameter validation in front of the tool. A failing validator returns
//! a failure result without ever invoking the tool, and the reason lands in
//! the call metadata.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;

use crate::paths;
use crate::tools::ExecutionContext;
use crate::tools::Executor;
use crate::tools::MiddlewareFn;
use steward_protocol::ToolResult;

#[derive(Debug, Clone)]
pub enum Validator {
    /// The named param must be a sane path: non-empty, free of NUL, and,
    /// when a base is configured, resolving inside it.
    Path {
        param: String,
        base: Option<PathBuf>,
    },
    /// The named param must be a non-empty string or non-empty array.
    NonEmpty { param: String },
}

impl Validator {
    fn check(&self, params: &Value) -> std::result::Result<(), String> {
        match self {
            Validator::Path { param, base } => {
                let Some(value) = params.get(param) else {
                    return Err(format!("missing required param {param:?}"));
                };
                let Some(path) = value.as_str() else {
                    return Err(format!("param {param:?} must be a string path"));
                };
                if path.is_empty() {
                    return Err(format!("param {param:?} must not be empty"));
                }
                if path.contains('\0') {
                    return Err(format!("param {param:?} contains a NUL byte"));
                }
                if let Some(base) = base {
                    let resolved = paths::resolve(base, Path::new(path));
                    if !paths::is_within(base, &resolved) {
                        return Err(format!(
                            "path {path:?} resolves outside the workspace"
                        ));
                    }
                }
                Ok(())
            }
            Validator::NonEmpty { param } => {
                let Some(value) = params.get(param) else {
                    return Err(format!("missing required param {param:?}"));
                };
                let empty = match value {
                    Value::String(s) => s.is_empty(),
                    Value::Array(items) => items.is_empty(),
                    _ => false,
                };
                if empty {
                    return Err(format!("param {param:?} must not be empty"));
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct ValidatorSet {
    per_tool: HashMap<String, Vec<Validator>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The validators every workspace-scoped registry installs.
    pub fn standard(work_dir: &Path) -> Self {
        let base = Some(work_dir.to_path_buf());
        let mut set = Self::new();
        for tool in ["read_file", "write_file", "edit_file", "delete_file"] {
            set.add(
                tool,
                Validator::Path {
                    param: "path".to_string(),
                    base: base.clone(),
                },
            );
        }
        set.add(
            "run_shell",
            Validator::NonEmpty {
                param: "command".to_string(),
            },
        );
        set.add(
            "apply_patch",
            Validator::NonEmpty {
                param: "patch".to_string(),
            },
        );
        set.add(
            "search_text",
            Validator::NonEmpty {
                param: "pattern".to_string(),
            },
        );
        set
    }

    pub fn add(&mut self, tool: &str, validator: Validator) {
        self.per_tool
            .entry(tool.to_string())
            .or_default()
            .push(validator);
    }

    fn validate(&self, tool: &str, params: &Value) -> std::result::Result<(), String> {
        let Some(validators) = self.per_tool.get(tool) else {
            return Ok(());
        };
        for validator in validators {
            validator.check(params)?;
        }
        Ok(())
    }
}

pub fn middleware(validators: Arc<ValidatorSet>) -> MiddlewareFn {
    Arc::new(move |next: Executor| {
        let validators = Arc::clone(&validators);
        Arc::new(move |ctx: ExecutionContext| {
            let next = Arc::clone(&next);
            let validators = Arc::clone(&validators);
            Box::pin(async move {
                if let Err(reason) = validators.validate(&ctx.tool_name, &ctx.params) {
                    ctx.insert_metadata("validation_error", json!(reason));
                    return Ok(ToolResult::failure(format!("validation failed: {reason}")));
                }
                next(ctx).await
            })
        })
    })
}
