//! Grammar for the fixed slash-command vocabulary.
//!
//! A message whose first token contains a path separator is demoted to
//! ordinary input, so a pasted `/pkg/foo` is never mistaken for a command.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Clear,
    Plan { name: String, description: String },
    Execute { task_id: Option<String> },
    Status,
    Plans,
    Resume { plan_id: String },
    Workflow(WorkflowOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOp {
    Status,
    Pause,
    Resume,
    Phases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashParse {
    Command(SlashCommand),
    /// The message is not a slash command and should be treated as input.
    Input,
    /// The first token was `/word` but `word` is not in the vocabulary, or
    /// required arguments were missing.
    Invalid(String),
}

pub fn parse_slash(message: &str) -> SlashParse {
    let trimmed = message.trim();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return SlashParse::Input;
    };

    let mut tokens = rest.split_whitespace();
    let Some(word) = tokens.next() else {
        return SlashParse::Input;
    };
    // `/pkg/foo` or `/c:\path`: a pasted path, not a command.
    if word.contains('/') || word.contains('\\') {
        return SlashParse::Input;
    }

    match word {
        "clear" => SlashParse::Command(SlashCommand::Clear),
        "plan" => {
            let Some(name) = tokens.next() else {
                return SlashParse::Invalid("usage: /plan <name> <description>".to_string());
            };
            let description = tokens.collect::<Vec<_>>().join(" ");
            if description.is_empty() {
                return SlashParse::Invalid("usage: /plan <name> <description>".to_string());
            }
            SlashParse::Command(SlashCommand::Plan {
                name: name.to_string(),
                description,
            })
        }
        "execute" => SlashParse::Command(SlashCommand::Execute {
            task_id: tokens.next().map(str::to_string),
        }),
        "status" => SlashParse::Command(SlashCommand::Status),
        "plans" => SlashParse::Command(SlashCommand::Plans),
        "resume" => match tokens.next() {
            Some(plan_id) => SlashParse::Command(SlashCommand::Resume {
                plan_id: plan_id.to_string(),
            }),
            None => SlashParse::Invalid("usage: /resume <planID>".to_string()),
        },
        "workflow" => {
            let op = match tokens.next() {
                Some("status") => WorkflowOp::Status,
                Some("pause") => WorkflowOp::Pause,
                Some("resume") => WorkflowOp::Resume,
                Some("phases") => WorkflowOp::Phases,
                other => {
                    return SlashParse::Invalid(format!(
                        "unknown workflow operation: {}",
                        other.unwrap_or("<none>")
                    ));
                }
            };
            SlashParse::Command(SlashCommand::Workflow(op))
        }
        other => SlashParse::Invalid(format!("unknown command: /{other}")),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_plan_with_multiword_description() {
        assert_eq!(
            parse_slash("/plan refactor split the registry module"),
            SlashParse::Command(SlashCommand::Plan {
                name: "refactor".to_string(),
                description: "split the registry module".to_string(),
            })
        );
    }

    #[test]
    fn pasted_path_is_demoted_to_input() {
        assert_eq!(parse_slash("/pkg/foo"), SlashParse::Input);
        assert_eq!(parse_slash(r"/c\windows"), SlashParse::Input);
    }

    #[test]
    fn unknown_word_is_invalid() {
        assert!(matches!(parse_slash("/abort"), SlashParse::Invalid(_)));
    }

    #[test]
    fn execute_accepts_optional_task_id() {
        assert_eq!(
            parse_slash("/execute"),
            SlashParse::Command(SlashCommand::Execute { task_id: None })
        );
        assert_eq!(
            parse_slash("/execute task-4"),
            SlashParse::Command(SlashCommand::Execute {
                task_id: Some("task-4".to_string())
            })
        );
    }
}
