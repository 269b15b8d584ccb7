//! The closed set of actions a model may emit (§9 "Polymorphic actions"): `Ls`, `Cat`,
//! `Grep`, `Mkdir`, `Ed`, `GitStatus`, `GitCommit`, `Abort`. Modelled as one tagged enum
//! rather than a trait object, since the set is closed and every variant is known here.

pub mod parse;
pub mod xml;

use serde::{Deserialize, Serialize};

use crate::compilation::PreCommand;
use crate::errors::{OrchestratorError, Result};

pub use parse::{ParsedOutput, parse_model_output};
pub use xml::to_xml;

/// One action parsed out of a model's output, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Ls { path: String },
    Cat { path: String },
    Grep { pattern: String, path: Option<String> },
    Mkdir { path: String },
    Ed { path: String, script: String },
    GitStatus,
    GitCommit { message: String },
    Abort { reason: String },
}

impl Action {
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Ls { .. } => "ls",
            Action::Cat { .. } => "cat",
            Action::Grep { .. } => "grep",
            Action::Mkdir { .. } => "mkdir",
            Action::Ed { .. } => "ed",
            Action::GitStatus => "git-status",
            Action::GitCommit { .. } => "git-commit",
            Action::Abort { .. } => "abort",
        }
    }

    /// Structural validation independent of any filesystem or repository state: empty
    /// paths, patterns, or messages are always a syntax failure.
    pub fn validate(&self) -> Result<()> {
        let fail = |field: &str| {
            Err(OrchestratorError::ActionParseFailed(format!(
                "{}: `{field}` must not be empty",
                self.type_name()
            )))
        };
        match self {
            Action::Ls { path } | Action::Mkdir { path } | Action::Cat { path } => {
                if path.trim().is_empty() {
                    return fail("path");
                }
            }
            Action::Grep { pattern, .. } => {
                if pattern.trim().is_empty() {
                    return fail("pattern");
                }
            }
            Action::Ed { path, .. } => {
                if path.trim().is_empty() {
                    return fail("path");
                }
            }
            Action::GitCommit { message } => {
                if message.trim().is_empty() {
                    return fail("message");
                }
            }
            Action::GitStatus | Action::Abort { .. } => {}
        }
        Ok(())
    }

    /// Whether this action's output should be suppressed when replaying it back into a
    /// later prompt (§4.2: "those whose action name ends in the suffix `hidden`").
    pub fn is_hidden(name: &str) -> bool {
        name.ends_with("hidden")
    }

    /// The pre-command a worker runs to carry out this action, or `None` for actions
    /// handled specially by the caller (`GitStatus`, `GitCommit`) or that never reach
    /// the compilation stage (`Abort`).
    pub fn to_pre_command(&self, idx: usize) -> Option<PreCommand> {
        match self {
            Action::Ls { path } => Some(PreCommand {
                name: format!("ls-{idx}"),
                script: format!("ls -la -- {path}"),
            }),
            Action::Cat { path } => Some(PreCommand {
                name: format!("cat-{idx}"),
                script: format!("cat -- {path}"),
            }),
            Action::Grep { pattern, path } => Some(PreCommand {
                name: format!("grep-{idx}"),
                script: format!(
                    "grep -rn -- {pattern:?} {}",
                    path.as_deref().unwrap_or(".")
                ),
            }),
            Action::Mkdir { path } => Some(PreCommand {
                name: format!("mkdir-{idx}"),
                script: format!("mkdir -p -- {path}"),
            }),
            Action::Ed { path, script } => Some(PreCommand {
                name: format!("ed-{idx}"),
                script: format!("ed -- {path} <<'FORGE_ED_EOF'\n{script}\nFORGE_ED_EOF"),
            }),
            Action::GitStatus | Action::GitCommit { .. } | Action::Abort { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_fail_validation() {
        assert!(
            Action::Mkdir {
                path: String::new()
            }
            .validate()
            .is_err()
        );
        assert!(
            Action::GitCommit {
                message: "  ".into()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn hidden_suffix_is_recognised() {
        assert!(Action::is_hidden("mk_all-hidden"));
        assert!(!Action::is_hidden("git-commit"));
    }
}
