//! Wire shapes for the inference and compilation inner task payloads (§6), and the
//! pre-command list a node's parsed actions compile down to.

use serde::{Deserialize, Serialize};

use crate::actions::Action;
use crate::ids::BranchName;

/// `{prompt: string}` — the sole inference task payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceTaskMsg {
    pub prompt: String,
}

/// `{return_sequences: [string]}` — one raw model completion per requested sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResultMsg {
    pub return_sequences: Vec<String>,
}

/// One named shell step run before the main compilation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCommand {
    pub name: String,
    pub script: String,
}

/// `{branch_name, new_branch_name, pre_commands, compilation_script}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationTaskMsg {
    pub branch_name: BranchName,
    pub new_branch_name: BranchName,
    pub pre_commands: Vec<PreCommand>,
    pub compilation_script: String,
}

/// The captured stdout/stderr and exit code of one action or the main compilation
/// script, as reported by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutput {
    pub action_name: String,
    pub out: String,
    pub exit_code: i32,
}

/// `{branch_name, pre_commands_results, compilation_result}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationResultMsg {
    pub branch_name: BranchName,
    pub pre_commands_results: Vec<ActionOutput>,
    pub compilation_result: ActionOutput,
}

/// The two implicit trailing hidden pre-commands every compilation task carries,
/// preparing the build tree before the main script runs. Hidden because a suffix of
/// `-hidden` on an action name means prompt-building skips echoing its output back to
/// the model (§4.2 `BuildInferenceTaskForNode`).
pub const MK_ALL_HIDDEN: &str = "mk_all-hidden";
pub const PREBUILD_HIDDEN: &str = "prebuild-hidden";

/// Translate one node's parsed, ordered action list into the pre-command list a
/// compilation task carries, per §4.2 `BuildCompilationTasksForNode`.
///
/// `git-status` becomes a `git diff` against the parent branch; `git-commit`, if
/// present, is moved to the end (after the two hidden pre-commands) and diffed against
/// the parent branch with `--minimal` so its captured output is the canonical,
/// dedupe-friendly diff patch.
pub fn actions_to_pre_commands(actions: &[Action], parent_branch: &BranchName) -> Vec<PreCommand> {
    let mut pre_commands = Vec::with_capacity(actions.len() + 3);
    let mut commit: Option<PreCommand> = None;

    for (idx, action) in actions.iter().enumerate() {
        match action {
            Action::GitStatus => pre_commands.push(PreCommand {
                name: format!("git-status-{idx}"),
                script: format!("git diff origin/{parent_branch}"),
            }),
            Action::GitCommit { .. } => {
                commit = Some(PreCommand {
                    name: "git-commit".into(),
                    script: format!("git diff --minimal origin/{parent_branch}"),
                });
            }
            other => {
                if let Some(pre_command) = other.to_pre_command(idx) {
                    pre_commands.push(pre_command);
                }
            }
        }
    }

    pre_commands.push(PreCommand {
        name: MK_ALL_HIDDEN.into(),
        script: "make all".into(),
    });
    pre_commands.push(PreCommand {
        name: PREBUILD_HIDDEN.into(),
        script: "make prebuild".into(),
    });

    if let Some(commit) = commit {
        pre_commands.push(commit);
    }

    pre_commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_commit_is_moved_after_the_hidden_pre_commands() {
        let parent = BranchName::new();
        let actions = vec![
            Action::GitStatus,
            Action::GitCommit {
                message: "done".into(),
            },
        ];
        let pre_commands = actions_to_pre_commands(&actions, &parent);
        let names: Vec<&str> = pre_commands.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["git-status-0", MK_ALL_HIDDEN, PREBUILD_HIDDEN, "git-commit"]
        );
        assert!(pre_commands.last().unwrap().script.contains("--minimal"));
    }

    #[test]
    fn no_commit_means_no_trailing_commit_pre_command() {
        let parent = BranchName::new();
        let actions = vec![Action::GitStatus];
        let pre_commands = actions_to_pre_commands(&actions, &parent);
        assert!(!pre_commands.iter().any(|p| p.name == "git-commit"));
    }
}
