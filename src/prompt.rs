//! Prompt construction (§4.2 `BuildInferenceTaskForNode`): render the path from a
//! graph's root down to one node into the inference task payload a worker consumes.

use crate::actions::{Action, parse_model_output, to_xml};
use crate::compilation::InferenceTaskMsg;
use crate::errors::{OrchestratorError, Result};
use crate::goal::Goal;
use crate::graph::model::{CommitGraphNode, NodeResult};
use crate::graph::{NodeLocator, RepoGraph};

/// Lines a compilation output is filtered down to by default: anything that looks like
/// a `TRACE`/`INFO` log line is dropped so the prompt's budget goes to signal (warnings,
/// errors, compiler diagnostics) rather than routine build chatter.
fn filter_compilation_output(raw: &str) -> String {
    raw.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            !(trimmed.len() >= 5
                && (trimmed[..5].eq_ignore_ascii_case("trace")
                    || (trimmed.len() >= 4 && trimmed[..4].eq_ignore_ascii_case("info"))))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const ACTION_HEADER: &str = "\
Available actions (emit zero or more, in the order you want them run):
  <ls path=\"...\"/>                     list a directory
  <cat path=\"...\"/>                    print a file's contents
  <grep pattern=\"...\" path=\"...\"/>      search for a pattern (path optional)
  <mkdir path=\"...\"/>                  create a directory
  <ed path=\"...\">SCRIPT</ed>           apply an ed script to a file
  <git-status/>                       show the working tree diff against the parent branch
  <git-commit message=\"...\"/>          commit the working tree; ends the attempt
  <abort reason=\"...\"/>                give up on this attempt
Respond with <thought>...</thought> followed by your chosen actions.";

/// Render one node's action outputs, skipping any whose action name ends in the
/// `hidden` suffix (§4.2).
fn render_action_outputs(node: &CommitGraphNode) -> String {
    node.action_outputs
        .iter()
        .filter(|output| !Action::is_hidden(&output.action_name))
        .map(|output| {
            format!(
                "--- {} (exit {}) ---\n{}",
                output.action_name,
                output.exit_code,
                filter_compilation_output(&output.out)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the inference task for `locator`'s node: the prompt traverses root → … →
/// node in that (grandparent → parent → child) order, embedding each ancestor's
/// previous thought/actions (canonical XML) and compilation output along the way.
pub fn build_inference_task_for_node(
    repo: &mut RepoGraph,
    locator: &NodeLocator,
    goal: &Goal,
) -> Result<InferenceTaskMsg> {
    let slice = repo.locate_node(locator)?;
    if slice.node().result == NodeResult::SyntaxFailure {
        return Err(OrchestratorError::ActionParseFailed(
            "cannot build a prompt for a node whose result is SyntaxFailure".into(),
        ));
    }

    let mut path = Vec::new();
    let mut cursor = Some(locator.node_id.clone());
    while let Some(id) = cursor {
        let node = slice
            .graph
            .nodes
            .get(&id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {id}")))?;
        path.push(node);
        cursor = node.parent.clone();
    }
    path.reverse(); // root first, target node last

    let mut prompt = String::new();
    prompt.push_str(&format!("Goal: {}\n\n", goal.statement));
    prompt.push_str(ACTION_HEADER);
    prompt.push_str("\n\n");

    for node in &path {
        if let Some(inference_output) = &node.inference_output {
            let xml = to_xml(inference_output);
            // Re-verify the round-trip law before trusting cached output: a stored
            // `ParsedOutput` that no longer re-parses means the cache has drifted from
            // what `parse_model_output` would accept today.
            parse_model_output(&xml).map_err(|e| {
                OrchestratorError::ActionParseFailed(format!(
                    "cached inference output for node {} failed to re-parse: {e}",
                    node.id
                ))
            })?;
            prompt.push_str("Previous attempt:\n");
            prompt.push_str(&xml);
            prompt.push('\n');
        }
        let outputs = render_action_outputs(node);
        if !outputs.is_empty() {
            prompt.push_str("Action output:\n");
            prompt.push_str(&outputs);
            prompt.push('\n');
        }
        if let Some(compilation_result) = &node.compilation_result {
            prompt.push_str("Compilation output:\n");
            prompt.push_str(&filter_compilation_output(&compilation_result.compilation_result.out));
            prompt.push('\n');
        }
    }

    Ok(InferenceTaskMsg { prompt })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ParsedOutput;
    use crate::compilation::{ActionOutput, CompilationResultMsg};
    use crate::graph::model::{CommitGraph, NodeState};
    use crate::ids::{BranchName, GoalId};

    #[test]
    fn filters_trace_and_info_lines_by_default() {
        let raw = "TRACE: entering fn\nerror: boom\nINFO: done\nwarning: careful";
        let filtered = filter_compilation_output(raw);
        assert_eq!(filtered, "error: boom\nwarning: careful");
    }

    #[test]
    fn builds_a_prompt_embedding_the_root_and_rejects_syntax_failures() {
        let root_branch = BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal_id = GoalId::new();
        let mut graph = CommitGraph::new(goal_id.clone());
        let root_id = graph.root_node.clone();
        {
            let root = graph.nodes.get_mut(&root_id).unwrap();
            root.state = NodeState::AwaitingInference;
            root.compilation_result = Some(CompilationResultMsg {
                branch_name: root_branch.clone(),
                pre_commands_results: vec![],
                compilation_result: ActionOutput {
                    action_name: "setup".into(),
                    out: "INFO: booted\nerror: missing semicolon".into(),
                    exit_code: 0,
                },
            });
        }
        repo.branch_targets
            .get_mut(&root_branch)
            .unwrap()
            .subgraphs
            .insert(goal_id.clone(), graph);

        let locator = NodeLocator::new(root_branch, goal_id, root_id);
        let goal = Goal::new("fix the build", "git checkout -b x");
        let task = build_inference_task_for_node(&mut repo, &locator, &goal).unwrap();
        assert!(task.prompt.contains("fix the build"));
        assert!(task.prompt.contains("error: missing semicolon"));
        assert!(!task.prompt.contains("INFO: booted"));

        {
            let mut slice = repo.locate_node(&locator).unwrap();
            slice.node_mut().result = NodeResult::SyntaxFailure;
        }
        assert!(build_inference_task_for_node(&mut repo, &locator, &goal).is_err());
    }

    #[test]
    fn unused_import_guard() {
        let _ = ParsedOutput {
            thought: String::new(),
            actions: vec![],
        };
    }
}
