//! Weighted-random branch-target selection and the derivation check (§4.2).

use rand::Rng;

use crate::config::WeightingParams;
use crate::ids::GoalId;

use super::model::{BranchTarget, BranchTargetCounters, RepoGraph};

/// `w(bt) = (succ+1)/(fail+1) * 1 / (β·in_progress + (1 + α·(fail+succ))^(1+λ))`.
///
/// Success raises weight, failure lowers it; an in-progress subgraph discounts further
/// exploration; branch targets with fewer total attempts (fail+succ) are preferred.
pub fn weight(counters: BranchTargetCounters, params: &WeightingParams) -> f64 {
    let succ = counters.succ as f64;
    let fail = counters.fail as f64;
    let in_progress = counters.in_progress as f64;
    let numerator = (succ + 1.0) / (fail + 1.0);
    let denominator = params.beta * in_progress
        + (1.0 + params.alpha * (fail + succ)).powf(1.0 + params.lambda);
    numerator / denominator
}

/// Whether `goal_id` has already been applied somewhere on `bt`'s ancestor path,
/// walking `parent_branch_name` links up to the root.
pub fn branch_target_derives_from_goal(
    repo: &RepoGraph,
    bt: &BranchTarget,
    goal_id: &GoalId,
) -> bool {
    let mut current = bt;
    loop {
        if current.traversal_goal_id.as_ref() == Some(goal_id) {
            return true;
        }
        match &current.parent_branch_name {
            Some(parent_name) => match repo.branch_targets.get(parent_name) {
                Some(parent) => current = parent,
                None => return false,
            },
            None => return false,
        }
    }
}

/// Select a branch target to attempt `goal_id` against, excluding any target already
/// carrying that goal on its ancestor path. Candidates are weighted
/// `100000·depth + 1000·w(bt)` — depth dominates so earlier (shallower) branches are
/// drained before exploration fans out wider — and one is sampled proportionally to
/// that weight.
pub fn select_branch_target_for_goal(
    repo: &RepoGraph,
    goal_id: &GoalId,
    params: &WeightingParams,
) -> Option<crate::ids::BranchName> {
    let depth_of = |bt: &BranchTarget| -> u32 {
        let mut depth = 0;
        let mut current = bt;
        while let Some(parent_name) = &current.parent_branch_name {
            match repo.branch_targets.get(parent_name) {
                Some(parent) => {
                    depth += 1;
                    current = parent;
                }
                None => break,
            }
        }
        depth
    };

    let candidates: Vec<(crate::ids::BranchName, f64)> = repo
        .branch_targets
        .values()
        .filter(|bt| !branch_target_derives_from_goal(repo, bt, goal_id))
        .map(|bt| {
            let depth = depth_of(bt);
            let w = weight(bt.counters(), params);
            let score = 100_000.0 * depth as f64 + 1_000.0 * w;
            (bt.branch_name.clone(), score)
        })
        .collect();

    sample_weighted(&candidates)
}

fn sample_weighted(candidates: &[(crate::ids::BranchName, f64)]) -> Option<crate::ids::BranchName> {
    let total: f64 = candidates.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 || candidates.is_empty() {
        return candidates.first().map(|(name, _)| name.clone());
    }
    let mut pick = rand::rng().random_range(0.0..total);
    for (name, w) in candidates {
        let w = w.max(0.0);
        if pick < w {
            return Some(name.clone());
        }
        pick -= w;
    }
    candidates.last().map(|(name, _)| name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_strictly_increases_with_added_success() {
        let params = WeightingParams::default();
        let base = BranchTargetCounters {
            succ: 0,
            fail: 0,
            in_progress: 0,
        };
        let with_success = BranchTargetCounters {
            succ: 1,
            ..base
        };
        assert!(weight(with_success, &params) > weight(base, &params));
    }

    #[test]
    fn weight_strictly_decreases_with_added_failure() {
        let params = WeightingParams::default();
        let base = BranchTargetCounters {
            succ: 0,
            fail: 0,
            in_progress: 0,
        };
        let with_failure = BranchTargetCounters { fail: 1, ..base };
        assert!(weight(with_failure, &params) < weight(base, &params));
    }

    #[test]
    fn derivation_check_walks_ancestor_chain() {
        let root_branch = crate::ids::BranchName::new();
        let mut repo = RepoGraph::new(root_branch.clone());
        let goal = GoalId::new();
        let child_branch = crate::ids::BranchName::new();
        let child = BranchTarget::child(child_branch.clone(), root_branch.clone(), goal.clone());
        repo.branch_targets.insert(child_branch.clone(), child);

        let grandchild_branch = crate::ids::BranchName::new();
        let other_goal = GoalId::new();
        let grandchild = BranchTarget::child(
            grandchild_branch.clone(),
            child_branch.clone(),
            other_goal,
        );
        repo.branch_targets
            .insert(grandchild_branch.clone(), grandchild);

        let grandchild = repo.branch_targets.get(&grandchild_branch).unwrap();
        assert!(branch_target_derives_from_goal(&repo, grandchild, &goal));
    }
}
