//! Opaque, prefixed identifiers for the orchestrator's core aggregates.
//!
//! Every identifier in this module is a UUID-backed string carrying a fixed textual
//! prefix (e.g. `engine-task-...`). The prefix is checked whenever an identifier is
//! deserialized from an external source (broker payloads, HTTP bodies, snapshots) so
//! that a value of the wrong kind can never silently flow into the wrong slot.
//!
//! IDs never carry data beyond their string form — ownership and cross-references are
//! always id-based lookups into the owning aggregate's map, never handles or pointers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestratorError;

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Fixed textual prefix every value of this id type must carry.
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh, random identifier of this kind.
            pub fn new() -> Self {
                Self(format!("{}{}", Self::PREFIX, Uuid::now_v7()))
            }

            /// Wrap an existing string without prefix validation.
            ///
            /// Used when the caller has already established the value is well-formed
            /// (e.g. it was just minted by [`Self::new`]).
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = OrchestratorError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if !s.starts_with(Self::PREFIX) {
                    return Err(OrchestratorError::InvalidIdentifier(
                        s.to_string(),
                        Self::PREFIX,
                    ));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

prefixed_id!(EngineTaskId, "engine-task-", "Identifies one unit of work moving through a work-distribution engine.");
prefixed_id!(GoalId, "goal-", "Identifies a user-defined goal supplied by the goal provider.");
prefixed_id!(BranchName, "branch-", "Identifies a commit identity (branch target) on the underlying VCS.");
prefixed_id!(NodeId, "node-", "Identifies one position (a `CommitGraphNode`) within an exploration subgraph.");
prefixed_id!(RepoGraphId, "repo-graph-", "Identifies the root `RepoGraph` aggregate for one repository.");
prefixed_id!(TrainingGroupId, "training-group-", "Identifies one GRPO training group advertised to trainers.");
prefixed_id!(GoldenSampleId, "golden-", "Identifies a manually flagged (prompt, completion) reference pair.");
prefixed_id!(ModelTreeNodeId, "model-tree-node-", "Identifies a node in the bookkeeping tree of model checkpoints.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_carry_their_prefix() {
        let id = NodeId::new();
        assert!(id.as_str().starts_with(NodeId::PREFIX));
    }

    #[test]
    fn from_str_rejects_wrong_prefix() {
        let err = NodeId::from_str("goal-abc").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidIdentifier(_, _)));
    }

    #[test]
    fn round_trips_through_json() {
        let id = GoalId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: GoalId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn deserialize_rejects_missing_prefix() {
        let err = serde_json::from_str::<EngineTaskId>("\"not-a-task\"").unwrap_err();
        assert!(err.to_string().contains("invalid identifier"));
    }
}
