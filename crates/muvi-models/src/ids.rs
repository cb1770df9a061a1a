//! String-typed identifiers used for cross-references inside the project
//! document.
//!
//! The state document is tree-shaped: the project owns everything, and
//! subtrees point at each other by ID only. Newtypes keep those reference
//! categories apart at compile time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Project identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ProjectId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Cast member identifier, role-indexed (`lead_1`, `supporting_2`, ...).
    CastId
);

string_id!(
    /// Sequence identifier (`seq_01`, `seq_02`, ...).
    SequenceId
);

string_id!(
    /// Shot identifier (`{sequence_id}_sh{NN}`).
    ShotId
);

string_id!(
    /// Scene identifier (`scene_01`, ...), one scene per sequence.
    SceneId
);

impl CastId {
    /// Build a role-indexed cast id, e.g. `lead_1`.
    pub fn for_role(role: &str, index: usize) -> Self {
        Self(format!("{}_{}", role, index))
    }
}

impl SequenceId {
    /// Build a zero-padded sequence id, e.g. `seq_03`.
    pub fn from_index(index: usize) -> Self {
        Self(format!("seq_{:02}", index + 1))
    }
}

impl SceneId {
    /// Build a zero-padded scene id, e.g. `scene_03`.
    pub fn from_index(index: usize) -> Self {
        Self(format!("scene_{:02}", index + 1))
    }
}

impl ShotId {
    /// Build a shot id within a sequence, e.g. `seq_01_sh02`.
    pub fn for_sequence(sequence_id: &SequenceId, index: usize) -> Self {
        Self(format!("{}_sh{:02}", sequence_id, index + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        assert_eq!(SequenceId::from_index(0).as_str(), "seq_01");
        assert_eq!(SequenceId::from_index(11).as_str(), "seq_12");
        assert_eq!(
            ShotId::for_sequence(&SequenceId::from_index(0), 1).as_str(),
            "seq_01_sh02"
        );
        assert_eq!(CastId::for_role("lead", 1).as_str(), "lead_1");
        assert_eq!(SceneId::from_index(2).as_str(), "scene_03");
    }

    #[test]
    fn test_serde_transparent() {
        let id: SequenceId = serde_json::from_str("\"seq_05\"").unwrap();
        assert_eq!(id.as_str(), "seq_05");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"seq_05\"");
    }
}
