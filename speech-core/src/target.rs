//! Recipients of deferred and follow-up speech.

use crate::entity::{EntityDirectory, EntityHandle};
use std::fmt;

/// Who a deferred response is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetSpec {
    /// One entity; valid only while it is alive.
    Specific(EntityHandle),
    /// The single best-matching respondent.
    Any { exclude: Option<EntityHandle> },
    /// Every respondent that has something to say.
    All { exclude: Option<EntityHandle> },
    /// Nobody. Also the state of a quashed queue entry.
    #[default]
    Invalid,
}

impl TargetSpec {
    pub fn is_valid(&self, directory: &dyn EntityDirectory) -> bool {
        match self {
            TargetSpec::Specific(handle) => directory.is_live(*handle),
            TargetSpec::Any { .. } | TargetSpec::All { .. } => true,
            TargetSpec::Invalid => false,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, TargetSpec::Invalid)
    }

    /// The entity addressed, for `Specific` targets.
    pub fn specific(&self) -> Option<EntityHandle> {
        match self {
            TargetSpec::Specific(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn excluded(&self) -> Option<EntityHandle> {
        match self {
            TargetSpec::Any { exclude } | TargetSpec::All { exclude } => *exclude,
            _ => None,
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSpec::Specific(handle) => write!(f, "specific {handle}"),
            TargetSpec::Any { .. } => write!(f, "any"),
            TargetSpec::All { .. } => write!(f, "all"),
            TargetSpec::Invalid => write!(f, "invalid"),
        }
    }
}
