//! Resource identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LockError;

/// Identity of a lockable resource.
///
/// Two ids name the same resource iff they are equal. [`ResourceId::All`] is the
/// sentinel meaning "every resource at once".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceId {
    All,
    Named(String),
    Numeric(u64),
}

/// The "lock everything" sentinel.
pub const ALL_RESOURCES: ResourceId = ResourceId::All;

impl ResourceId {
    /// Resource id derived from a caller-chosen key (upload token, document id, ...).
    pub fn named(key: impl Into<String>) -> Result<Self, LockError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(LockError::InvalidResource(
                "resource key must not be empty".to_string(),
            ));
        }
        Ok(Self::Named(key))
    }

    pub fn numeric(value: u64) -> Self {
        Self::Numeric(value)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Whether claims on `self` and `other` exclude each other when held by
    /// different owners.
    pub fn conflicts_with(&self, other: &ResourceId) -> bool {
        self.is_all() || other.is_all() || self == other
    }
}

impl From<u64> for ResourceId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "*"),
            Self::Named(key) => write!(f, "lock::{key}"),
            Self::Numeric(n) => write!(f, "#{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn named(key: &str) -> ResourceId {
        ResourceId::named(key).unwrap()
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(matches!(
            ResourceId::named("  "),
            Err(LockError::InvalidResource(_))
        ));
    }

    #[test]
    fn same_key_is_same_resource() {
        assert_eq!(named("doc1"), named("doc1"));
        assert_ne!(named("doc1"), named("doc2"));
        assert_ne!(ResourceId::numeric(1), named("1"));
    }

    #[rstest]
    #[case::same(named("a"), named("a"), true)]
    #[case::different(named("a"), named("b"), false)]
    #[case::all_left(ALL_RESOURCES, named("b"), true)]
    #[case::all_right(ResourceId::numeric(7), ALL_RESOURCES, true)]
    #[case::all_both(ALL_RESOURCES, ALL_RESOURCES, true)]
    fn conflict_matrix(#[case] a: ResourceId, #[case] b: ResourceId, #[case] expected: bool) {
        assert_eq!(a.conflicts_with(&b), expected);
        assert_eq!(b.conflicts_with(&a), expected);
    }

    #[test]
    fn display_is_readable() {
        assert_eq!(ALL_RESOURCES.to_string(), "*");
        assert_eq!(named("doc1").to_string(), "lock::doc1");
        assert_eq!(ResourceId::from(3).to_string(), "#3");
    }
}
