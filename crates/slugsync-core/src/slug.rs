//! Market slug identifier and set arithmetic.
//!
//! A slug is opaque: no ordering semantics are implied by the market it names.
//! Sets use `BTreeSet` only so that frames and logs come out in a stable order.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Maximum accepted slug length in bytes.
pub const MAX_SLUG_LEN: usize = 256;

/// Market identifier, e.g. `bitcoin-up-or-down`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Create a slug from raw input.
    ///
    /// Surrounding whitespace is trimmed. Empty input, inner whitespace,
    /// control characters and overlong values are rejected.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let trimmed = raw.as_ref().trim();

        if trimmed.is_empty() {
            return Err(CoreError::InvalidSlug("slug is required".to_string()));
        }
        if trimmed.len() > MAX_SLUG_LEN {
            return Err(CoreError::InvalidSlug(format!(
                "slug exceeds {MAX_SLUG_LEN} bytes"
            )));
        }
        if trimmed
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(CoreError::InvalidSlug(format!(
                "slug contains whitespace or control characters: {trimmed:?}"
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the slug as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Slug {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Slug {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}

/// Set of slugs with deterministic iteration order.
pub type SlugSet = BTreeSet<Slug>;

/// Delta that moves one subscription set onto another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    /// Slugs present in the current set but not the desired one.
    pub to_unsubscribe: SlugSet,
    /// Slugs present in the desired set but not the current one.
    pub to_subscribe: SlugSet,
}

impl SetDiff {
    /// Compute the delta from `current` to `desired`.
    pub fn between(current: &SlugSet, desired: &SlugSet) -> Self {
        Self {
            to_unsubscribe: current.difference(desired).cloned().collect(),
            to_subscribe: desired.difference(current).cloned().collect(),
        }
    }

    /// True when both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.to_unsubscribe.is_empty() && self.to_subscribe.is_empty()
    }

    /// Total number of slugs touched by this delta.
    pub fn len(&self) -> usize {
        self.to_unsubscribe.len() + self.to_subscribe.len()
    }

    /// Apply the delta to `set` in place (removals first).
    pub fn apply_to(&self, set: &mut SlugSet) {
        for slug in &self.to_unsubscribe {
            set.remove(slug);
        }
        set.extend(self.to_subscribe.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> SlugSet {
        items.iter().map(|s| Slug::new(s).unwrap()).collect()
    }

    #[test]
    fn test_slug_trims_whitespace() {
        let slug = Slug::new("  bitcoin-up-or-down \n").unwrap();
        assert_eq!(slug.as_str(), "bitcoin-up-or-down");
    }

    #[test]
    fn test_slug_rejects_empty() {
        assert!(Slug::new("").is_err());
        assert!(Slug::new("   ").is_err());
    }

    #[test]
    fn test_slug_rejects_inner_whitespace() {
        assert!(Slug::new("bitcoin up").is_err());
        assert!(Slug::new("bitcoin\tup").is_err());
    }

    #[test]
    fn test_slug_rejects_overlong() {
        let raw = "a".repeat(MAX_SLUG_LEN + 1);
        assert!(Slug::new(raw).is_err());
        assert!(Slug::new("a".repeat(MAX_SLUG_LEN)).is_ok());
    }

    #[test]
    fn test_slug_serde_validates() {
        let slug: Slug = serde_json::from_str("\"eth-above-4k\"").unwrap();
        assert_eq!(slug.to_string(), "eth-above-4k");
        assert!(serde_json::from_str::<Slug>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&slug).unwrap(), "\"eth-above-4k\"");
    }

    #[test]
    fn test_slug_set_lookup_by_str() {
        let slugs = set(&["a", "b"]);
        assert!(slugs.contains("a"));
        assert!(!slugs.contains("c"));
    }

    #[test]
    fn test_diff_between() {
        let current = set(&["a", "b", "c"]);
        let desired = set(&["b", "c", "d"]);

        let diff = SetDiff::between(&current, &desired);
        assert_eq!(diff.to_unsubscribe, set(&["a"]));
        assert_eq!(diff.to_subscribe, set(&["d"]));
        assert_eq!(diff.len(), 2);
    }

    #[test]
    fn test_diff_identical_sets_is_empty() {
        let current = set(&["a", "b"]);
        let diff = SetDiff::between(&current, &current.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_apply_reaches_desired() {
        let mut current = set(&["a", "b"]);
        let desired = set(&["b", "x", "y"]);

        SetDiff::between(&current, &desired).apply_to(&mut current);
        assert_eq!(current, desired);
    }
}
