//! Registry change notifications.
//!
//! A `ChangeEvent` only wakes a coordinator up. It is never authoritative:
//! delivery is at-most-once and the registry listing always wins.

use crate::error::{CoreError, Result};
use crate::slug::Slug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// A slug was newly added.
    #[serde(rename = "add")]
    Added,
    /// A present slug was removed.
    #[serde(rename = "remove")]
    Removed,
    /// The whole set was replaced. Carries no slug.
    #[serde(rename = "replace")]
    Replaced,
}

impl ChangeKind {
    /// Wire name, also used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "add",
            Self::Removed => "remove",
            Self::Replaced => "replace",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fire-and-forget notification that the slug set changed.
///
/// Wire form: `{"action":"add","slug":"...","ts":1700000000000}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "action")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub slug: Option<Slug>,
    /// Publish time (unix milliseconds on the wire).
    #[serde(
        rename = "ts",
        with = "chrono::serde::ts_milliseconds",
        default = "Utc::now"
    )]
    pub at: DateTime<Utc>,
    /// Replica that performed the mutation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ChangeEvent {
    pub fn added(slug: Slug) -> Self {
        Self::new(ChangeKind::Added, Some(slug))
    }

    pub fn removed(slug: Slug) -> Self {
        Self::new(ChangeKind::Removed, Some(slug))
    }

    pub fn replaced() -> Self {
        Self::new(ChangeKind::Replaced, None)
    }

    fn new(kind: ChangeKind, slug: Option<Slug>) -> Self {
        Self {
            kind,
            slug,
            at: Utc::now(),
            origin: None,
        }
    }

    /// Tag the event with the publishing replica.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Whether this event asks for a full re-read of the registry.
    pub fn requires_full_reload(&self) -> bool {
        self.kind == ChangeKind::Replaced
    }

    /// Decode and validate an event from its JSON wire form.
    ///
    /// `add`/`remove` events without a slug are rejected.
    pub fn decode(payload: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(payload)?;
        if event.kind != ChangeKind::Replaced && event.slug.is_none() {
            return Err(CoreError::InvalidEvent(format!(
                "{} event without slug",
                event.kind
            )));
        }
        Ok(event)
    }

    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
