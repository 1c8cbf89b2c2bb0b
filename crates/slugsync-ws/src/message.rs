//! Feed wire types.
//!
//! Outbound: subscription requests for the market channel.
//! Inbound: event objects carrying an `event_type`, delivered either as a
//! single JSON object or as a JSON array of objects per frame.

use crate::error::{WsError, WsResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slugsync_core::{Slug, SlugSet};

/// Channel name used for every subscription request.
pub const MARKET_CHANNEL: &str = "market";

/// Keepalive reply some upstreams send as a bare text frame.
const PONG_TEXT: &str = "PONG";

/// Subscription operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Outbound subscription request.
///
/// `{"type":"market","operation":"subscribe","slugs":["..."]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub channel: String,
    pub operation: Operation,
    pub slugs: Vec<Slug>,
}

impl SubscriptionRequest {
    pub fn new(operation: Operation, slugs: impl IntoIterator<Item = Slug>) -> Self {
        Self {
            channel: MARKET_CHANNEL.to_string(),
            operation,
            slugs: slugs.into_iter().collect(),
        }
    }

    pub fn subscribe(slugs: &SlugSet) -> Self {
        Self::new(Operation::Subscribe, slugs.iter().cloned())
    }

    pub fn unsubscribe(slugs: &SlugSet) -> Self {
        Self::new(Operation::Unsubscribe, slugs.iter().cloned())
    }

    /// Split a set into requests of at most `max_slugs` entries each
    /// (0 = everything in one request).
    pub fn chunked(operation: Operation, slugs: &SlugSet, max_slugs: usize) -> Vec<Self> {
        if max_slugs == 0 || slugs.len() <= max_slugs {
            return vec![Self::new(operation, slugs.iter().cloned())];
        }
        let chunk = max_slugs;
        let all: Vec<Slug> = slugs.iter().cloned().collect();
        all.chunks(chunk)
            .map(|part| Self::new(operation, part.iter().cloned()))
            .collect()
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedMessage {
    pub event_type: String,
    /// Originating slug, from `slug` or `market_slug` when present and valid.
    pub slug: Option<Slug>,
    /// Upstream market identifier, if any.
    pub market: Option<String>,
    /// Upstream timestamp in ms. Accepts numbers and numeric strings.
    pub timestamp: Option<i64>,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl FeedMessage {
    /// Build from a JSON object. Returns `None` for values without an
    /// `event_type` (acks, keepalives, non-objects).
    pub fn from_value(value: Value, received_at: DateTime<Utc>) -> Option<Self> {
        let obj = value.as_object()?;
        let event_type = obj.get("event_type")?.as_str()?.to_string();

        let slug = ["slug", "market_slug"]
            .iter()
            .filter_map(|key| obj.get(*key).and_then(Value::as_str))
            .find_map(|raw| Slug::new(raw).ok());
        let market = obj.get("market").and_then(Value::as_str).map(str::to_string);
        let timestamp = obj.get("timestamp").and_then(|ts| match ts {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });

        Some(Self {
            event_type,
            slug,
            market,
            timestamp,
            payload: value,
            received_at,
        })
    }
}

/// Whether a text frame is the upstream's bare keepalive reply.
pub fn is_pong_text(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(PONG_TEXT)
}

/// Decode one text frame into zero or more events, preserving order.
///
/// Non-JSON text and JSON scalars are protocol errors. Objects without an
/// `event_type` are skipped.
pub fn decode_frame(text: &str) -> WsResult<Vec<FeedMessage>> {
    let received_at = Utc::now();
    let value: Value =
        serde_json::from_str(text).map_err(|e| WsError::Protocol(format!("invalid JSON: {e}")))?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| FeedMessage::from_value(item, received_at))
            .collect()),
        Value::Object(_) => Ok(FeedMessage::from_value(value, received_at)
            .into_iter()
            .collect()),
        other => Err(WsError::Protocol(format!(
            "unexpected frame payload: {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
