//! Invalidation event wire schema
//!
//! One event per broadcast message, JSON-encoded with camelCase field names so
//! that every process, whatever its cache implementation, reads the same shape:
//!
//! ```json
//! {"eventType":"PUT","cacheName":"users","key":"7","sourceId":"...","timestamp":1724400000000}
//! ```
//!
//! The `key` field is omitted for clear-all events. Events are immutable once
//! constructed; the notifier stamps the source id and timestamp at build time.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// The kind of cache mutation an event describes.
///
/// A closed set: dispatch matches exhaustively and unknown wire tags are
/// rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// A key was written; subscribers evict their stale copy.
    Put,
    /// A key was removed; subscribers evict their copy.
    Remove,
    /// The whole cache was cleared; subscribers evict all entries.
    Clear,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
            Self::Remove => write!(f, "REMOVE"),
            Self::Clear => write!(f, "CLEAR"),
        }
    }
}

/// A single cache mutation, as carried on the broadcast channel.
///
/// Invariants: `cache_name` is non-empty; `key` is present (and non-empty) iff
/// `event_type` is [`EventType::Put`] or [`EventType::Remove`]. The
/// constructors uphold these; [`CacheEvent::from_json`] re-checks them for
/// events arriving off the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    /// Mutation kind.
    pub event_type: EventType,
    /// Logical cache the mutation belongs to.
    pub cache_name: String,
    /// Normalized key affected; `None` for clear-all events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque identifier of the originating process instance.
    pub source_id: String,
    /// Creation time in epoch milliseconds. Informational only, never used
    /// for ordering or conflict resolution.
    pub timestamp: u64,
}

impl CacheEvent {
    /// Event for a key write.
    pub fn put(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self::with_key(EventType::Put, cache_name, key, source_id)
    }

    /// Event for a key removal.
    pub fn remove(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self::with_key(EventType::Remove, cache_name, key, source_id)
    }

    /// Event clearing a whole cache.
    pub fn clear(cache_name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Clear,
            cache_name: cache_name.into(),
            key: None,
            source_id: source_id.into(),
            timestamp: epoch_millis(),
        }
    }

    fn with_key(
        event_type: EventType,
        cache_name: impl Into<String>,
        key: impl Into<String>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            cache_name: cache_name.into(),
            key: Some(key.into()),
            source_id: source_id.into(),
            timestamp: epoch_millis(),
        }
    }

    /// Checks the schema invariants.
    pub fn validate(&self) -> CacheResult<()> {
        if self.cache_name.is_empty() {
            return Err(CacheError::InvalidEvent("cache name is empty".to_owned()));
        }
        match self.event_type {
            EventType::Put | EventType::Remove => match self.key.as_deref() {
                Some(key) if !key.is_empty() => Ok(()),
                _ => Err(CacheError::InvalidEvent(format!(
                    "{} event for cache '{}' carries no key",
                    self.event_type, self.cache_name
                ))),
            },
            EventType::Clear => match self.key.as_deref() {
                None | Some("") => Ok(()),
                Some(key) => Err(CacheError::InvalidEvent(format!(
                    "CLEAR event for cache '{}' carries key '{}'",
                    self.cache_name, key
                ))),
            },
        }
    }

    /// Parses and validates an event from its wire encoding.
    pub fn from_json(payload: &str) -> CacheResult<Self> {
        let event: Self = serde_json::from_str(payload).map_err(CacheError::EventParse)?;
        event.validate()?;
        Ok(event)
    }

    /// Encodes the event for the wire.
    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Current time as epoch milliseconds.
fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
