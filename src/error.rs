//! Cache invalidation error types

use redis::RedisError;

/// Errors produced by the invalidation protocol.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache key could not be canonically serialized. The publish carrying
    /// the key does not occur.
    #[error("failed to convert cache key {key}: {source}")]
    KeyConversion {
        /// Description of the offending key.
        key: String,
        source: serde_json::Error,
    },

    /// An inbound payload was not valid text. Recoverable: the listener logs
    /// and drops the message.
    #[error("event payload is not valid UTF-8: {0}")]
    MessageDecode(#[from] std::str::Utf8Error),

    /// An inbound payload did not parse as an invalidation event. Recoverable:
    /// the listener logs and drops the message.
    #[error("malformed invalidation event: {0}")]
    EventParse(serde_json::Error),

    /// An event violated the schema invariants (empty cache name, key missing
    /// for PUT/REMOVE, key present for CLEAR).
    #[error("invalid invalidation event: {0}")]
    InvalidEvent(String),

    /// Redis transport failure. Surfaced to the caller of
    /// publish/register/deregister; in-memory state is rolled back.
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Non-Redis transport failure (for example, the pub/sub driver stopped).
    #[error("transport error: {0}")]
    Transport(String),

    /// Serializing an outbound event failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience result type for the invalidation protocol.
pub type CacheResult<T> = std::result::Result<T, CacheError>;
