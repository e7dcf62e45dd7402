//! Key normalization
//!
//! Cache keys must compare equal across processes and across local/remote cache
//! implementations: a PUT on one process and an eviction lookup on another only
//! agree on "the same key" through this canonical string form. Text, numeric and
//! boolean keys keep their natural representation (no quoting overhead, readable
//! in topics and logs); structured keys serialize to deterministic JSON
//! (serde_json object keys are sorted, so equal values always encode equally).

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CacheError, CacheResult};

/// Canonical form of an absent key.
pub const NULL_KEY: &str = "null";

/// Converts application keys into their canonical string form.
pub trait KeyConvertor<K: ?Sized>: Send + Sync {
    /// Normalizes `key`; `None` yields the literal `"null"`.
    ///
    /// Fails with [`CacheError::KeyConversion`] when the key cannot be
    /// canonically serialized; the caller must not fall back to a partial form.
    fn convert(&self, key: Option<&K>) -> CacheResult<String>;
}

/// JSON-based key convertor.
///
/// The stock convertor used by the notifier: primitive-like keys map to their
/// natural string representation, everything else to its JSON encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonKeyConvertor;

impl<K> KeyConvertor<K> for JsonKeyConvertor
where
    K: Serialize + fmt::Debug + ?Sized,
{
    fn convert(&self, key: Option<&K>) -> CacheResult<String> {
        let Some(key) = key else {
            return Ok(NULL_KEY.to_owned());
        };

        let value = serde_json::to_value(key).map_err(|source| CacheError::KeyConversion {
            key: format!("{:?}", key),
            source,
        })?;

        Ok(match value {
            Value::Null => NULL_KEY.to_owned(),
            Value::String(text) => text,
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            structured => {
                serde_json::to_string(&structured).map_err(|source| CacheError::KeyConversion {
                    key: format!("{:?}", key),
                    source,
                })?
            }
        })
    }
}
