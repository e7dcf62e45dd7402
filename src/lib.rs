//! cachebus - Broadcast cache invalidation over pub/sub
//!
//! Keeps the local tiers of a multi-tier cache coherent across processes.
//! When one process mutates a shared entry it publishes an eviction event;
//! every process that registered a local cache under that cache name evicts
//! the entry and refills from the shared tier on the next read.
//!
//! The library provides:
//! - PUT/REMOVE/CLEAR invalidation events carrying keys, never values
//! - Deterministic key normalization shared by publishers and subscribers
//! - Reference-counted topic subscriptions per cache name
//! - A Redis pub/sub transport and an in-process transport for tests
//! - Best-effort delivery semantics where a lost or duplicated event only
//!   costs an extra reload, never stale data kept alive

mod config;
mod error;
mod event;
mod key;
mod listener;
mod local;
mod notifier;
mod redis_transport;
mod topic;
mod transport;

pub use config::{NotifierConfig, RedisConfig, DEFAULT_TOPIC_PREFIX};
pub use error::{CacheError, CacheResult};
pub use event::{CacheEvent, EventType};
pub use key::{JsonKeyConvertor, KeyConvertor, NULL_KEY};
pub use listener::{EventSink, MessageListener};
pub use local::{LocalCache, MokaLocalCache};
pub use notifier::CacheNotifier;
pub use redis_transport::RedisTransport;
pub use topic::{topic_for, TopicRegistry};
pub use transport::{MemoryTransport, MessageHandler, MessageTransport};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
