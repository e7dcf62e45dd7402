//! Cache notifier
//!
//! The notifier is the process-local coordinator of the invalidation bus: it
//! publishes eviction events when this process mutates shared data, and it
//! applies events received by the listener to every local cache registered
//! under the event's cache name. Registration is reference counted per cache
//! name, so the topic subscription lives exactly as long as at least one local
//! cache wants its events.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::NotifierConfig;
use crate::error::CacheResult;
use crate::event::{CacheEvent, EventType};
use crate::key::{JsonKeyConvertor, KeyConvertor};
use crate::listener::{EventSink, MessageListener};
use crate::local::LocalCache;
use crate::topic::topic_for;
use crate::transport::MessageTransport;

/// Publishes invalidation events and applies received ones to local caches.
///
/// Created as an [`Arc`] because the listener keeps a weak back-reference to
/// it; dropping every strong handle tears the pair down cleanly.
pub struct CacheNotifier<T: MessageTransport> {
    transport: Arc<T>,
    listener: MessageListener<T>,
    caches: DashMap<String, Vec<Arc<dyn LocalCache>>>,
    topic_prefix: String,
    instance_id: String,
    ignore_own_events: bool,
}

impl<T: MessageTransport> CacheNotifier<T> {
    pub fn new(transport: Arc<T>, config: NotifierConfig) -> Arc<Self> {
        let listener = MessageListener::new(transport.clone(), config.topic_prefix.clone());
        let notifier = Arc::new(Self {
            transport,
            listener,
            caches: DashMap::new(),
            topic_prefix: config.topic_prefix,
            instance_id: Uuid::new_v4().to_string(),
            ignore_own_events: config.ignore_own_events,
        });

        let sink = Arc::downgrade(&notifier);
        notifier.listener.attach_notifier(sink);
        notifier
    }

    /// Identifier stamped into every event this notifier publishes.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_subscribed(&self, cache_name: &str) -> bool {
        self.listener.is_subscribed(cache_name)
    }

    /// Topics currently subscribed on behalf of registered caches.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.listener.subscribed_topics()
    }

    /// Registers a local cache under `cache_name` and ensures the matching
    /// topic subscription exists.
    ///
    /// The same cache may be registered more than once; each registration
    /// needs its own [`deregister`](Self::deregister). On a transport failure
    /// the registration is removed again and the error returned.
    pub async fn register(&self, cache_name: &str, cache: Arc<dyn LocalCache>) -> CacheResult<()> {
        self.caches
            .entry(cache_name.to_owned())
            .or_default()
            .push(cache.clone());

        if let Err(err) = self.listener.subscribe(cache_name).await {
            self.remove_registration(cache_name, &cache);
            return Err(err);
        }
        Ok(())
    }

    /// Removes one registration of `cache` under `cache_name`; the last
    /// removal for a name drops the topic subscription. Unknown pairs are a
    /// no-op.
    pub async fn deregister(
        &self,
        cache_name: &str,
        cache: &Arc<dyn LocalCache>,
    ) -> CacheResult<()> {
        let (removed, now_empty) = self.remove_registration(cache_name, cache);
        if !removed || !now_empty {
            return Ok(());
        }

        if let Err(err) = self.listener.unsubscribe(cache_name).await {
            // Restore the binding so events keep being applied and a later
            // deregister can retry the unsubscribe.
            self.caches
                .entry(cache_name.to_owned())
                .or_default()
                .push(cache.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Broadcasts an invalidation event for `cache_name`.
    ///
    /// The key is normalized through [`JsonKeyConvertor`]; `None` publishes
    /// the literal `"null"` key. CLEAR events ignore the key entirely.
    /// Publishing is best effort: a failure leaves no trace locally and the
    /// caller decides whether to care.
    pub async fn publish<K>(
        &self,
        cache_name: &str,
        key: Option<&K>,
        event_type: EventType,
    ) -> CacheResult<()>
    where
        K: Serialize + fmt::Debug + ?Sized,
    {
        let event = match event_type {
            EventType::Put => CacheEvent::put(
                cache_name,
                JsonKeyConvertor.convert(key)?,
                &self.instance_id,
            ),
            EventType::Remove => CacheEvent::remove(
                cache_name,
                JsonKeyConvertor.convert(key)?,
                &self.instance_id,
            ),
            EventType::Clear => CacheEvent::clear(cache_name, &self.instance_id),
        };
        event.validate()?;

        let payload = event.to_json()?;
        let topic = topic_for(&self.topic_prefix, cache_name);
        self.transport.publish(&topic, &payload).await?;
        debug!("published {} event for cache {}", event.event_type, cache_name);
        Ok(())
    }

    pub async fn publish_put<K>(&self, cache_name: &str, key: &K) -> CacheResult<()>
    where
        K: Serialize + fmt::Debug + ?Sized,
    {
        self.publish(cache_name, Some(key), EventType::Put).await
    }

    pub async fn publish_remove<K>(&self, cache_name: &str, key: &K) -> CacheResult<()>
    where
        K: Serialize + fmt::Debug + ?Sized,
    {
        self.publish(cache_name, Some(key), EventType::Remove).await
    }

    pub async fn publish_clear(&self, cache_name: &str) -> CacheResult<()> {
        self.publish::<str>(cache_name, None, EventType::Clear).await
    }

    /// Applies a received event to every local cache registered for its name.
    ///
    /// One failing cache never blocks the others; failures are logged and the
    /// remaining targets still see the eviction.
    async fn apply_event(&self, event: &CacheEvent) {
        if self.ignore_own_events && event.source_id == self.instance_id {
            debug!(
                "ignoring own {} event for cache {}",
                event.event_type, event.cache_name
            );
            return;
        }

        // Clone the targets out so no map lock is held while evicting.
        let targets: Vec<Arc<dyn LocalCache>> = match self.caches.get(&event.cache_name) {
            Some(registered) => registered.clone(),
            None => {
                debug!("no local caches registered for {}", event.cache_name);
                return;
            }
        };

        match event.event_type {
            EventType::Put | EventType::Remove => {
                let key = match event.key.as_deref().filter(|key| !key.is_empty()) {
                    Some(key) => key,
                    None => {
                        warn!(
                            "dropping {} event for cache {} without a key",
                            event.event_type, event.cache_name
                        );
                        return;
                    }
                };
                for cache in &targets {
                    if let Err(err) = cache.evict(key).await {
                        warn!(
                            "failed to evict {} from a {} cache: {}",
                            key, event.cache_name, err
                        );
                    }
                }
            }
            EventType::Clear => {
                for cache in &targets {
                    if let Err(err) = cache.evict_all().await {
                        warn!("failed to clear a {} cache: {}", event.cache_name, err);
                    }
                }
            }
        }
    }

    /// Drops one registration; returns whether something was removed and
    /// whether the name is now without registrations.
    fn remove_registration(
        &self,
        cache_name: &str,
        cache: &Arc<dyn LocalCache>,
    ) -> (bool, bool) {
        let mut removed = false;
        let now_empty = match self.caches.get_mut(cache_name) {
            Some(mut registered) => {
                if let Some(position) = registered
                    .iter()
                    .position(|candidate| Arc::ptr_eq(candidate, cache))
                {
                    registered.remove(position);
                    removed = true;
                }
                registered.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.caches
                .remove_if(cache_name, |_, registered| registered.is_empty());
        }
        (removed, now_empty)
    }
}

#[async_trait]
impl<T: MessageTransport> EventSink for CacheNotifier<T> {
    async fn dispatch_event(&self, event: &CacheEvent) {
        self.apply_event(event).await;
    }
}
