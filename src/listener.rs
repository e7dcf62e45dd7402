//! Invalidation event listener
//!
//! One listener per process receives every subscribed topic's raw messages,
//! decodes them into [`CacheEvent`]s and hands them to the attached notifier.
//! Receiving must never take the subscription down: undecodable or malformed
//! messages are logged and dropped, and processing continues with the next
//! message.

use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::event::CacheEvent;
use crate::topic::TopicRegistry;
use crate::transport::{MessageHandler, MessageTransport};

/// Receives decoded invalidation events.
///
/// Implemented by the notifier; the listener holds it weakly so the
/// notifier/listener pair can be dropped without a reference cycle keeping it
/// alive.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn dispatch_event(&self, event: &CacheEvent);
}

/// Subscribes to invalidation topics and forwards decoded events.
///
/// Subscriptions are tracked per topic: the first `subscribe` for a cache
/// performs the transport subscription, later calls for the same cache are
/// no-ops. A transport failure rolls the local record back so the operation
/// can be retried.
pub struct MessageListener<T: MessageTransport> {
    transport: Arc<T>,
    topics: TopicRegistry,
    handler: Arc<ListenerHandler>,
}

impl<T: MessageTransport> MessageListener<T> {
    pub fn new(transport: Arc<T>, topic_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            topics: TopicRegistry::new(topic_prefix),
            handler: Arc::new(ListenerHandler::default()),
        }
    }

    /// Starts listening for invalidation events of `cache_name`.
    pub async fn subscribe(&self, cache_name: &str) -> CacheResult<()> {
        let topic = self.topics.topic(cache_name);
        if !self.topics.mark_subscribed(&topic) {
            return Ok(());
        }

        let handler: Arc<dyn MessageHandler> = self.handler.clone();
        match self.transport.subscribe(&topic, handler).await {
            Ok(()) => {
                info!("listening for invalidation events on {}", topic);
                Ok(())
            }
            Err(err) => {
                self.topics.unmark(&topic);
                Err(err)
            }
        }
    }

    /// Stops listening for invalidation events of `cache_name`.
    pub async fn unsubscribe(&self, cache_name: &str) -> CacheResult<()> {
        let topic = self.topics.topic(cache_name);
        if !self.topics.unmark(&topic) {
            return Ok(());
        }

        let handler: Arc<dyn MessageHandler> = self.handler.clone();
        match self.transport.unsubscribe(&topic, &handler).await {
            Ok(()) => {
                info!("stopped listening on {}", topic);
                Ok(())
            }
            Err(err) => {
                self.topics.mark_subscribed(&topic);
                Err(err)
            }
        }
    }

    pub fn is_subscribed(&self, cache_name: &str) -> bool {
        let topic = self.topics.topic(cache_name);
        self.topics.is_subscribed(&topic)
    }

    /// Snapshot of the topics this listener currently subscribes to.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics.snapshot()
    }

    /// Wires the sink that receives decoded events. Events arriving while no
    /// sink is attached are dropped.
    pub fn attach_notifier(&self, notifier: Weak<dyn EventSink>) {
        if let Ok(mut slot) = self.handler.notifier.write() {
            *slot = Some(notifier);
        }
    }

    pub fn detach_notifier(&self) {
        if let Ok(mut slot) = self.handler.notifier.write() {
            *slot = None;
        }
    }
}

/// Transport-facing half of the listener: decode, parse, forward.
#[derive(Default)]
struct ListenerHandler {
    notifier: RwLock<Option<Weak<dyn EventSink>>>,
}

impl ListenerHandler {
    fn current_notifier(&self) -> Option<Arc<dyn EventSink>> {
        let slot = self.notifier.read().ok()?;
        slot.as_ref()?.upgrade()
    }
}

#[async_trait]
impl MessageHandler for ListenerHandler {
    async fn on_message(&self, channel: &str, payload: &[u8]) {
        if payload.is_empty() {
            debug!("ignoring empty message on {}", channel);
            return;
        }

        let text = match std::str::from_utf8(payload) {
            Ok(text) => text,
            Err(err) => {
                let err = CacheError::MessageDecode(err);
                warn!("dropping message on {}: {}", channel, err);
                return;
            }
        };

        let event = match CacheEvent::from_json(text) {
            Ok(event) => event,
            Err(err) => {
                warn!("dropping message on {}: {}", channel, err);
                return;
            }
        };

        match self.current_notifier() {
            Some(notifier) => notifier.dispatch_event(&event).await,
            None => debug!(
                "no notifier attached, dropping {} event for cache {}",
                event.event_type, event.cache_name
            ),
        }
    }
}
