//! Broadcast transport seam
//!
//! The notifier and listener only ever see these traits; the Redis transport
//! and the in-process one below both implement them. Publishing is
//! fire-and-forget fan-out with no delivery order or durability promises, so
//! everything layered on top has to stay correct when messages arrive late,
//! duplicated or not at all.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::CacheResult;

/// Receives raw messages from a subscribed topic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, channel: &str, payload: &[u8]);
}

/// Publish/subscribe transport carrying invalidation broadcasts.
#[async_trait]
pub trait MessageTransport: Send + Sync + 'static {
    /// Delivers future messages on `topic` to `handler`.
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()>;

    /// Stops delivering `topic` messages to `handler`. Unknown pairs are a
    /// no-op.
    async fn unsubscribe(&self, topic: &str, handler: &Arc<dyn MessageHandler>)
        -> CacheResult<()>;

    /// Broadcasts `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> CacheResult<()>;
}

/// In-process transport backed by a shared topic table.
///
/// Delivery happens inline inside [`publish`](MessageTransport::publish),
/// which makes multi-notifier flows deterministic to test. Handlers are
/// compared by pointer identity, so the same handler can be attached to many
/// topics and detached from one without disturbing the rest.
#[derive(Default)]
pub struct MemoryTransport {
    topics: DashMap<String, Vec<Arc<dyn MessageHandler>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers currently attached to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> CacheResult<()> {
        self.topics.entry(topic.to_owned()).or_default().push(handler);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        topic: &str,
        handler: &Arc<dyn MessageHandler>,
    ) -> CacheResult<()> {
        let now_empty = match self.topics.get_mut(topic) {
            Some(mut handlers) => {
                handlers.retain(|subscribed| !Arc::ptr_eq(subscribed, handler));
                handlers.is_empty()
            }
            None => return Ok(()),
        };
        if now_empty {
            self.topics.remove_if(topic, |_, handlers| handlers.is_empty());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> CacheResult<()> {
        // Clone the handler list out so no map lock is held while awaiting.
        let handlers: Vec<Arc<dyn MessageHandler>> = match self.topics.get(topic) {
            Some(handlers) => handlers.clone(),
            None => return Ok(()),
        };
        for handler in handlers {
            handler.on_message(topic, payload.as_bytes()).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, String)>>,
    }

    impl Recording {
        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recording {
        async fn on_message(&self, channel: &str, payload: &[u8]) {
            self.seen
                .lock()
                .unwrap()
                .push((channel.to_owned(), String::from_utf8_lossy(payload).into_owned()));
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_the_matching_topic() {
        let transport = MemoryTransport::new();
        let users = Arc::new(Recording::default());
        let orders = Arc::new(Recording::default());

        transport
            .subscribe("bus:topic:users", users.clone())
            .await
            .unwrap();
        transport
            .subscribe("bus:topic:orders", orders.clone())
            .await
            .unwrap();

        transport.publish("bus:topic:users", "hello").await.unwrap();

        assert_eq!(
            users.seen(),
            vec![("bus:topic:users".to_owned(), "hello".to_owned())]
        );
        assert!(orders.seen().is_empty());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let transport = MemoryTransport::new();
        transport.publish("bus:topic:ghost", "x").await.unwrap();
        assert_eq!(transport.subscriber_count("bus:topic:ghost"), 0);
    }

    #[tokio::test]
    async fn unsubscribe_detaches_by_identity() {
        let transport = MemoryTransport::new();
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());

        transport
            .subscribe("bus:topic:users", first.clone())
            .await
            .unwrap();
        transport
            .subscribe("bus:topic:users", second.clone())
            .await
            .unwrap();
        assert_eq!(transport.subscriber_count("bus:topic:users"), 2);

        let first_handler: Arc<dyn MessageHandler> = first.clone();
        transport
            .unsubscribe("bus:topic:users", &first_handler)
            .await
            .unwrap();
        assert_eq!(transport.subscriber_count("bus:topic:users"), 1);

        transport.publish("bus:topic:users", "after").await.unwrap();
        assert!(first.seen().is_empty());
        assert_eq!(second.seen().len(), 1);
    }
}
