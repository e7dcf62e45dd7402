//! End-to-end invalidation flows between two notifiers sharing a transport.
//!
//! The in-process transport delivers synchronously, so each test observes the
//! complete publish, decode and evict path without sleeping or polling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cachebus::{
    async_trait, topic_for, CacheNotifier, CacheResult, EventType, LocalCache, MemoryTransport,
    MessageTransport, NotifierConfig, DEFAULT_TOPIC_PREFIX,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[derive(Default)]
struct RecordingCache {
    evicted: Mutex<Vec<String>>,
    clears: AtomicUsize,
}

impl RecordingCache {
    fn evicted(&self) -> Vec<String> {
        self.evicted.lock().unwrap().clone()
    }

    fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalCache for RecordingCache {
    async fn evict(&self, key: &str) -> CacheResult<()> {
        self.evicted.lock().unwrap().push(key.to_owned());
        Ok(())
    }

    async fn evict_all(&self) -> CacheResult<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn put_in_one_process_evicts_in_the_other() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    subscriber
        .register("users", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    publisher.publish_put("users", &7u32).await.unwrap();

    assert_eq!(local.evicted(), vec!["7".to_owned()]);
}

#[tokio::test]
async fn structured_keys_match_across_processes() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    subscriber
        .register("orders", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    publisher
        .publish_remove("orders", &(42u64, "eu"))
        .await
        .unwrap();

    assert_eq!(local.evicted(), vec![r#"[42,"eu"]"#.to_owned()]);
}

#[tokio::test]
async fn clear_empties_only_the_named_cache() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let users = Arc::new(RecordingCache::default());
    let orders = Arc::new(RecordingCache::default());
    subscriber
        .register("users", users.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();
    subscriber
        .register("orders", orders.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    publisher.publish_clear("orders").await.unwrap();

    assert_eq!(orders.clears(), 1);
    assert_eq!(users.clears(), 0);
    assert!(orders.evicted().is_empty());
}

#[tokio::test]
async fn malformed_messages_do_not_stop_later_deliveries() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    subscriber
        .register("users", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    let topic = topic_for(DEFAULT_TOPIC_PREFIX, "users");
    transport.publish(&topic, "").await.unwrap();
    transport.publish(&topic, "not json at all").await.unwrap();
    transport
        .publish(&topic, r#"{"eventType":"BOGUS","cacheName":"users"}"#)
        .await
        .unwrap();

    publisher.publish_remove("users", "7").await.unwrap();

    assert_eq!(local.evicted(), vec!["7".to_owned()]);
}

#[tokio::test]
async fn deregistering_the_last_cache_stops_delivery() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let recording = Arc::new(RecordingCache::default());
    let local: Arc<dyn LocalCache> = recording.clone();
    subscriber.register("users", local.clone()).await.unwrap();

    publisher.publish_put("users", "1").await.unwrap();
    subscriber.deregister("users", &local).await.unwrap();
    publisher.publish_put("users", "2").await.unwrap();

    assert_eq!(recording.evicted(), vec!["1".to_owned()]);
    let topic = topic_for(DEFAULT_TOPIC_PREFIX, "users");
    assert_eq!(transport.subscriber_count(&topic), 0);
    assert!(!subscriber.is_subscribed("users"));
}

#[tokio::test]
async fn by_default_a_process_applies_its_own_events() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let notifier = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    notifier
        .register("users", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    notifier.publish_put("users", "7").await.unwrap();

    assert_eq!(local.evicted(), vec!["7".to_owned()]);
}

#[tokio::test]
async fn self_echo_filtering_skips_only_own_events() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let filtering = CacheNotifier::new(
        transport.clone(),
        NotifierConfig {
            ignore_own_events: true,
            ..NotifierConfig::default()
        },
    );
    let other = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    filtering
        .register("users", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    filtering.publish_put("users", "own").await.unwrap();
    assert!(local.evicted().is_empty());

    other.publish_put("users", "foreign").await.unwrap();
    assert_eq!(local.evicted(), vec!["foreign".to_owned()]);
}

#[tokio::test]
async fn a_keyless_remove_evicts_the_null_key() {
    init_tracing();
    let transport = Arc::new(MemoryTransport::new());
    let publisher = CacheNotifier::new(transport.clone(), NotifierConfig::default());
    let subscriber = CacheNotifier::new(transport.clone(), NotifierConfig::default());

    let local = Arc::new(RecordingCache::default());
    subscriber
        .register("users", local.clone() as Arc<dyn LocalCache>)
        .await
        .unwrap();

    publisher
        .publish::<str>("users", None, EventType::Remove)
        .await
        .unwrap();

    assert_eq!(local.evicted(), vec!["null".to_owned()]);
}
