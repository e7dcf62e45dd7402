//! Topic naming and subscription bookkeeping
//!
//! Every cache name maps to exactly one broadcast topic, `<prefix>:topic:<name>`.
//! The registry tracks which topics this process already subscribed to so that
//! repeated cache registrations reuse the existing subscription instead of
//! opening another one.

use dashmap::DashSet;

/// Builds the broadcast topic for `cache_name` under `prefix`.
///
/// Same inputs always produce the same topic; publisher and subscriber sides
/// both go through here.
pub fn topic_for(prefix: &str, cache_name: &str) -> String {
    format!("{}:topic:{}", prefix, cache_name)
}

/// Per-process record of active topic subscriptions.
///
/// Membership changes are atomic: under concurrent subscribe attempts for the
/// same cache exactly one caller wins and performs the transport work, the rest
/// see the topic as already held.
#[derive(Debug)]
pub struct TopicRegistry {
    prefix: String,
    subscribed: DashSet<String>,
}

impl TopicRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            subscribed: DashSet::new(),
        }
    }

    /// Topic for `cache_name` under this registry's prefix.
    pub fn topic(&self, cache_name: &str) -> String {
        topic_for(&self.prefix, cache_name)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Records `topic` as subscribed. Returns `true` for the caller that
    /// inserted it, `false` when it was already present.
    pub fn mark_subscribed(&self, topic: &str) -> bool {
        self.subscribed.insert(topic.to_owned())
    }

    /// Clears the subscription record for `topic`. Returns `true` when the
    /// topic was present.
    pub fn unmark(&self, topic: &str) -> bool {
        self.subscribed.remove(topic).is_some()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscribed.contains(topic)
    }

    /// Snapshot of the currently subscribed topics.
    pub fn snapshot(&self) -> Vec<String> {
        self.subscribed.iter().map(|topic| topic.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn topic_shape_is_prefix_topic_name() {
        assert_eq!(topic_for("cachebus", "users"), "cachebus:topic:users");
        assert_eq!(topic_for("orders-svc", "orders"), "orders-svc:topic:orders");
    }

    #[test]
    fn same_inputs_same_topic() {
        let registry = TopicRegistry::new("cachebus");
        assert_eq!(registry.topic("users"), registry.topic("users"));
        assert_eq!(registry.topic("users"), topic_for("cachebus", "users"));
    }

    #[test]
    fn mark_is_first_wins() {
        let registry = TopicRegistry::new("cachebus");
        let topic = registry.topic("users");

        assert!(registry.mark_subscribed(&topic));
        assert!(!registry.mark_subscribed(&topic));
        assert!(registry.is_subscribed(&topic));

        assert!(registry.unmark(&topic));
        assert!(!registry.unmark(&topic));
        assert!(!registry.is_subscribed(&topic));
    }

    #[test]
    fn snapshot_reflects_current_marks() {
        let registry = TopicRegistry::new("cachebus");
        registry.mark_subscribed(&registry.topic("users"));
        registry.mark_subscribed(&registry.topic("orders"));
        registry.unmark(&registry.topic("users"));

        assert_eq!(registry.snapshot(), vec!["cachebus:topic:orders".to_owned()]);
    }

    #[test]
    fn concurrent_marks_admit_exactly_one_winner() {
        let registry = Arc::new(TopicRegistry::new("cachebus"));
        let topic = registry.topic("users");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let topic = topic.clone();
                std::thread::spawn(move || registry.mark_subscribed(&topic))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or(false))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
