//! Declarative topology descriptors.

use serde::{Deserialize, Serialize};

/// How a topic routes messages to its bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    /// Routing key must equal the binding key.
    Direct,
    /// Every binding receives every message.
    Fanout,
    /// Binding keys are dot-separated patterns (`*` = one word, `#` = zero or more).
    #[default]
    Topic,
}

/// A named topic (exchange) messages are published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    pub kind: TopicKind,
    pub durable: bool,
}

impl Topic {
    /// Creates a durable pattern-routed topic.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TopicKind::Topic,
            durable: true,
        }
    }

    pub fn with_kind(mut self, kind: TopicKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }

    /// Returns true if a message with `routing_key` passes a binding with `binding_key`.
    pub fn routes(&self, binding_key: &str, routing_key: &str) -> bool {
        match self.kind {
            TopicKind::Direct => binding_key == routing_key,
            TopicKind::Fanout => true,
            TopicKind::Topic => routing_key_matches(binding_key, routing_key),
        }
    }
}

/// A named queue consumers read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
}

impl Queue {
    /// Creates a durable queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
        }
    }

    pub fn transient(mut self) -> Self {
        self.durable = false;
        self
    }
}

/// Forwards messages from one topic to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicBind {
    pub source: String,
    pub destination: String,
    pub routing_key: String,
}

impl TopicBind {
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Delivers messages from a topic into a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBind {
    pub topic: String,
    pub queue: String,
    pub routing_key: String,
}

impl QueueBind {
    pub fn new(
        topic: impl Into<String>,
        queue: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            queue: queue.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// A complete set of declarations, applied in order: topics, queues,
/// topic binds, queue binds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub topics: Vec<Topic>,
    pub queues: Vec<Queue>,
    pub topic_binds: Vec<TopicBind>,
    pub queue_binds: Vec<QueueBind>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: Topic) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn queue(mut self, queue: Queue) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn bind_topic(mut self, bind: TopicBind) -> Self {
        self.topic_binds.push(bind);
        self
    }

    pub fn bind_queue(mut self, bind: QueueBind) -> Self {
        self.queue_binds.push(bind);
        self
    }
}

/// AMQP-style topic matching on dot-separated words.
pub fn routing_key_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches_words(&pattern, &key)
}

fn matches_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| matches_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&head, tail)) => (word == "*" || word == head) && matches_words(rest, tail),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_matches() {
        assert!(routing_key_matches("saga.expire", "saga.expire"));
        assert!(!routing_key_matches("saga.expire", "saga.start"));
    }

    #[test]
    fn star_matches_exactly_one_word() {
        assert!(routing_key_matches("saga.*", "saga.expire"));
        assert!(!routing_key_matches("saga.*", "saga"));
        assert!(!routing_key_matches("saga.*", "saga.expire.now"));
    }

    #[test]
    fn hash_matches_zero_or_more_words() {
        assert!(routing_key_matches("#", "anything.at.all"));
        assert!(routing_key_matches("saga.#", "saga"));
        assert!(routing_key_matches("saga.#", "saga.expire.now"));
        assert!(routing_key_matches("#.closed", "saga.closed"));
        assert!(!routing_key_matches("#.closed", "saga.created"));
    }

    #[test]
    fn topic_kind_controls_routing() {
        let direct = Topic::new("commands").with_kind(TopicKind::Direct);
        assert!(direct.routes("saga.expire", "saga.expire"));
        assert!(!direct.routes("saga.*", "saga.expire"));

        let fanout = Topic::new("events").with_kind(TopicKind::Fanout);
        assert!(fanout.routes("ignored", "SagaCreated"));

        let topic = Topic::new("events");
        assert!(!topic.routes("Saga*", "SagaCreated"));
        assert!(topic.routes("#", "SagaCreated"));
    }

    #[test]
    fn topology_builder_keeps_declaration_order() {
        let topology = Topology::new()
            .topic(Topic::new("a"))
            .topic(Topic::new("b"))
            .queue(Queue::new("q"))
            .bind_topic(TopicBind::new("a", "b", "#"))
            .bind_queue(QueueBind::new("b", "q", "#"));

        assert_eq!(topology.topics[0].name, "a");
        assert_eq!(topology.topics[1].name, "b");
        assert_eq!(topology.queues.len(), 1);
        assert_eq!(topology.topic_binds[0].destination, "b");
        assert_eq!(topology.queue_binds[0].queue, "q");
    }
}
