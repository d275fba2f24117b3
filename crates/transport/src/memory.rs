use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::{
    Message, Queue, QueueBind, Result, Topic, TopicBind, TransportError,
    transport::{MessageStream, Publisher, Transport},
};

struct QueueSlot {
    queue: Queue,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Option<mpsc::UnboundedReceiver<Message>>,
}

#[derive(Default)]
struct TransportState {
    topics: HashMap<String, Topic>,
    queues: HashMap<String, QueueSlot>,
    topic_binds: Vec<TopicBind>,
    queue_binds: Vec<QueueBind>,
    published: Vec<(String, Message)>,
    record_published: bool,
    fail_on_publish: bool,
    closed: bool,
}

impl TransportState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Walks the topic graph from `topic` and delivers one copy of the
    /// message to every matching queue. Returns the number of queues reached.
    fn route(&self, topic: &str, message: &Message) -> usize {
        let mut visited = HashSet::new();
        let mut reached = HashSet::new();
        let mut pending = vec![topic.to_string()];

        while let Some(current) = pending.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(definition) = self.topics.get(&current) else {
                continue;
            };

            for bind in self
                .queue_binds
                .iter()
                .filter(|b| b.topic == current && definition.routes(&b.routing_key, &message.name))
            {
                if reached.contains(&bind.queue) {
                    continue;
                }
                if let Some(slot) = self.queues.get(&bind.queue)
                    && slot.sender.send(message.clone()).is_ok()
                {
                    reached.insert(bind.queue.clone());
                }
            }

            pending.extend(
                self.topic_binds
                    .iter()
                    .filter(|b| {
                        b.source == current && definition.routes(&b.routing_key, &message.name)
                    })
                    .map(|b| b.destination.clone()),
            );
        }

        reached.len()
    }
}

/// In-memory transport implementation for testing.
///
/// Behaves like a topic-exchange broker living inside the process: topics
/// route to queues by binding key and each queue feeds exactly one consumer.
/// A transport created with [`InMemoryTransport::recording`] also keeps every
/// published message so tests can assert on it.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    state: Arc<RwLock<TransportState>>,
}

impl InMemoryTransport {
    /// Creates a new transport with no topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that keeps every published message.
    ///
    /// The log is never trimmed, so long-running processes should use [`InMemoryTransport::new`].
    pub fn recording() -> Self {
        let state = TransportState {
            record_published: true,
            ..TransportState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Configures every subsequent publish to fail until reset.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Returns every successfully published `(topic, message)` pair in order.
    ///
    /// Always empty unless the transport was created with [`InMemoryTransport::recording`].
    pub async fn published(&self) -> Vec<(String, Message)> {
        self.state.read().await.published.clone()
    }

    /// Returns the messages published to a single topic, in order.
    pub async fn published_to(&self, topic: &str) -> Vec<Message> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Returns true if the topic has been declared.
    pub async fn has_topic(&self, name: &str) -> bool {
        self.state.read().await.topics.contains_key(name)
    }

    /// Returns true if the queue has been declared.
    pub async fn has_queue(&self, name: &str) -> bool {
        self.state.read().await.queues.contains_key(name)
    }
}

/// Publisher handle onto an [`InMemoryTransport`].
#[derive(Clone)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<TransportState>>,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, message: &Message) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if state.fail_on_publish {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        if !state.topics.contains_key(topic) {
            return Err(TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: "unknown topic".to_string(),
            });
        }

        let reached = state.route(topic, message);
        if reached == 0 {
            tracing::debug!(topic, name = %message.name, "message not routed to any queue");
        }
        if state.record_published {
            state.published.push((topic.to_string(), message.clone()));
        }
        metrics::counter!("transport_messages_published_total").increment(1);

        Ok(())
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn create_topic(&self, topic: &Topic) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if topic.name.is_empty() {
            return Err(TransportError::CreateTopicFailed {
                topic: topic.name.clone(),
                reason: "topic name must not be empty".to_string(),
            });
        }

        match state.topics.get(&topic.name) {
            Some(existing) if existing == topic => Ok(()),
            Some(existing) => Err(TransportError::CreateTopicFailed {
                topic: topic.name.clone(),
                reason: format!(
                    "already declared with kind {:?} (durable: {})",
                    existing.kind, existing.durable
                ),
            }),
            None => {
                state.topics.insert(topic.name.clone(), topic.clone());
                Ok(())
            }
        }
    }

    async fn bind_topic(&self, bind: &TopicBind) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        for name in [&bind.source, &bind.destination] {
            if !state.topics.contains_key(name) {
                return Err(TransportError::BindFailed {
                    origin: bind.source.clone(),
                    destination: bind.destination.clone(),
                    reason: format!("unknown topic {name}"),
                });
            }
        }

        if !state.topic_binds.contains(bind) {
            state.topic_binds.push(bind.clone());
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &Queue) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if queue.name.is_empty() {
            return Err(TransportError::CreateQueueFailed {
                queue: queue.name.clone(),
                reason: "queue name must not be empty".to_string(),
            });
        }

        match state.queues.get(&queue.name) {
            Some(slot) if &slot.queue == queue => Ok(()),
            Some(slot) => Err(TransportError::CreateQueueFailed {
                queue: queue.name.clone(),
                reason: format!("already declared (durable: {})", slot.queue.durable),
            }),
            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                state.queues.insert(
                    queue.name.clone(),
                    QueueSlot {
                        queue: queue.clone(),
                        sender,
                        receiver: Some(receiver),
                    },
                );
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, bind: &QueueBind) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        if !state.topics.contains_key(&bind.topic) {
            return Err(TransportError::BindFailed {
                origin: bind.topic.clone(),
                destination: bind.queue.clone(),
                reason: format!("unknown topic {}", bind.topic),
            });
        }
        if !state.queues.contains_key(&bind.queue) {
            return Err(TransportError::BindFailed {
                origin: bind.topic.clone(),
                destination: bind.queue.clone(),
                reason: format!("unknown queue {}", bind.queue),
            });
        }

        if !state.queue_binds.contains(bind) {
            state.queue_binds.push(bind.clone());
        }
        Ok(())
    }

    async fn create_publisher(&self) -> Result<Arc<dyn Publisher>> {
        self.state.read().await.ensure_open()?;
        Ok(Arc::new(InMemoryPublisher {
            state: Arc::clone(&self.state),
        }))
    }

    async fn create_consumer(&self, queue: &Queue) -> Result<MessageStream> {
        let mut state = self.state.write().await;
        state.ensure_open()?;

        let slot = state
            .queues
            .get_mut(&queue.name)
            .ok_or_else(|| TransportError::UnknownQueue(queue.name.clone()))?;
        let receiver = slot
            .receiver
            .take()
            .ok_or_else(|| TransportError::ConsumerTaken(queue.name.clone()))?;

        let stream = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|message| (Ok(message), receiver))
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.closed = true;
        // Dropping the senders ends every consumer stream.
        state.queues.clear();
        tracing::info!("in-memory transport closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MessageKind, TopicKind};
    use futures_util::StreamExt;

    fn event(name: &str) -> Message {
        Message::builder()
            .name(name)
            .kind(MessageKind::Event)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    async fn transport_with_queue(binding_key: &str) -> InMemoryTransport {
        let transport = InMemoryTransport::recording();
        transport.create_topic(&Topic::new("events")).await.unwrap();
        transport.create_queue(&Queue::new("inbox")).await.unwrap();
        transport
            .bind_queue(&QueueBind::new("events", "inbox", binding_key))
            .await
            .unwrap();
        transport
    }

    #[tokio::test]
    async fn declaring_same_topic_twice_is_not_an_error() {
        let transport = InMemoryTransport::new();
        transport.create_topic(&Topic::new("events")).await.unwrap();
        transport.create_topic(&Topic::new("events")).await.unwrap();
        assert!(transport.has_topic("events").await);
    }

    #[tokio::test]
    async fn redeclaring_topic_with_other_kind_fails() {
        let transport = InMemoryTransport::new();
        transport.create_topic(&Topic::new("events")).await.unwrap();

        let result = transport
            .create_topic(&Topic::new("events").with_kind(TopicKind::Fanout))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::CreateTopicFailed { .. })
        ));
    }

    #[tokio::test]
    async fn declaring_same_queue_twice_is_not_an_error() {
        let transport = InMemoryTransport::new();
        transport.create_queue(&Queue::new("inbox")).await.unwrap();
        transport.create_queue(&Queue::new("inbox")).await.unwrap();

        let result = transport
            .create_queue(&Queue::new("inbox").transient())
            .await;
        assert!(matches!(
            result,
            Err(TransportError::CreateQueueFailed { .. })
        ));
    }

    #[tokio::test]
    async fn binding_unknown_endpoints_fails() {
        let transport = InMemoryTransport::new();
        transport.create_topic(&Topic::new("events")).await.unwrap();

        let result = transport
            .bind_queue(&QueueBind::new("events", "missing", "#"))
            .await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));

        let result = transport
            .bind_topic(&TopicBind::new("events", "missing", "#"))
            .await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));
    }

    #[tokio::test]
    async fn published_messages_reach_bound_queue_in_order() {
        let transport = transport_with_queue("#").await;
        let mut consumer = transport
            .create_consumer(&Queue::new("inbox"))
            .await
            .unwrap();
        let publisher = transport.create_publisher().await.unwrap();

        publisher.publish("events", &event("First")).await.unwrap();
        publisher.publish("events", &event("Second")).await.unwrap();

        let first = consumer.next().await.unwrap().unwrap();
        let second = consumer.next().await.unwrap().unwrap();
        assert_eq!(first.name, "First");
        assert_eq!(second.name, "Second");
        assert_eq!(transport.published_to("events").await.len(), 2);
    }

    #[tokio::test]
    async fn routing_key_filters_delivery() {
        let transport = transport_with_queue("Saga*").await;
        transport
            .bind_queue(&QueueBind::new("events", "inbox", "SagaClosed"))
            .await
            .unwrap();
        let mut consumer = transport
            .create_consumer(&Queue::new("inbox"))
            .await
            .unwrap();
        let publisher = transport.create_publisher().await.unwrap();

        publisher.publish("events", &event("SagaCreated")).await.unwrap();
        publisher.publish("events", &event("SagaClosed")).await.unwrap();
        transport.close().await.unwrap();

        let delivered: Vec<_> = consumer.by_ref().collect().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].as_ref().unwrap().name, "SagaClosed");
    }

    #[tokio::test]
    async fn topic_binds_forward_messages_once_per_queue() {
        let transport = transport_with_queue("#").await;
        transport.create_topic(&Topic::new("audit")).await.unwrap();
        transport
            .bind_topic(&TopicBind::new("events", "audit", "#"))
            .await
            .unwrap();
        transport
            .bind_topic(&TopicBind::new("audit", "events", "#"))
            .await
            .unwrap();
        transport
            .bind_queue(&QueueBind::new("audit", "inbox", "#"))
            .await
            .unwrap();

        let consumer = transport
            .create_consumer(&Queue::new("inbox"))
            .await
            .unwrap();
        let publisher = transport.create_publisher().await.unwrap();
        publisher.publish("events", &event("Loop")).await.unwrap();
        transport.close().await.unwrap();

        let delivered: Vec<_> = consumer.collect().await;
        assert_eq!(delivered.len(), 1);
    }

    #[tokio::test]
    async fn second_consumer_on_same_queue_is_rejected() {
        let transport = transport_with_queue("#").await;
        let _first = transport
            .create_consumer(&Queue::new("inbox"))
            .await
            .unwrap();

        let second = transport.create_consumer(&Queue::new("inbox")).await;
        assert!(matches!(second, Err(TransportError::ConsumerTaken(_))));

        let unknown = transport.create_consumer(&Queue::new("nope")).await;
        assert!(matches!(unknown, Err(TransportError::UnknownQueue(_))));
    }

    #[tokio::test]
    async fn default_transport_delivers_without_keeping_a_log() {
        let transport = InMemoryTransport::new();
        transport.create_topic(&Topic::new("events")).await.unwrap();
        transport.create_queue(&Queue::new("inbox")).await.unwrap();
        transport
            .bind_queue(&QueueBind::new("events", "inbox", "#"))
            .await
            .unwrap();
        let mut consumer = transport
            .create_consumer(&Queue::new("inbox"))
            .await
            .unwrap();
        let publisher = transport.create_publisher().await.unwrap();

        for _ in 0..3 {
            publisher.publish("events", &event("Tick")).await.unwrap();
        }

        for _ in 0..3 {
            assert_eq!(consumer.next().await.unwrap().unwrap().name, "Tick");
        }
        assert!(transport.published().await.is_empty());
        assert!(transport.published_to("events").await.is_empty());
    }

    #[tokio::test]
    async fn publish_failures() {
        let transport = transport_with_queue("#").await;
        let publisher = transport.create_publisher().await.unwrap();

        let unknown = publisher.publish("nope", &event("X")).await;
        assert!(matches!(
            unknown,
            Err(TransportError::PublishFailed { .. })
        ));

        transport.set_fail_on_publish(true).await;
        let failed = publisher.publish("events", &event("X")).await;
        assert!(matches!(failed, Err(TransportError::PublishFailed { .. })));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn closed_transport_rejects_operations() {
        let transport = transport_with_queue("#").await;
        let publisher = transport.create_publisher().await.unwrap();
        transport.close().await.unwrap();

        assert!(matches!(
            publisher.publish("events", &event("X")).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.create_topic(&Topic::new("other")).await,
            Err(TransportError::Closed)
        ));
    }
}
