use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{Message, Queue, QueueBind, Result, Topic, TopicBind, Topology};

/// The consumer side of a queue: a stream of delivered messages.
///
/// The stream ends when the transport is closed.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Sends messages to topics.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a message to a topic, using the message name as routing key.
    async fn publish(&self, topic: &str, message: &Message) -> Result<()>;
}

/// Broker connection: topology declaration plus publisher/consumer factories.
///
/// All declarations are idempotent. Declaring an existing topic or queue
/// with an identical definition succeeds without effect.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Declares a topic.
    async fn create_topic(&self, topic: &Topic) -> Result<()>;

    /// Forwards messages from one topic to another.
    async fn bind_topic(&self, bind: &TopicBind) -> Result<()>;

    /// Declares a queue.
    async fn create_queue(&self, queue: &Queue) -> Result<()>;

    /// Delivers messages from a topic into a queue.
    async fn bind_queue(&self, bind: &QueueBind) -> Result<()>;

    /// Creates a publisher sharing this connection.
    async fn create_publisher(&self) -> Result<Arc<dyn Publisher>>;

    /// Starts consuming a declared queue.
    async fn create_consumer(&self, queue: &Queue) -> Result<MessageStream>;

    /// Closes the connection. Open consumer streams end.
    async fn close(&self) -> Result<()>;
}

/// Extension trait providing convenience methods for transports.
#[async_trait]
pub trait TransportExt: Transport {
    /// Applies every declaration of a topology, stopping at the first failure.
    async fn declare(&self, topology: &Topology) -> Result<()> {
        for topic in &topology.topics {
            self.create_topic(topic).await?;
        }
        for queue in &topology.queues {
            self.create_queue(queue).await?;
        }
        for bind in &topology.topic_binds {
            self.bind_topic(bind).await?;
        }
        for bind in &topology.queue_binds {
            self.bind_queue(bind).await?;
        }
        tracing::debug!(
            topics = topology.topics.len(),
            queues = topology.queues.len(),
            "topology declared"
        );
        Ok(())
    }
}

// Blanket implementation for all Transport implementations
impl<T: Transport + ?Sized> TransportExt for T {}
