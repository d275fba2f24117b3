//! Messaging abstraction for the saga runtime.
//!
//! Orchestration code talks to a broker only through the traits in this
//! crate:
//! - [`Transport`] declares topology and hands out publishers and consumers
//! - [`Publisher`] sends a [`Message`] to a topic
//! - [`MessageStream`] is the consumer side of a queue
//!
//! [`InMemoryTransport`] implements the whole contract in-process and is
//! used by tests and by the default daemon configuration.

pub mod error;
pub mod memory;
pub mod message;
pub mod topology;
pub mod transport;

pub use error::{Result, TransportError};
pub use memory::InMemoryTransport;
pub use message::{CAUSATION_ID, CORRELATION_ID, Message, MessageBuilder, MessageId, MessageKind};
pub use topology::{Queue, QueueBind, Topic, TopicBind, TopicKind, Topology};
pub use transport::{MessageStream, Publisher, Transport, TransportExt};
