use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use transport::{Message, MessageStream};

use crate::context::MessageContext;
use crate::error::Result;

/// Something that reacts to incoming messages, typically a saga provider.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles a message. Returns `Ok(false)` if the message was not for this handler.
    async fn handle(&self, message: &Message, ctx: &MessageContext) -> Result<bool>;
}

/// Feeds consumed messages to every registered handler.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Offers a message to every handler and returns how many accepted it.
    ///
    /// Handler errors are logged and counted, never returned.
    #[tracing::instrument(skip(self, message), fields(name = %message.name, message_id = %message.message_id))]
    pub async fn dispatch(&self, message: &Message) -> usize {
        let ctx = MessageContext::caused_by(message);
        let mut handled = 0;

        for handler in &self.handlers {
            match handler.handle(message, &ctx).await {
                Ok(true) => handled += 1,
                Ok(false) => {}
                Err(e) => {
                    metrics::counter!("saga_handler_errors_total", "handler" => handler.name().to_string())
                        .increment(1);
                    tracing::error!(handler = handler.name(), error = %e, "message handling failed");
                }
            }
        }

        if handled == 0 {
            tracing::debug!("message not handled");
        }
        metrics::counter!("saga_messages_dispatched_total").increment(1);
        handled
    }

    /// Consumes messages until the stream ends or `shutdown` resolves.
    pub async fn run<F>(&self, mut consumer: MessageStream, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        tracing::info!(handlers = self.handlers.len(), "dispatcher started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = consumer.next() => match next {
                    Some(Ok(message)) => {
                        self.dispatch(&message).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "failed to receive message");
                    }
                    None => break,
                },
            }
        }

        tracing::info!("dispatcher stopped");
    }
}
