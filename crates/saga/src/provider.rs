//! Orchestration facade tying sagas to storage, transport and scheduling.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{SagaId, SagaUuid};
use scheduler::{ScheduledOperation, ScheduledOperationId, SchedulerHandle};
use serde::{Deserialize, Serialize};
use transport::{Message, Publisher};

use crate::context::MessageContext;
use crate::dispatcher::MessageHandler;
use crate::error::{Result, SagaError};
use crate::events::SagaLifecycleEvent;
use crate::listeners::{Delivery, SagaListeners};
use crate::saga::{Saga, SagaInstance};
use crate::status::SagaStatus;
use crate::store::SagaStore;

/// Name of the command the scheduler publishes when a saga runs out of time.
pub const EXPIRE_COMMAND: &str = "saga.expire";

/// Payload of the expiration command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpirationRequest {
    pub uuid: SagaUuid,
    pub saga_type: String,
}

/// Id of the scheduled operation that expires a saga.
pub fn expiration_operation_id(id: &SagaId) -> ScheduledOperationId {
    ScheduledOperationId::new(format!("saga-expire:{}:{}", id.saga_type, id.uuid))
}

/// Configuration for a saga provider.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Time between creation and expiry.
    pub expiration: chrono::Duration,

    /// Topic buffered commands are published to.
    pub command_topic: String,

    /// Topic buffered and lifecycle events are published to.
    pub event_topic: String,

    /// How many times a listener is re-run after a conflicting save.
    pub conflict_retries: u32,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            expiration: chrono::Duration::hours(1),
            command_topic: "saga.commands".to_string(),
            event_topic: "saga.events".to_string(),
            conflict_retries: 3,
        }
    }
}

/// Runs sagas of type `S`.
///
/// Every call persists first and publishes afterwards, so no message leaves
/// the process for a state change that was not stored.
pub struct SagaProvider<S: Saga> {
    store: Arc<dyn SagaStore>,
    publisher: Arc<dyn Publisher>,
    scheduler: SchedulerHandle,
    config: SagaConfig,
    listeners: SagaListeners<S>,
}

impl<S: Saga> SagaProvider<S> {
    /// Creates a provider with no listeners.
    pub fn new(
        store: Arc<dyn SagaStore>,
        publisher: Arc<dyn Publisher>,
        scheduler: SchedulerHandle,
        config: SagaConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            scheduler,
            config,
            listeners: SagaListeners::new(),
        }
    }

    /// Sets the events this saga type reacts to.
    pub fn with_listeners(mut self, listeners: SagaListeners<S>) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn listeners(&self) -> &SagaListeners<S> {
        &self.listeners
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Creates, persists and schedules the expiry of a new saga.
    ///
    /// Buffered messages are published only after the saga was stored.
    #[tracing::instrument(skip(self, command, ctx), fields(saga_type = S::saga_type()))]
    pub async fn start(
        &self,
        uuid: SagaUuid,
        command: S::Start,
        ctx: &MessageContext,
    ) -> Result<SagaInstance<S>> {
        let id = SagaId::new(uuid, S::saga_type());
        let now = Utc::now();
        let mut instance = SagaInstance::<S>::new(id.clone(), now, now + self.config.expiration);

        instance.update(|state, saga| state.start(command, saga))?;

        let version = self.store.save(&instance.to_record()?).await?;
        instance.mark_persisted(version);

        if !instance.status().is_terminal() {
            self.schedule_expiration(&instance, ctx).await?;
        }

        self.flush(&mut instance, ctx).await?;
        self.publish_lifecycle(SagaLifecycleEvent::created(id, Utc::now()), ctx)
            .await?;

        metrics::counter!("saga_started_total", "saga_type" => S::saga_type()).increment(1);
        tracing::info!(saga = %instance.id(), status = %instance.status(), "saga started");

        Ok(instance)
    }

    /// Loads an active saga.
    ///
    /// Terminal sagas are rejected with `SagaExpired` or `SagaClosed`, and so
    /// are sagas still in progress whose expiry date has passed.
    #[tracing::instrument(skip(self, ctx), fields(saga_type = S::saga_type()))]
    pub async fn obtain(&self, uuid: SagaUuid, ctx: &MessageContext) -> Result<SagaInstance<S>> {
        let id = SagaId::new(uuid, S::saga_type());
        let record = self.store.load(&id).await?;

        match record.status {
            SagaStatus::Expired => return Err(SagaError::SagaExpired(id)),
            SagaStatus::Completed | SagaStatus::Failed => {
                return Err(SagaError::SagaClosed {
                    id,
                    status: record.status,
                });
            }
            SagaStatus::InProgress if record.is_overdue(Utc::now()) => {
                return Err(SagaError::SagaExpired(id));
            }
            SagaStatus::InProgress => {}
        }

        tracing::debug!(saga = %id, correlation_id = ?ctx.correlation_id, "saga obtained");
        SagaInstance::from_record(record)
    }

    /// Persists a saga and publishes what it buffered.
    ///
    /// Emits `SagaStatusChanged` when the status changed since the saga was
    /// loaded, and cancels the expiration once the saga is closed.
    #[tracing::instrument(skip(self, instance, ctx), fields(saga = %instance.id()))]
    pub async fn save(&self, instance: &mut SagaInstance<S>, ctx: &MessageContext) -> Result<()> {
        let previous = instance.loaded_status();
        let current = instance.status();

        let version = match self.store.save(&instance.to_record()?).await {
            Ok(version) => version,
            Err(e) => {
                if e.is_conflict() {
                    metrics::counter!("saga_conflicts_total", "saga_type" => S::saga_type())
                        .increment(1);
                }
                return Err(e);
            }
        };
        instance.mark_persisted(version);

        self.flush(instance, ctx).await?;

        if previous != current {
            let changed = SagaLifecycleEvent::status_changed(
                instance.id().clone(),
                previous,
                current,
                Utc::now(),
            );
            self.publish_lifecycle(changed, ctx).await?;
            if current.is_terminal() {
                metrics::counter!("saga_closed_total", "status" => current.as_str()).increment(1);
                tracing::info!(status = %current, "saga closed");
            }
        }

        if current.is_terminal() && !previous.is_terminal() {
            self.cancel_expiration(instance.id()).await;
        }

        metrics::counter!("saga_saved_total", "saga_type" => S::saga_type()).increment(1);
        Ok(())
    }

    // A leftover expiration is ignored once it fires, so failures are only reported.
    async fn cancel_expiration(&self, id: &SagaId) {
        if let Err(e) = self.scheduler.remove(&expiration_operation_id(id)).await {
            metrics::counter!("saga_expiration_cancel_failures_total", "saga_type" => S::saga_type())
                .increment(1);
            tracing::warn!(saga = %id, error = %e, "failed to cancel saga expiration");
        }
    }

    /// Handles an incoming message.
    ///
    /// Returns `Ok(false)` if the message is neither a registered event nor
    /// this saga type's expiration command.
    pub async fn handle(&self, message: &Message, ctx: &MessageContext) -> Result<bool> {
        if message.is_command() {
            if message.name != EXPIRE_COMMAND {
                return Ok(false);
            }
            let request: ExpirationRequest =
                message.decode().map_err(|source| SagaError::Decode {
                    name: message.name.clone(),
                    source,
                })?;
            if request.saga_type != S::saga_type() {
                return Ok(false);
            }
            self.retry_on_conflict(|| self.expire(request.uuid, ctx))
                .await?;
            return Ok(true);
        }

        if !self.listeners.handles(&message.name) {
            return Ok(false);
        }
        let delivery = self.listeners.deliver(message)?;
        self.retry_on_conflict(|| self.deliver(&delivery, ctx))
            .await?;
        Ok(true)
    }

    async fn deliver(&self, delivery: &Delivery<S>, ctx: &MessageContext) -> Result<()> {
        let mut instance = self.obtain(delivery.saga_uuid(), ctx).await?;
        instance.update(|state, saga| delivery.apply(state, saga))?;
        self.save(&mut instance, ctx).await
    }

    #[tracing::instrument(skip(self, ctx), fields(saga_type = S::saga_type()))]
    async fn expire(&self, uuid: SagaUuid, ctx: &MessageContext) -> Result<()> {
        let id = SagaId::new(uuid, S::saga_type());
        let record = match self.store.load(&id).await {
            Ok(record) => record,
            Err(SagaError::SagaNotFound(_)) => {
                tracing::debug!(saga = %id, "expired saga no longer exists");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if record.status.is_terminal() {
            tracing::debug!(saga = %id, status = %record.status, "saga closed before expiring");
            return Ok(());
        }

        let mut instance = SagaInstance::<S>::from_record(record)?;
        instance.update(|state, saga| state.on_expired(saga))?;
        if !instance.status().is_terminal() {
            instance.core_mut().make_expired()?;
        }
        self.save(&mut instance, ctx).await?;

        metrics::counter!("saga_expired_total", "saga_type" => S::saga_type()).increment(1);
        Ok(())
    }

    async fn retry_on_conflict<F, Fut>(&self, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_conflict() && retries < self.config.conflict_retries => {
                    retries += 1;
                    tracing::warn!(retries, error = %e, "conflicting saga save, reloading");
                }
                result => return result,
            }
        }
    }

    async fn schedule_expiration(
        &self,
        instance: &SagaInstance<S>,
        ctx: &MessageContext,
    ) -> Result<()> {
        let id = instance.id();
        let mut command = Message::command(
            EXPIRE_COMMAND,
            &ExpirationRequest {
                uuid: id.uuid,
                saga_type: id.saga_type.clone(),
            },
        )?;
        ctx.stamp(&mut command);

        self.scheduler
            .add(ScheduledOperation::new(
                expiration_operation_id(id),
                instance.core().expire_at(),
                command,
            ))
            .await?;
        Ok(())
    }

    async fn flush(&self, instance: &mut SagaInstance<S>, ctx: &MessageContext) -> Result<()> {
        for mut message in instance.core_mut().take_outbox() {
            ctx.stamp(&mut message);
            let topic = if message.is_command() {
                &self.config.command_topic
            } else {
                &self.config.event_topic
            };
            self.publisher.publish(topic, &message).await?;
        }
        Ok(())
    }

    async fn publish_lifecycle(
        &self,
        event: SagaLifecycleEvent,
        ctx: &MessageContext,
    ) -> Result<()> {
        let mut message = event.to_message()?;
        ctx.stamp(&mut message);
        self.publisher
            .publish(&self.config.event_topic, &message)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: Saga> MessageHandler for SagaProvider<S> {
    fn name(&self) -> &str {
        S::saga_type()
    }

    async fn handle(&self, message: &Message, ctx: &MessageContext) -> Result<bool> {
        SagaProvider::handle(self, message, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_operation_id() {
        let uuid = SagaUuid::new();
        let id = SagaId::new(uuid, "Booking");
        assert_eq!(
            expiration_operation_id(&id).as_str(),
            format!("saga-expire:Booking:{uuid}")
        );
    }

    #[test]
    fn test_default_config() {
        let config = SagaConfig::default();
        assert_eq!(config.expiration, chrono::Duration::hours(1));
        assert_eq!(config.command_topic, "saga.commands");
        assert_eq!(config.event_topic, "saga.events");
        assert_eq!(config.conflict_retries, 3);
    }
}
