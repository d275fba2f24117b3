//! The saga state machine.
//!
//! User code implements [`Saga`] and owns only its business fields. Status,
//! timestamps and the outbound buffer live in [`SagaCore`], which the
//! runtime hands to every callback as a `&mut dyn SagaActions`.

use chrono::{DateTime, Utc};
use common::{SagaId, Version};
use serde::{Serialize, de::DeserializeOwned};
use transport::Message;

use crate::error::{Result, SagaError};
use crate::events::SagaLifecycleEvent;
use crate::record::SagaRecord;
use crate::status::SagaStatus;

/// Operations available to saga logic.
///
/// Messages are only buffered here. The provider publishes them after the
/// saga state has been persisted.
pub trait SagaActions: Send {
    fn id(&self) -> &SagaId;

    fn status(&self) -> SagaStatus;

    /// Buffers a command.
    fn fire(&mut self, command: Message) -> Result<()>;

    /// Buffers an event.
    fn raise(&mut self, event: Message) -> Result<()>;

    /// Closes the saga as completed and buffers `SagaClosed`.
    fn make_completed(&mut self) -> Result<()>;

    /// Closes the saga as failed and buffers `SagaClosed`.
    fn make_failed(&mut self) -> Result<()>;
}

/// Extension trait providing typed helpers over [`SagaActions`].
pub trait SagaActionsExt: SagaActions {
    /// Serializes `payload` into a command named `name` and buffers it.
    fn fire_command<T: Serialize>(&mut self, name: &str, payload: &T) -> Result<()> {
        self.fire(Message::command(name, payload)?)
    }

    /// Serializes `payload` into an event named `name` and buffers it.
    fn raise_event<T: Serialize>(&mut self, name: &str, payload: &T) -> Result<()> {
        self.raise(Message::event(name, payload)?)
    }
}

impl<A: SagaActions + ?Sized> SagaActionsExt for A {}

/// User-authored saga logic.
///
/// The implementing type holds the saga's business fields and is persisted
/// as the opaque payload of the saga row.
pub trait Saga: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The command that starts the saga.
    type Start: Send;

    /// Type name used as the second half of the saga id.
    fn saga_type() -> &'static str;

    /// Called exactly once, when the saga is created.
    fn start(&mut self, command: Self::Start, saga: &mut dyn SagaActions) -> Result<()>;

    /// Called when the saga's expiration fires while it is still in progress,
    /// right before it moves to `Expired`. Commands buffered here are
    /// published with the transition.
    fn on_expired(&mut self, _saga: &mut dyn SagaActions) -> Result<()> {
        Ok(())
    }
}

/// Status, timestamps and outbound buffer of one saga instance.
#[derive(Debug, Clone)]
pub struct SagaCore {
    id: SagaId,
    status: SagaStatus,
    created_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    version: Version,
    outbox: Vec<Message>,
}

impl SagaCore {
    pub(crate) fn new(id: SagaId, created_at: DateTime<Utc>, expire_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: SagaStatus::InProgress,
            created_at,
            expire_at,
            closed_at: None,
            version: Version::initial(),
            outbox: Vec::new(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expire_at(&self) -> DateTime<Utc> {
        self.expire_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Messages buffered since the last flush, in call order.
    pub fn pending_messages(&self) -> &[Message] {
        &self.outbox
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    /// Moves the saga to `Expired`. Reserved for the expiration path.
    pub(crate) fn make_expired(&mut self) -> Result<()> {
        self.close(SagaStatus::Expired)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(SagaError::InvalidSagaStatus {
                id: self.id.clone(),
                status: self.status,
            });
        }
        Ok(())
    }

    fn close(&mut self, status: SagaStatus) -> Result<()> {
        self.ensure_active()?;

        let closed_at = Utc::now();
        let closed = SagaLifecycleEvent::closed(self.id.clone(), status, closed_at).to_message()?;

        self.status = status;
        self.closed_at = Some(closed_at);
        self.outbox.push(closed);
        Ok(())
    }
}

impl SagaActions for SagaCore {
    fn id(&self) -> &SagaId {
        &self.id
    }

    fn status(&self) -> SagaStatus {
        self.status
    }

    fn fire(&mut self, command: Message) -> Result<()> {
        self.ensure_active()?;
        self.outbox.push(command);
        Ok(())
    }

    fn raise(&mut self, event: Message) -> Result<()> {
        self.ensure_active()?;
        self.outbox.push(event);
        Ok(())
    }

    fn make_completed(&mut self) -> Result<()> {
        self.close(SagaStatus::Completed)
    }

    fn make_failed(&mut self) -> Result<()> {
        self.close(SagaStatus::Failed)
    }
}

/// A loaded or newly created saga: user state plus its core.
#[derive(Debug, Clone)]
pub struct SagaInstance<S> {
    core: SagaCore,
    state: S,
    loaded_status: SagaStatus,
}

impl<S: Saga> SagaInstance<S> {
    pub(crate) fn new(id: SagaId, created_at: DateTime<Utc>, expire_at: DateTime<Utc>) -> Self {
        Self {
            core: SagaCore::new(id, created_at, expire_at),
            state: S::default(),
            loaded_status: SagaStatus::InProgress,
        }
    }

    /// Runs saga logic against the state and the core.
    pub fn update<R>(
        &mut self,
        f: impl FnOnce(&mut S, &mut dyn SagaActions) -> Result<R>,
    ) -> Result<R> {
        f(&mut self.state, &mut self.core)
    }

    pub fn id(&self) -> &SagaId {
        &self.core.id
    }

    pub fn status(&self) -> SagaStatus {
        self.core.status
    }

    pub fn version(&self) -> Version {
        self.core.version
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn core(&self) -> &SagaCore {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut SagaCore {
        &mut self.core
    }

    /// Status as of the last load or save.
    pub(crate) fn loaded_status(&self) -> SagaStatus {
        self.loaded_status
    }

    pub(crate) fn mark_persisted(&mut self, version: Version) {
        self.core.version = version;
        self.loaded_status = self.core.status;
    }

    /// Converts the instance into its persisted shape.
    pub fn to_record(&self) -> Result<SagaRecord> {
        Ok(SagaRecord {
            id: self.core.id.clone(),
            payload: serde_json::to_vec(&self.state)?,
            status: self.core.status,
            created_at: self.core.created_at,
            expire_at: self.core.expire_at,
            closed_at: self.core.closed_at,
            version: self.core.version,
        })
    }

    /// Restores an instance from its persisted shape with an empty buffer.
    pub fn from_record(record: SagaRecord) -> Result<Self> {
        if record.id.saga_type != S::saga_type() {
            return Err(SagaError::InvalidRecord {
                reason: format!("expected saga type {}", S::saga_type()),
                id: record.id,
            });
        }
        let state = serde_json::from_slice(&record.payload)?;

        Ok(Self {
            core: SagaCore {
                id: record.id,
                status: record.status,
                created_at: record.created_at,
                expire_at: record.expire_at,
                closed_at: record.closed_at,
                version: record.version,
                outbox: Vec::new(),
            },
            state,
            loaded_status: record.status,
        })
    }
}
