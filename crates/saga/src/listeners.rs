//! Explicit registry of the events a saga type reacts to.

use std::collections::HashMap;
use std::sync::Arc;

use common::SagaUuid;
use serde::de::DeserializeOwned;
use transport::Message;

use crate::error::{Result, SagaError};
use crate::saga::{Saga, SagaActions};

/// An event a saga listens to.
///
/// The event names the saga instance it is addressed to.
pub trait SagaEventListener: DeserializeOwned + Send + Sync + 'static {
    /// Message name the event is published under.
    const NAME: &'static str;

    /// Uuid of the saga the event belongs to.
    fn saga_uuid(&self) -> SagaUuid;
}

type Apply<S> = Box<dyn Fn(&mut S, &mut dyn SagaActions) -> Result<()> + Send + Sync>;
type Route<S> = Box<dyn Fn(&Message) -> Result<Delivery<S>> + Send + Sync>;

/// A decoded event bound to its saga, ready to be applied.
///
/// Can be applied more than once, which lets the caller reload the saga and
/// retry after a conflicting save.
pub struct Delivery<S> {
    uuid: SagaUuid,
    apply: Apply<S>,
}

impl<S> Delivery<S> {
    pub fn saga_uuid(&self) -> SagaUuid {
        self.uuid
    }

    /// Runs the listener against a saga's state.
    pub fn apply(&self, state: &mut S, saga: &mut dyn SagaActions) -> Result<()> {
        (self.apply)(state, saga)
    }
}

/// Maps event names to listeners of one saga type.
///
/// Built by hand at startup:
///
/// ```ignore
/// let listeners = SagaListeners::<Booking>::new()
///     .on::<SeatReserved, _>(Booking::on_seat_reserved)
///     .on::<PaymentDeclined, _>(Booking::on_payment_declined);
/// ```
pub struct SagaListeners<S> {
    routes: HashMap<&'static str, Route<S>>,
}

impl<S> Default for SagaListeners<S> {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }
}

impl<S: Saga> SagaListeners<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of type `E`, replacing any previous one.
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: SagaEventListener,
        F: Fn(&mut S, &E, &mut dyn SagaActions) -> Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let route: Route<S> = Box::new(move |message: &Message| {
            let event: E = message.decode().map_err(|source| SagaError::Decode {
                name: message.name.clone(),
                source,
            })?;
            let handler = Arc::clone(&handler);
            Ok(Delivery {
                uuid: event.saga_uuid(),
                apply: Box::new(move |state: &mut S, saga: &mut dyn SagaActions| {
                    (*handler)(state, &event, saga)
                }),
            })
        });
        self.routes.insert(E::NAME, route);
        self
    }

    /// Returns true if an event with this name has a listener.
    pub fn handles(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Decodes a message for its listener.
    pub fn deliver(&self, message: &Message) -> Result<Delivery<S>> {
        let route = self
            .routes
            .get(message.name.as_str())
            .ok_or_else(|| SagaError::UnknownListener(message.name.clone()))?;
        route(message)
    }

    /// Names of all registered events, sorted.
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.routes.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
