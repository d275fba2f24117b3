use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use transport::{Message, Publisher};

use crate::{
    NextScheduledOperation, Result, ScheduledOperation, ScheduledOperationId,
    store::SchedulerStore,
};

/// Configuration for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Topic due commands are published to.
    pub command_topic: String,

    /// How often the loop asks the store for operations nobody claimed yet.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command_topic: "saga.commands".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
enum Signal {
    Claimed(NextScheduledOperation),
    Cancelled(ScheduledOperationId),
}

/// Store front used by everything that schedules or cancels operations.
///
/// Each call forwards the claim returned by the store to the scheduler loop,
/// so the loop learns about new due operations without polling.
#[derive(Clone)]
pub struct SchedulerHandle {
    store: Arc<dyn SchedulerStore>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl SchedulerHandle {
    /// Schedules an operation.
    #[tracing::instrument(skip(self, operation), fields(id = %operation.id, date = %operation.date))]
    pub async fn add(&self, operation: ScheduledOperation) -> Result<()> {
        let next = self.store.add(operation).await?;
        self.forward(next);
        Ok(())
    }

    /// Cancels an operation. Unknown ids are ignored.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, id: &ScheduledOperationId) -> Result<()> {
        let next = self.store.remove(id).await?;
        self.send(Signal::Cancelled(id.clone()));
        self.forward(next);
        Ok(())
    }

    /// Cancels an operation and returns it.
    #[tracing::instrument(skip(self))]
    pub async fn extract(&self, id: &ScheduledOperationId) -> Result<ScheduledOperation> {
        let (operation, next) = self.store.extract(id).await?;
        self.send(Signal::Cancelled(id.clone()));
        self.forward(next);
        Ok(operation)
    }

    /// Reads an operation without changing it.
    pub async fn get(&self, id: &ScheduledOperationId) -> Result<Option<ScheduledOperation>> {
        self.store.get(id).await
    }

    fn forward(&self, next: Option<NextScheduledOperation>) {
        if let Some(next) = next {
            self.send(Signal::Claimed(next));
        }
    }

    fn send(&self, signal: Signal) {
        if let Err(mpsc::error::SendError(signal)) = self.signals.send(signal) {
            tracing::warn!(?signal, "scheduler loop is not running, signal dropped");
        }
    }
}

/// Claimed operations waiting for their date, earliest first.
#[derive(Debug, Default)]
struct ArmedOperations {
    queue: BTreeMap<(DateTime<Utc>, ScheduledOperationId), Message>,
    dates: HashMap<ScheduledOperationId, DateTime<Utc>>,
    /// Fired operations still in the store. Only their removal is retried.
    unremoved: HashSet<ScheduledOperationId>,
}

impl ArmedOperations {
    fn arm(&mut self, next: NextScheduledOperation) {
        if let Some(previous) = self.dates.insert(next.id.clone(), next.date) {
            self.queue.remove(&(previous, next.id.clone()));
        }
        self.queue.insert((next.date, next.id), next.command);
    }

    fn disarm(&mut self, id: &ScheduledOperationId) -> bool {
        self.unremoved.remove(id);
        match self.dates.remove(id) {
            Some(date) => self.queue.remove(&(date, id.clone())).is_some(),
            None => false,
        }
    }

    fn settle(&mut self, fired: Fired) {
        match fired {
            Fired::Done(Some(next)) => self.arm(next),
            Fired::Done(None) => {}
            Fired::Unremoved(id) => {
                self.unremoved.insert(id);
            }
        }
    }

    fn take_unremoved(&mut self) -> HashSet<ScheduledOperationId> {
        std::mem::take(&mut self.unremoved)
    }

    /// Time left until the head is due. `None` when nothing is armed.
    fn time_to_head(&self, now: DateTime<Utc>) -> Option<Duration> {
        let ((date, _), _) = self.queue.first_key_value()?;
        Some((*date - now).to_std().unwrap_or(Duration::ZERO))
    }

    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<NextScheduledOperation> {
        let ((date, _), _) = self.queue.first_key_value()?;
        if *date > now {
            return None;
        }
        let ((date, id), command) = self.queue.pop_first()?;
        self.dates.remove(&id);
        Some(NextScheduledOperation { id, date, command })
    }
}

/// What firing left for the loop to do.
#[derive(Debug)]
enum Fired {
    /// Nothing left of the operation in the store. Carries the claim handed
    /// out by the removal, if any.
    Done(Option<NextScheduledOperation>),
    /// Published, but the removal failed.
    Unremoved(ScheduledOperationId),
}

/// Publishes due operations and removes them from the store.
struct Firing {
    store: Arc<dyn SchedulerStore>,
    publisher: Arc<dyn Publisher>,
    command_topic: String,
}

impl Firing {
    #[tracing::instrument(skip(self, due), fields(id = %due.id))]
    async fn fire(&self, due: NextScheduledOperation) -> Fired {
        // A claim can reach the loop after the cancellation of the same operation.
        match self.store.get(&due.id).await {
            Ok(Some(stored)) if stored.date == due.date => {}
            Ok(_) => {
                tracing::debug!("scheduled operation cancelled before firing");
                return Fired::Done(None);
            }
            Err(e) => tracing::warn!(error = %e, "could not check scheduled operation, firing anyway"),
        }

        let delay = (Utc::now() - due.date).to_std().unwrap_or(Duration::ZERO);
        metrics::histogram!("scheduler_fire_delay_seconds").record(delay.as_secs_f64());

        match self.publisher.publish(&self.command_topic, &due.command).await {
            Ok(()) => {
                metrics::counter!("scheduler_operations_fired_total").increment(1);
                tracing::info!(command = %due.command.name, "scheduled operation fired");
            }
            Err(e) => {
                metrics::counter!("scheduler_publish_failures_total").increment(1);
                tracing::error!(error = %e, "failed to publish scheduled command");
            }
        }

        self.remove_fired(due.id).await
    }

    async fn remove_fired(&self, id: ScheduledOperationId) -> Fired {
        match self.store.remove(&id).await {
            Ok(next) => Fired::Done(next),
            Err(e) => {
                metrics::counter!("scheduler_remove_failures_total").increment(1);
                tracing::error!(%id, error = %e, "failed to remove fired operation, retrying on next poll");
                Fired::Unremoved(id)
            }
        }
    }

    async fn claim_unclaimed(&self) -> Option<NextScheduledOperation> {
        match self.store.claim_next().await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(error = %e, "claim poll failed");
                None
            }
        }
    }
}

/// Timer loop delivering scheduled commands close to their date.
///
/// Keeps every operation this process has claimed in date order and one
/// timer armed for the earliest of them. Claims arrive through the
/// [`SchedulerHandle`], from the operation the loop removes after firing,
/// and from a periodic poll for operations nobody has claimed. A fired
/// operation whose removal failed is not published again; the poll retries
/// the removal.
pub struct Scheduler {
    firing: Firing,
    poll_interval: Duration,
    signals: mpsc::UnboundedReceiver<Signal>,
    armed: ArmedOperations,
}

impl Scheduler {
    /// Creates a scheduler loop and the handle feeding it.
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            firing: Firing {
                store: Arc::clone(&store),
                publisher,
                command_topic: config.command_topic,
            },
            poll_interval: config.poll_interval,
            signals: rx,
            armed: ArmedOperations::default(),
        };
        let handle = SchedulerHandle { store, signals: tx };
        (scheduler, handle)
    }

    /// Runs until `shutdown` resolves.
    ///
    /// Claimed operations still waiting at shutdown stay marked as sent in
    /// the store.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let Scheduler {
            firing,
            poll_interval,
            mut signals,
            mut armed,
        } = self;

        tokio::pin!(shutdown);
        let mut poll = tokio::time::interval(poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(topic = %firing.command_topic, "scheduler started");

        loop {
            let timer = armed.time_to_head(Utc::now());

            tokio::select! {
                _ = &mut shutdown => break,

                Some(signal) = signals.recv() => match signal {
                    Signal::Claimed(next) => armed.arm(next),
                    Signal::Cancelled(id) => {
                        if armed.disarm(&id) {
                            tracing::debug!(%id, "scheduled operation disarmed");
                        }
                    }
                },

                _ = poll.tick() => {
                    for id in armed.take_unremoved() {
                        let fired = firing.remove_fired(id).await;
                        armed.settle(fired);
                    }
                    if let Some(next) = firing.claim_unclaimed().await {
                        armed.arm(next);
                    }
                }

                _ = sleep_for(timer) => {
                    while let Some(due) = armed.pop_due(Utc::now()) {
                        let fired = firing.fire(due).await;
                        armed.settle(fired);
                    }
                }
            }
        }

        tracing::info!(
            pending = armed.dates.len(),
            unremoved = armed.unremoved.len(),
            "scheduler stopped"
        );
    }
}

async fn sleep_for(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
