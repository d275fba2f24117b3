//! Wiring of stores, transport, scheduler loop and dispatcher.

use std::sync::Arc;

use saga::{
    Dispatcher, InMemorySagaStore, MessageHandler, PostgresSagaStore, Saga, SagaProvider,
    SagaStore,
};
use scheduler::{
    InMemorySchedulerStore, PostgresSchedulerStore, Scheduler, SchedulerHandle, SchedulerStore,
};
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use transport::{
    InMemoryTransport, Publisher, Queue, QueueBind, Topic, Topology, Transport, TransportExt,
};

use crate::config::Config;
use crate::error::StartupError;
use crate::routes::{AppState, Storage};

/// Everything the daemon runs, assembled but not yet started.
pub struct Runtime {
    config: Config,
    state: Arc<AppState>,
    transport: InMemoryTransport,
    publisher: Arc<dyn Publisher>,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
}

impl Runtime {
    /// Builds the runtime described by `config`.
    ///
    /// Connects to PostgreSQL and applies migrations when `database_url` is
    /// set, otherwise keeps everything in memory. Declares the command and
    /// event topics and an inbox queue bound to both.
    pub async fn build(config: Config) -> Result<Self, StartupError> {
        Self::build_on(config, InMemoryTransport::new()).await
    }

    /// Like [`Runtime::build`], on a transport supplied by the caller.
    pub async fn build_on(
        config: Config,
        transport: InMemoryTransport,
    ) -> Result<Self, StartupError> {
        let (operations, sagas, storage): (Arc<dyn SchedulerStore>, Arc<dyn SagaStore>, _) =
            match &config.database_url {
                Some(url) => {
                    let pool = PgPoolOptions::new()
                        .max_connections(config.database_max_connections)
                        .connect(url)
                        .await?;
                    let operations = PostgresSchedulerStore::new(pool.clone());
                    operations.run_migrations().await?;
                    tracing::info!("using PostgreSQL stores");
                    (
                        Arc::new(operations),
                        Arc::new(PostgresSagaStore::new(pool)),
                        Storage::Postgres,
                    )
                }
                None => {
                    tracing::info!("DATABASE_URL not set, using in-memory stores");
                    (
                        Arc::new(InMemorySchedulerStore::new()),
                        Arc::new(InMemorySagaStore::new()),
                        Storage::Memory,
                    )
                }
            };

        transport.declare(&topology(&config)).await?;
        let publisher = transport.create_publisher().await?;

        let (scheduler, handle) =
            Scheduler::new(operations, Arc::clone(&publisher), config.scheduler_config());

        let state = Arc::new(AppState {
            scheduler: handle,
            sagas,
            storage,
        });

        Ok(Self {
            config,
            state,
            transport,
            publisher,
            scheduler,
            dispatcher: Dispatcher::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }

    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.state.scheduler.clone()
    }

    /// Creates a provider for saga type `S` sharing this runtime's stores.
    ///
    /// The provider still has to be registered to receive messages.
    pub fn provider<S: Saga>(&self) -> SagaProvider<S> {
        SagaProvider::new(
            Arc::clone(&self.state.sagas),
            Arc::clone(&self.publisher),
            self.state.scheduler.clone(),
            self.config.saga_config(),
        )
    }

    /// Adds a handler for messages arriving on the inbox queue.
    pub fn register(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.dispatcher = self.dispatcher.register(handler);
        self
    }

    /// Spawns the scheduler loop and the dispatcher.
    pub async fn start(self) -> Result<RunningRuntime, StartupError> {
        let consumer = self
            .transport
            .create_consumer(&Queue::new(&self.config.inbox_queue))
            .await?;
        let (stop, stopped) = watch::channel(false);

        let scheduler = self.scheduler;
        let scheduler_stop = stopped.clone();
        let dispatcher = self.dispatcher;
        let dispatcher_stop = stopped;

        tracing::info!(
            handlers = dispatcher.handler_count(),
            inbox = %self.config.inbox_queue,
            "starting saga runtime"
        );

        let tasks = vec![
            tokio::spawn(scheduler.run(wait_for_stop(scheduler_stop))),
            tokio::spawn(async move {
                dispatcher
                    .run(consumer, wait_for_stop(dispatcher_stop))
                    .await;
            }),
        ];

        Ok(RunningRuntime {
            state: self.state,
            transport: self.transport,
            stop,
            tasks,
        })
    }
}

/// A started runtime. Dropping it without [`RunningRuntime::shutdown`] leaves
/// the background tasks running.
pub struct RunningRuntime {
    state: Arc<AppState>,
    transport: InMemoryTransport,
    stop: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRuntime {
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    pub fn transport(&self) -> &InMemoryTransport {
        &self.transport
    }

    /// Stops the scheduler and dispatcher and waits for both.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "runtime task failed");
            }
        }
        if let Err(e) = self.transport.close().await {
            tracing::warn!(error = %e, "closing transport failed");
        }
        tracing::info!("saga runtime stopped");
    }
}

async fn wait_for_stop(mut stopped: watch::Receiver<bool>) {
    // An error means the sender is gone, which also means stop.
    let _ = stopped.wait_for(|stop| *stop).await;
}

fn topology(config: &Config) -> Topology {
    let inbox = Queue::new(&config.inbox_queue);
    Topology::new()
        .topic(Topic::new(&config.command_topic))
        .topic(Topic::new(&config.event_topic))
        .queue(inbox.clone())
        .bind_queue(QueueBind::new(&config.command_topic, &inbox.name, "#"))
        .bind_queue(QueueBind::new(&config.event_topic, &inbox.name, "#"))
}
