//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p scheduler --test postgres_integration -- --test-threads=1
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use scheduler::{
    PostgresSchedulerStore, ScheduledOperation, Scheduler, SchedulerConfig, SchedulerError,
    SchedulerStore,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use transport::{InMemoryTransport, Message, Topic, Transport};

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_scheduled_operations.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn new_pool() -> PgPool {
    let info = get_container_info().await;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(&info.connection_string)
        .await
        .unwrap()
}

/// Get a fresh store with its own pool and a cleared table
async fn get_test_store() -> PostgresSchedulerStore {
    let pool = new_pool().await;
    sqlx::query("TRUNCATE TABLE scheduled_operations")
        .execute(&pool)
        .await
        .unwrap();
    PostgresSchedulerStore::new(pool)
}

// TIMESTAMPTZ keeps microseconds.
fn at(offset_ms: i64) -> DateTime<Utc> {
    (Utc::now() + chrono::Duration::milliseconds(offset_ms)).trunc_subsecs(6)
}

fn operation(id: &str, date: DateTime<Utc>) -> ScheduledOperation {
    let command = Message::command(format!("cmd.{id}"), &serde_json::json!({"op": id})).unwrap();
    ScheduledOperation::new(id, date, command)
}

/// Inserts an unclaimed row directly, as another writer would.
async fn insert_unclaimed(pool: &PgPool, operation: &ScheduledOperation) {
    let row = operation.to_row().unwrap();
    sqlx::query(
        "INSERT INTO scheduled_operations (id, processing_date, command, is_sent) VALUES ($1, $2, $3, 0)",
    )
    .bind(&row.id)
    .bind(row.processing_date)
    .bind(&row.command)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
#[serial]
async fn add_claims_and_persists_the_operation() {
    let store = get_test_store().await;
    let original = operation("op-1", at(0));

    let next = store.add(original.clone()).await.unwrap().unwrap();
    assert_eq!(next.id, original.id);
    assert_eq!(next.date, original.date);
    assert_eq!(next.command, original.command);

    let stored = store.get(&original.id).await.unwrap().unwrap();
    assert!(stored.is_sent);
    assert_eq!(stored.command, original.command);
}

#[tokio::test]
#[serial]
async fn earlier_operation_added_second_is_next() {
    let store = get_test_store().await;
    let t = at(0);

    store.add(operation("op-1", t)).await.unwrap();
    let next = store
        .add(operation("op-2", t - chrono::Duration::seconds(1)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(next.id.as_str(), "op-2");
}

#[tokio::test]
#[serial]
async fn duplicate_operation_is_rejected_and_rolled_back() {
    let store = get_test_store().await;
    store.add(operation("op-1", at(0))).await.unwrap();
    insert_unclaimed(store.pool(), &operation("op-2", at(1_000))).await;

    let result = store.add(operation("op-1", at(0))).await;
    assert!(matches!(result, Err(SchedulerError::DuplicateOperation(_))));

    // The failed call did not claim op-2.
    let op2 = store.get(&"op-2".into()).await.unwrap().unwrap();
    assert!(!op2.is_sent);
}

#[tokio::test]
#[serial]
async fn remove_of_missing_operation_still_claims() {
    let store = get_test_store().await;
    insert_unclaimed(store.pool(), &operation("op-1", at(0))).await;

    let next = store.remove(&"missing".into()).await.unwrap();
    assert_eq!(next.unwrap().id.as_str(), "op-1");
}

#[tokio::test]
#[serial]
async fn extract_of_missing_operation_changes_nothing() {
    let store = get_test_store().await;
    insert_unclaimed(store.pool(), &operation("op-1", at(0))).await;

    let result = store.extract(&"missing".into()).await;
    assert!(matches!(
        result,
        Err(SchedulerError::ScheduledOperationNotFound(_))
    ));

    let op1 = store.get(&"op-1".into()).await.unwrap().unwrap();
    assert!(!op1.is_sent);
}

#[tokio::test]
#[serial]
async fn extract_returns_operation_and_claims_next() {
    let store = get_test_store().await;
    store.add(operation("op-1", at(0))).await.unwrap();
    insert_unclaimed(store.pool(), &operation("op-2", at(5_000))).await;

    let (extracted, next) = store.extract(&"op-1".into()).await.unwrap();
    assert_eq!(extracted.id.as_str(), "op-1");
    assert_eq!(next.unwrap().id.as_str(), "op-2");
    assert!(store.get(&"op-1".into()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn competing_stores_never_claim_the_same_operation() {
    let first = get_test_store().await;
    let second = PostgresSchedulerStore::new(new_pool().await);

    let base = at(0);
    for i in 0..20 {
        insert_unclaimed(
            first.pool(),
            &operation(&format!("op-{i:02}"), base + chrono::Duration::milliseconds(i)),
        )
        .await;
    }

    let stores: Vec<Arc<dyn SchedulerStore>> = vec![Arc::new(first.clone()), Arc::new(second)];
    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let store = Arc::clone(&stores[i % 2]);
            tokio::spawn(async move { store.claim_next().await.unwrap() })
        })
        .collect();

    let mut claimed = HashSet::new();
    for task in tasks {
        if let Some(next) = task.await.unwrap() {
            assert!(claimed.insert(next.id), "operation claimed twice");
        }
    }

    // Lost races return nothing; drain what is left.
    while let Some(next) = first.claim_next().await.unwrap() {
        assert!(claimed.insert(next.id), "operation claimed twice");
    }
    assert_eq!(claimed.len(), 20);
}

#[tokio::test]
#[serial]
async fn scheduler_picks_up_unclaimed_operation_on_poll() {
    let store = get_test_store().await;
    insert_unclaimed(store.pool(), &operation("op-1", at(-10))).await;

    let transport = InMemoryTransport::recording();
    transport.create_topic(&Topic::new("saga.commands")).await.unwrap();
    let (scheduler, _handle) = Scheduler::new(
        Arc::new(store.clone()),
        transport.create_publisher().await.unwrap(),
        SchedulerConfig {
            command_topic: "saga.commands".to_string(),
            poll_interval: Duration::from_millis(50),
        },
    );

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(scheduler.run(async {
        let _ = rx.await;
    }));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.get(&"op-1".into()).await.unwrap().is_some() {
        assert!(tokio::time::Instant::now() < deadline, "operation never fired");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let published = transport.published_to("saga.commands").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].name, "cmd.op-1");

    let _ = tx.send(());
    task.await.unwrap();
}
