//! Integration tests for the admin API and the runtime it hosts.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::{Config, Runtime};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::SagaUuid;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{MessageHandler, Result, Saga, SagaActions, SagaActionsExt};
use scheduler::ScheduledOperation;
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use transport::{InMemoryTransport, Message};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Booking {
    seats: u32,
}

impl Saga for Booking {
    type Start = u32;

    fn saga_type() -> &'static str {
        "Booking"
    }

    fn start(&mut self, seats: u32, saga: &mut dyn SagaActions) -> Result<()> {
        self.seats = seats;
        saga.fire_command("ReserveSeats", &serde_json::json!({ "seats": seats }))
    }
}

async fn setup() -> (axum::Router, Runtime) {
    let runtime = Runtime::build(Config::default()).await.unwrap();
    let app = api::create_app(runtime.state(), get_metrics_handle());
    (app, runtime)
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn future_operation(id: &str) -> ScheduledOperation {
    let command = Message::command("ReleaseSeats", &serde_json::json!({ "seats": 1 })).unwrap();
    ScheduledOperation::new(id, chrono::Utc::now() + chrono::Duration::hours(1), command)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _runtime) = setup().await;

    let (status, json) = send(&app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _runtime) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_get_scheduled_operation() {
    let (app, runtime) = setup().await;
    runtime
        .scheduler_handle()
        .add(future_operation("op-1"))
        .await
        .unwrap();

    let (status, json) = send(&app, "GET", "/scheduler/operations/op-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "op-1");
    assert_eq!(json["is_sent"], true);
    assert_eq!(json["command"]["name"], "ReleaseSeats");
    assert_eq!(json["command"]["payload"]["seats"], 1);
}

#[tokio::test]
async fn test_get_missing_operation_returns_404() {
    let (app, _runtime) = setup().await;

    let (status, json) = send(&app, "GET", "/scheduler/operations/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_cancel_scheduled_operation() {
    let (app, runtime) = setup().await;
    let handle = runtime.scheduler_handle();
    handle.add(future_operation("op-1")).await.unwrap();
    handle.add(future_operation("op-2")).await.unwrap();

    let (status, json) = send(&app, "DELETE", "/scheduler/operations/op-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "op-1");

    let (status, _) = send(&app, "GET", "/scheduler/operations/op-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The remaining operation is claimed by the extraction.
    let (status, json) = send(&app, "GET", "/scheduler/operations/op-2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_sent"], true);
}

#[tokio::test]
async fn test_cancel_missing_operation_returns_404() {
    let (app, _runtime) = setup().await;

    let (status, _) = send(&app, "DELETE", "/scheduler/operations/op-1").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_saga() {
    let (app, runtime) = setup().await;
    let provider = runtime.provider::<Booking>();
    let uuid = SagaUuid::new();
    provider
        .start(uuid, 3, &saga::MessageContext::new())
        .await
        .unwrap();

    let (status, json) = send(&app, "GET", &format!("/sagas/Booking/{uuid}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], format!("Booking:{uuid}"));
    assert_eq!(json["saga_type"], "Booking");
    assert_eq!(json["status"], "IN_PROGRESS");
    assert_eq!(json["version"], 1);
    assert_eq!(json["state"]["seats"], 3);
    assert!(json["closed_at"].is_null());
}

#[tokio::test]
async fn test_saga_lookup_is_scoped_by_type() {
    let (app, runtime) = setup().await;
    let uuid = SagaUuid::new();
    runtime
        .provider::<Booking>()
        .start(uuid, 1, &saga::MessageContext::new())
        .await
        .unwrap();

    let (status, _) = send(&app, "GET", &format!("/sagas/Audit/{uuid}")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_saga_with_invalid_uuid_returns_400() {
    let (app, _runtime) = setup().await;

    let (status, json) = send(&app, "GET", "/sagas/Booking/not-a-uuid").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid saga uuid"));
}

#[tokio::test]
async fn test_running_runtime_expires_sagas() {
    let config = Config {
        saga_expiration: chrono::Duration::milliseconds(100),
        ..Config::default()
    };
    let runtime = Runtime::build_on(config, InMemoryTransport::recording())
        .await
        .unwrap();
    let provider = Arc::new(runtime.provider::<Booking>());
    let handler: Arc<dyn MessageHandler> = provider.clone();
    let running = runtime.register(handler).start().await.unwrap();
    let app = api::create_app(running.state(), get_metrics_handle());

    let uuid = SagaUuid::new();
    provider
        .start(uuid, 2, &saga::MessageContext::new())
        .await
        .unwrap();

    let uri = format!("/sagas/Booking/{uuid}");
    let mut expired = false;
    for _ in 0..100 {
        let (_, json) = send(&app, "GET", &uri).await;
        if json["status"] == "EXPIRED" {
            expired = true;
            assert_eq!(json["version"], 2);
            assert!(json["closed_at"].is_string());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(expired, "saga was not expired by the scheduler");

    let names: Vec<String> = running
        .transport()
        .published()
        .await
        .into_iter()
        .map(|(_, m)| m.name)
        .collect();
    assert!(names.contains(&"saga.expire".to_string()));
    assert!(names.contains(&"SagaClosed".to_string()));

    running.shutdown().await;
}
