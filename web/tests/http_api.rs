//! HTTP contract tests, driven through `axum-test` against in-memory backends.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use actionstream_core::{CounterStore, EventId};
use actionstream_runtime::{
    DependencyCheck, HealthCheck, IngressConfig, IngressGateway, ProcessingWorker, QueryConfig,
    QueryService, WorkerCheck, WorkerConfig, WorkerSinks,
};
use actionstream_testing::{
    InMemoryCounterStore, InMemoryDeadLetterSink, InMemoryHistoryStore, InMemoryStreamLog,
};
use actionstream_web::router::{analytics_router, health_router, ingest_router, with_common_layers};
use actionstream_web::{AnalyticsState, CORRELATION_ID_HEADER, HealthState, IngestState};
use axum::Router;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

struct Backends {
    log: InMemoryStreamLog,
    history: InMemoryHistoryStore,
    counter: InMemoryCounterStore,
}

impl Backends {
    fn new() -> Self {
        Self {
            log: InMemoryStreamLog::new(3),
            history: InMemoryHistoryStore::new(),
            counter: InMemoryCounterStore::new(),
        }
    }

    fn app(&self, health: HealthState) -> Router {
        let gateway = IngressGateway::new(
            Arc::new(self.log.clone()),
            IngressConfig {
                append_timeout: Duration::from_millis(200),
                ..IngressConfig::default()
            },
        );
        let queries = QueryService::new(
            Arc::new(self.counter.clone()),
            Arc::new(self.history.clone()),
            QueryConfig {
                realtime_timeout: Duration::from_millis(100),
                history_timeout: Duration::from_millis(100),
            },
        );

        let router = ingest_router(IngestState { gateway })
            .merge(analytics_router(AnalyticsState { queries }))
            .merge(health_router(health));
        with_common_layers(router, &["*".to_string()])
    }

    fn server(&self) -> TestServer {
        TestServer::new(self.app(HealthState::new("test"))).expect("test server")
    }

    fn sinks(&self) -> WorkerSinks {
        WorkerSinks {
            history: Arc::new(self.history.clone()),
            counter: Arc::new(self.counter.clone()),
            dead_letters: Arc::new(InMemoryDeadLetterSink::new()),
        }
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "timed out waiting for {what}");
}

#[tokio::test]
async fn ingest_returns_created_with_event_id() {
    let backends = Backends::new();
    let server = backends.server();

    let response = server
        .post("/ingest")
        .json(&json!({"userId": 1, "action": "click", "timestamp": "2024-01-01T00:00:00Z"}))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");
    assert!(!body["eventId"].as_str().unwrap().is_empty());
    assert_eq!(backends.log.len(), 1);
}

#[tokio::test]
async fn caller_event_id_is_echoed() {
    let backends = Backends::new();
    let response = backends
        .server()
        .post("/ingest")
        .json(&json!({
            "userId": 1,
            "action": "click",
            "timestamp": "2024-01-01T00:00:00Z",
            "eventId": "retry-safe-1"
        }))
        .await;

    response.assert_status(StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["eventId"], "retry-safe-1");
}

#[tokio::test]
async fn invalid_fields_are_400_validation_errors() {
    let backends = Backends::new();
    let server = backends.server();

    for (body, field) in [
        (json!({"userId": 0, "action": "click", "timestamp": "2024-01-01T00:00:00Z"}), "userId"),
        (json!({"userId": 1, "action": "  ", "timestamp": "2024-01-01T00:00:00Z"}), "action"),
        (json!({"userId": 1, "action": "click", "timestamp": "yesterday"}), "timestamp"),
    ] {
        let response = server.post("/ingest").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let error: Value = response.json();
        assert_eq!(error["code"], "VALIDATION_ERROR");
        assert_eq!(error["field"], field);
    }
    assert!(backends.log.is_empty());
}

#[tokio::test]
async fn malformed_body_is_400_bad_request() {
    let backends = Backends::new();
    let response = backends
        .server()
        .post("/ingest")
        .json(&json!({"userId": "one", "action": "click"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "BAD_REQUEST");
    assert!(backends.log.is_empty());
}

#[tokio::test]
async fn stream_outage_is_503() {
    let backends = Backends::new();
    backends.log.set_down(true);

    let response = backends
        .server()
        .post("/ingest")
        .json(&json!({"userId": 1, "action": "click", "timestamp": "2024-01-01T00:00:00Z"}))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn unknown_user_stats_are_zero() {
    let server = Backends::new().server();

    let realtime = server.get("/stats/realtime").add_query_param("userId", 77).await;
    realtime.assert_status_ok();
    assert_eq!(realtime.json::<Value>(), json!({"userId": 77, "actions": 0}));

    let history = server.get("/stats/history").add_query_param("userId", 77).await;
    history.assert_status_ok();
    assert_eq!(history.json::<Value>(), json!({"userId": 77, "total_actions": 0}));
}

#[tokio::test]
async fn bad_user_query_is_400() {
    let server = Backends::new().server();

    server.get("/stats/realtime").await.assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/stats/history")
        .add_query_param("userId", "abc")
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let response = server.get("/stats/realtime").add_query_param("userId", -4).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["field"], "userId");
}

#[tokio::test]
async fn counter_outage_only_affects_realtime() {
    let backends = Backends::new();
    backends.counter.faults().set_down(true);
    let server = backends.server();

    server
        .get("/stats/realtime")
        .add_query_param("userId", 1)
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server
        .get("/stats/history")
        .add_query_param("userId", 1)
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn ingested_event_is_counted_once_end_to_end() {
    let backends = Backends::new();
    let server = backends.server();
    let (worker, handle) = ProcessingWorker::new(
        Arc::new(backends.log.clone()),
        backends.sinks(),
        WorkerConfig::default(),
    );
    let task = tokio::spawn(worker.run());

    let body = json!({
        "userId": 1,
        "action": "click",
        "timestamp": "2024-01-01T00:00:00Z",
        "eventId": "e2e-1"
    });
    server.post("/ingest").json(&body).await.assert_status(StatusCode::CREATED);
    server.post("/ingest").json(&body).await.assert_status(StatusCode::CREATED);

    eventually("both copies to be consumed", || backends.log.fully_committed()).await;

    let realtime = server.get("/stats/realtime").add_query_param("userId", 1).await;
    assert_eq!(realtime.json::<Value>(), json!({"userId": 1, "actions": 1}));
    let history = server.get("/stats/history").add_query_param("userId", 1).await;
    assert_eq!(history.json::<Value>(), json!({"userId": 1, "total_actions": 1}));

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn responses_carry_correlation_id() {
    let server = Backends::new().server();

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-correlation-id"),
            HeaderValue::from_static("trace-me"),
        )
        .await;

    response.assert_status_ok();
    assert_eq!(response.header(CORRELATION_ID_HEADER), "trace-me");
    assert_eq!(response.json::<Value>(), json!({"status": "ok", "service": "test"}));
}

struct CounterPing(InMemoryCounterStore);

impl DependencyCheck for CounterPing {
    fn component(&self) -> String {
        "counter".to_string()
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
        Box::pin(async move {
            match self.0.get(actionstream_testing::fixtures::user(1)).await {
                Ok(_) => HealthCheck::healthy("counter"),
                Err(e) => HealthCheck::unhealthy("counter", e.to_string()),
            }
        })
    }
}

#[tokio::test]
async fn readiness_reflects_dependencies() {
    let backends = Backends::new();
    let (_worker, handle) = ProcessingWorker::new(
        Arc::new(backends.log.clone()),
        backends.sinks(),
        WorkerConfig::default(),
    );
    let checks: Vec<Arc<dyn DependencyCheck>> = vec![
        Arc::new(CounterPing(backends.counter.clone())),
        Arc::new(WorkerCheck::new("worker-0", handle)),
    ];
    let server = TestServer::new(backends.app(HealthState::new("test").with_checks(checks)))
        .expect("test server");

    let ready = server.get("/ready").await;
    ready.assert_status_ok();
    let report: Value = ready.json();
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["checks"][1]["metadata"]["state"], "idle");

    backends.counter.faults().set_down(true);
    let not_ready = server.get("/ready").await;
    not_ready.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(not_ready.json::<Value>()["checks"][0]["status"], "unhealthy");
}

#[tokio::test]
async fn duplicate_event_id_keeps_single_history_row() {
    let backends = Backends::new();
    let server = backends.server();
    let (worker, handle) = ProcessingWorker::new(
        Arc::new(backends.log.clone()),
        backends.sinks(),
        WorkerConfig::default(),
    );
    let task = tokio::spawn(worker.run());

    for _ in 0..3 {
        server
            .post("/ingest")
            .json(&json!({"userId": 9, "action": "view", "timestamp": "2024-01-01T00:00:00Z", "eventId": "same"}))
            .await
            .assert_status(StatusCode::CREATED);
    }
    eventually("all copies to be consumed", || backends.log.fully_committed()).await;

    assert_eq!(backends.history.len(), 1);
    assert_eq!(
        backends.counter.get(actionstream_testing::fixtures::user(9)).await.unwrap(),
        1
    );
    assert!(backends.history.get(&EventId::parse("same").unwrap()).is_some());

    handle.shutdown();
    task.await.unwrap();
}
