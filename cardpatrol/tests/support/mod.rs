//! Fixtures shared by the integration tests: a mock backend and in-memory
//! documents.

use std::{sync::Arc, time::Duration};

use cardpatrol::{
    gauge::PatrolMetrics,
    ledger::SuppressionLedger,
    probe::SeriesCardinalityProbe,
    prom::{self, PromClient},
    store::{Configurator, MemoryStore},
    waiter::PropagationWaiter,
    Patrol, PatrolSettings,
};
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

pub const PROM_CONFIG: &str = r#"global:
  scrape_interval: 15s
scrape_configs:
- job_name: prometheus
  static_configs:
  - targets:
    - localhost:9090
- job_name: api
  kubernetes_sd_configs:
  - role: pod
"#;

pub const TOP_QUERY: &str = "topk(5,delta(card_count[1m]))";

pub fn client(server: &MockServer) -> PromClient {
    PromClient::new(prom::http_client().unwrap(), server.uri().parse().unwrap())
}

pub fn vector(results: &[(&str, &str)]) -> Value {
    let result = results
        .iter()
        .map(|(metric, value)| {
            json!({ "metric": { "metric_name": metric }, "value": [1681711100.0, value] })
        })
        .collect::<Vec<_>>();
    json!({ "status": "success", "data": { "resultType": "vector", "result": result } })
}

pub fn series(data: Vec<Value>) -> Value {
    json!({ "status": "success", "data": data })
}

/// `http_requests_total` with 1000 request ids spread over 4 methods.
pub fn http_requests_series() -> Value {
    let methods = ["GET", "POST", "PUT", "DELETE"];
    series(
        (0..1000)
            .map(|i| {
                json!({
                    "__name__": "http_requests_total",
                    "job": "api",
                    "method": methods[i % 4],
                    "request_id": format!("req-{i:04}"),
                })
            })
            .collect(),
    )
}

pub async fn mount_query(server: &MockServer, body: Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/query"))
        .and(query_param("query", TOP_QUERY))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_series(server: &MockServer, metric: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/series"))
        .and(query_param("match[]", metric))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn expect_reloads(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/-/reload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(times)
        .mount(server)
        .await;
}

pub fn settings() -> PatrolSettings {
    PatrolSettings {
        interval: Duration::from_millis(20),
        top_n: 5,
        threshold: 100.0,
        propagation_attempts: 3,
        poll_interval: Duration::from_millis(10),
    }
}

pub struct Harness {
    pub patrol: Patrol,
    pub prom_config: MemoryStore,
    pub rendered: MemoryStore,
    pub ledger: MemoryStore,
    pub metrics: PatrolMetrics,
}

/// A patrol against `server` over the given documents.
pub fn patrol(
    server: &MockServer,
    prom_config: &MemoryStore,
    rendered: &MemoryStore,
    ledger: &MemoryStore,
    metrics: &PatrolMetrics,
) -> Patrol {
    Patrol::new(
        SeriesCardinalityProbe::new(client(server)),
        Arc::new(prom_config.clone()),
        SuppressionLedger::new(Arc::new(ledger.clone())),
        PropagationWaiter::new(Arc::new(rendered.clone()), client(server)),
        Arc::new(metrics.clone()),
        settings(),
    )
}

/// A patrol against `server`. With `propagates` the rendered configuration is
/// the written one; otherwise it only changes when the test changes it.
pub fn harness(server: &MockServer, propagates: bool) -> Harness {
    let prom_config = MemoryStore::new("prometheus.yml", PROM_CONFIG);
    let rendered = if propagates {
        prom_config.clone()
    } else {
        MemoryStore::new("rendered/prometheus.yml", PROM_CONFIG)
    };
    let ledger = MemoryStore::new("cardpatrol.yaml", "");
    let metrics = PatrolMetrics::new("test").unwrap();

    Harness {
        patrol: patrol(server, &prom_config, &rendered, &ledger, &metrics),
        prom_config,
        rendered,
        ledger,
        metrics,
    }
}

/// Keeps copying `from` into `to` until the returned task is aborted, like
/// an orchestrator syncing a mounted file.
pub fn mirror(from: &MemoryStore, to: &MemoryStore) -> tokio::task::JoinHandle<()> {
    let (from, to) = (from.clone(), to.clone());
    tokio::spawn(async move {
        loop {
            to.write(&from.contents()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}

/// `grpc_calls_total` with 300 peers.
pub fn grpc_calls_series() -> Value {
    series(
        (0..300)
            .map(|i| {
                json!({
                    "__name__": "grpc_calls_total",
                    "job": "api",
                    "peer": format!("10.0.{}.{}", i / 256, i % 256),
                })
            })
            .collect(),
    )
}
