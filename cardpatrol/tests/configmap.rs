use std::time::Duration;

use cardpatrol::{
    store::{ConfigMapStore, Configurator, WRITE_ATTEMPTS},
    Error,
};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const CONFIGMAP_PATH: &str = "/api/v1/namespaces/monitoring/configmaps/prometheus";

fn configmap(version: &str, prometheus_yml: &str) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": "prometheus",
            "namespace": "monitoring",
            "resourceVersion": version,
        },
        "data": {
            "prometheus.yml": prometheus_yml,
            "cardpatrol.yaml": "suppressedmetrics: {}\n",
        }
    })
}

fn store(server: &MockServer, key: &str) -> ConfigMapStore {
    ConfigMapStore::new(
        reqwest::Client::new(),
        server.uri().parse().unwrap(),
        "monitoring",
        "prometheus",
        key,
    )
    .with_token("sa-token")
    .with_backoff(Duration::from_millis(1))
}

async fn mount_get(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(CONFIGMAP_PATH))
        .and(header("authorization", "Bearer sa-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_read_key() {
    let server = MockServer::start().await;
    mount_get(&server, configmap("41", "global: {}\n")).await;

    let prom = store(&server, "prometheus.yml");
    assert_eq!(prom.read().await.unwrap(), b"global: {}\n");
    assert_eq!(
        prom.location(),
        "configmap://monitoring/prometheus#prometheus.yml"
    );

    let missing = store(&server, "absent.yaml");
    assert!(missing.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_write_carries_read_version_and_other_keys() {
    let server = MockServer::start().await;
    mount_get(&server, configmap("41", "global: {}\n")).await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .and(body_partial_json(json!({
            "metadata": { "resourceVersion": "41" },
            "data": {
                "prometheus.yml": "scrape_configs: []\n",
                "cardpatrol.yaml": "suppressedmetrics: {}\n",
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(configmap("42", "scrape_configs: []\n")))
        .expect(1)
        .mount(&server)
        .await;

    let prom = store(&server, "prometheus.yml");
    prom.read().await.unwrap();
    prom.write(b"scrape_configs: []\n").await.unwrap();
}

#[tokio::test]
async fn test_write_retries_conflict() {
    let server = MockServer::start().await;
    mount_get(&server, configmap("43", "global: {}\n")).await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(409))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .and(body_partial_json(json!({
            "metadata": { "resourceVersion": "43" },
            "data": { "prometheus.yml": "scrape_configs: []\n" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(configmap("44", "scrape_configs: []\n")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let prom = store(&server, "prometheus.yml");
    prom.write(b"scrape_configs: []\n").await.unwrap();
}

#[tokio::test]
async fn test_write_conflict_exhausted() {
    let server = MockServer::start().await;
    mount_get(&server, configmap("7", "global: {}\n")).await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(409))
        .expect(WRITE_ATTEMPTS as u64)
        .mount(&server)
        .await;

    let prom = store(&server, "prometheus.yml");
    let err = prom.write(b"scrape_configs: []\n").await.unwrap_err();
    assert!(
        matches!(err, Error::WriteConflictExhausted { attempts, .. } if attempts == WRITE_ATTEMPTS),
        "{err}"
    );
}

#[tokio::test]
async fn test_write_other_failure_is_not_retried() {
    let server = MockServer::start().await;
    mount_get(&server, configmap("7", "global: {}\n")).await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let prom = store(&server, "prometheus.yml");
    let err = prom.write(b"x").await.unwrap_err();
    assert!(matches!(err, Error::Store { .. }), "{err}");
}

#[tokio::test]
async fn test_retry_overwrites_own_key_and_keeps_others() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(configmap("50", "global: {}\n")))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    let mut latest = configmap("51", "scrape_configs: [concurrent]\n");
    latest["data"]["cardpatrol.yaml"] = json!("suppressedmetrics: {up: {job: x}}\n");
    Mock::given(method("GET"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(latest))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .respond_with(ResponseTemplate::new(409))
        .up_to_n_times(1)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(CONFIGMAP_PATH))
        .and(body_partial_json(json!({
            "metadata": { "resourceVersion": "51" },
            "data": {
                "prometheus.yml": "scrape_configs: []\n",
                "cardpatrol.yaml": "suppressedmetrics: {up: {job: x}}\n",
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(configmap("52", "scrape_configs: []\n")))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;

    let prom = store(&server, "prometheus.yml");
    prom.read().await.unwrap();
    prom.write(b"scrape_configs: []\n").await.unwrap();
}
