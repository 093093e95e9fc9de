use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use reqwest::{Certificate, Client, StatusCode, Url};
use serde_json::{Map, Value};

use super::{Configurator, WRITE_ATTEMPTS};
use crate::{Error, Result};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Connection details for talking to the API server from inside a pod.
#[derive(Debug, Clone)]
pub struct InClusterConfig {
    pub api_server: Url,
    pub namespace: String,
    pub token: String,
    ca_pem: Vec<u8>,
}

impl InClusterConfig {
    /// Reads the service account mounted into the pod.
    pub async fn discover() -> Result<Self> {
        let location = "in-cluster service account";
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| Error::store(location, "KUBERNETES_SERVICE_HOST is not set"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let api_server = Url::parse(&format!("https://{host}:{port}"))
            .map_err(|err| Error::store(location, err))?;

        let read = |name: &'static str| async move {
            tokio::fs::read(format!("{SERVICE_ACCOUNT_DIR}/{name}"))
                .await
                .map_err(|err| Error::store(location, format!("{name}: {err}")))
        };
        let token = String::from_utf8_lossy(&read("token").await?).trim().to_owned();
        let namespace = String::from_utf8_lossy(&read("namespace").await?)
            .trim()
            .to_owned();
        let ca_pem = read("ca.crt").await?;

        Ok(Self {
            api_server,
            namespace,
            token,
            ca_pem,
        })
    }

    /// HTTP client trusting the cluster CA.
    pub fn http_client(&self) -> Result<Client> {
        let location = self.api_server.to_string();
        let ca = Certificate::from_pem(&self.ca_pem).map_err(|err| Error::store(&location, err))?;
        Client::builder()
            .add_root_certificate(ca)
            .timeout(crate::prom::REQUEST_TIMEOUT)
            .connect_timeout(crate::prom::REQUEST_TIMEOUT)
            .build()
            .map_err(|err| Error::store(location, err))
    }
}

/// One key inside a ConfigMap.
///
/// Writes are compare-and-set on the `resourceVersion` observed by the last
/// read. A conflicting write is retried against the latest object with only
/// this store's key replaced. The retry puts the caller's document back as
/// is: a concurrent change to the same key made since the caller's read is
/// overwritten, not merged. Other keys of the ConfigMap keep their latest
/// values.
#[derive(Debug)]
pub struct ConfigMapStore {
    client: Client,
    api_server: Url,
    namespace: String,
    name: String,
    key: String,
    token: Option<String>,
    backoff: Duration,
    resource_version: Mutex<Option<String>>,
}

impl ConfigMapStore {
    pub fn new(
        client: Client,
        api_server: Url,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_server,
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
            token: None,
            backoff: Duration::from_millis(200),
            resource_version: Mutex::new(None),
        }
    }

    pub fn in_cluster(
        cluster: &InClusterConfig,
        client: Client,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::new(
            client,
            cluster.api_server.clone(),
            cluster.namespace.clone(),
            name,
            key,
        )
        .with_token(cluster.token.clone())
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Base delay between conflicting writes; doubles on each retry.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self) -> Result<Url> {
        self.api_server
            .join(&format!(
                "/api/v1/namespaces/{}/configmaps/{}",
                self.namespace, self.name
            ))
            .map_err(|err| Error::store(self.location(), err))
    }

    fn remember_version(&self, object: &Value) {
        let version = object["metadata"]["resourceVersion"]
            .as_str()
            .map(str::to_owned);
        *self
            .resource_version
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = version;
    }

    fn remembered_version(&self) -> Option<String> {
        self.resource_version
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn fetch(&self) -> Result<Value> {
        let mut req = self.client.get(self.url()?);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|err| Error::store(self.location(), err))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::store(self.location(), format!("GET returned {status}")));
        }
        resp.json()
            .await
            .map_err(|err| Error::store(self.location(), err))
    }

    async fn put(&self, object: &Value) -> Result<(StatusCode, Option<Value>)> {
        let mut req = self.client.put(self.url()?).json(object);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|err| Error::store(self.location(), err))?;
        let status = resp.status();
        let body = if status.is_success() {
            resp.json().await.ok()
        } else {
            None
        };
        Ok((status, body))
    }

    fn set_key(&self, object: &mut Value, data: &[u8]) {
        let text = String::from_utf8_lossy(data).into_owned();
        match object.get_mut("data").and_then(Value::as_object_mut) {
            Some(map) => {
                map.insert(self.key.clone(), Value::String(text));
            }
            None => {
                let mut map = Map::new();
                map.insert(self.key.clone(), Value::String(text));
                object["data"] = Value::Object(map);
            }
        }
    }
}

#[async_trait]
impl Configurator for ConfigMapStore {
    async fn read(&self) -> Result<Vec<u8>> {
        let object = self.fetch().await?;
        self.remember_version(&object);
        Ok(object["data"][self.key.as_str()]
            .as_str()
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default())
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut object = self.fetch().await?;
        // First attempt carries the version our caller read, so a change made
        // in between is detected instead of silently overwritten.
        if let Some(version) = self.remembered_version() {
            object["metadata"]["resourceVersion"] = Value::String(version);
        }

        for attempt in 1..=WRITE_ATTEMPTS {
            self.set_key(&mut object, data);
            let (status, body) = self.put(&object).await?;
            if status.is_success() {
                if let Some(body) = body {
                    self.remember_version(&body);
                }
                tracing::debug!(location = %self.location(), attempt, "updated configmap");
                return Ok(());
            }
            if status != StatusCode::CONFLICT {
                return Err(Error::store(self.location(), format!("PUT returned {status}")));
            }

            tracing::warn!(location = %self.location(), attempt, "configmap modified concurrently, retrying");
            if attempt < WRITE_ATTEMPTS {
                let shift = (attempt - 1).min(8) as u32;
                tokio::time::sleep(self.backoff.saturating_mul(1 << shift)).await;
                object = self.fetch().await?;
            }
        }

        Err(Error::WriteConflictExhausted {
            location: self.location(),
            attempts: WRITE_ATTEMPTS,
        })
    }

    fn location(&self) -> String {
        format!("configmap://{}/{}#{}", self.namespace, self.name, self.key)
    }
}
