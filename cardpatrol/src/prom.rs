//! Thin client for the parts of the Prometheus HTTP API the patrol uses.
//!
//! See https://prometheus.io/docs/prometheus/latest/querying/api/

use std::{collections::HashMap, time::Duration};

use reqwest::{Client, Url};
use serde::Deserialize;

use crate::{Error, Result};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// One series as returned by the series endpoint: label name to value.
pub type SeriesSample = HashMap<String, String>;

/// Builds the HTTP client shared by everything talking to the backend.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(0)
        .build()
        .map_err(Error::from)
}

#[derive(Debug, Deserialize)]
struct Response<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> Response<T> {
    fn into_data(self) -> Result<T> {
        if self.status != "success" {
            return Err(Error::Query(format!(
                "backend answered {:?}: {}",
                self.status,
                self.error.unwrap_or_default()
            )));
        }
        self.data
            .ok_or_else(|| Error::Query("response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstantVector {
    pub result_type: String,
    pub result: Vec<InstantResult>,
}

#[derive(Debug, Deserialize)]
pub struct InstantResult {
    pub metric: HashMap<String, String>,
    /// `[unix_timestamp, "value"]`
    pub value: (f64, String),
}

impl InstantResult {
    pub fn sample_value(&self) -> Result<f64> {
        self.value
            .1
            .parse()
            .map_err(|_| Error::Query(format!("sample value {:?} is not a number", self.value.1)))
    }
}

#[derive(Debug, Clone)]
pub struct PromClient {
    http: Client,
    base: Url,
}

impl PromClient {
    pub fn new(http: Client, base: Url) -> Self {
        Self { http, base }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| Error::InvalidInput(format!("{}{path}: {err}", self.base)))
    }

    /// Evaluates `expr` as an instant query.
    pub async fn query(&self, expr: &str) -> Result<InstantVector> {
        let url = self.endpoint("/api/v1/query")?;
        tracing::debug!(%expr, "instant query");
        let resp: Response<InstantVector> = self
            .http
            .get(url)
            .query(&[("query", expr)])
            .send()
            .await?
            .json()
            .await?;
        resp.into_data()
    }

    /// Lists every currently known series matching `selector`.
    pub async fn series(&self, selector: &str) -> Result<Vec<SeriesSample>> {
        let url = self.endpoint("/api/v1/series")?;
        tracing::debug!(%selector, "series listing");
        let resp: Response<Vec<SeriesSample>> = self
            .http
            .get(url)
            .query(&[("match[]", selector)])
            .send()
            .await?
            .json()
            .await?;
        resp.into_data()
    }

    /// Asks the backend to reload its configuration.
    pub async fn reload(&self) -> Result<()> {
        let url = self.endpoint("/-/reload")?;
        let resp = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|err| Error::Reload(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Reload(format!("reload endpoint returned {status}")));
        }
        tracing::info!(backend = %self.base, "triggered configuration reload");
        Ok(())
    }
}
