//! Self-observability: how many distinct values each suppressed label had.

use async_trait::async_trait;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use reqwest::{Client, Url};

use crate::{Error, Result};

const NAMESPACE: &str = "cardpatrol";

/// Where the patrol reports the distinct-value count of a label it acted on.
#[async_trait]
pub trait GaugeSink: Send + Sync {
    async fn set(&self, metric: &str, label: &str, value: f64);
}

/// The process-wide registry served on `/metrics`.
#[derive(Clone)]
pub struct PatrolMetrics {
    registry: Registry,
    exploding_label: GaugeVec,
}

impl PatrolMetrics {
    pub fn new(version: &str) -> Result<Self> {
        let registry = Registry::new();
        let exploding_label = GaugeVec::new(
            Opts::new(
                "exploding_label_distinct_values",
                "Distinct values of labels identified as exploding",
            )
            .namespace(NAMESPACE),
            &["metric_name", "label_name"],
        )
        .map_err(metrics_error)?;
        let details = Gauge::with_opts(
            Opts::new("details", "Static series carrying the running version")
                .namespace(NAMESPACE)
                .const_label("version", version),
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(exploding_label.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(details.clone()))
            .map_err(metrics_error)?;
        details.set(1.0);

        Ok(Self {
            registry,
            exploding_label,
        })
    }

    pub fn value(&self, metric: &str, label: &str) -> f64 {
        self.exploding_label
            .with_label_values(&[metric, label])
            .get()
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(metrics_error)?;
        String::from_utf8(buf).map_err(metrics_error)
    }
}

#[async_trait]
impl GaugeSink for PatrolMetrics {
    async fn set(&self, metric: &str, label: &str, value: f64) {
        self.exploding_label
            .with_label_values(&[metric, label])
            .set(value);
    }
}

fn metrics_error(err: impl ToString) -> Error {
    Error::Metrics(err.to_string())
}

/// Resets the gauge held by a running patrol through its `/metrics/reset`
/// endpoint. Used by one-shot commands, which have no registry of their own.
#[derive(Debug, Clone)]
pub struct RemoteGaugeReset {
    client: Client,
    endpoint: Url,
}

impl RemoteGaugeReset {
    pub fn new(client: Client, base: &Url) -> Result<Self> {
        let endpoint = base
            .join("/metrics/reset")
            .map_err(|err| Error::InvalidInput(format!("{base}: {err}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl GaugeSink for RemoteGaugeReset {
    async fn set(&self, metric: &str, label: &str, value: f64) {
        if value != 0.0 {
            tracing::debug!(%metric, %label, value, "remote gauge only supports reset");
            return;
        }
        let result = self
            .client
            .get(self.endpoint.clone())
            .query(&[("metric", metric), ("label", label)])
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        if let Err(err) = result {
            tracing::warn!(%metric, %label, error = %err, "failed to reset gauge, continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_render() {
        let metrics = PatrolMetrics::new("0.1.0").unwrap();
        metrics.set("http_requests_total", "request_id", 1000.0).await;
        assert_eq!(metrics.value("http_requests_total", "request_id"), 1000.0);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"cardpatrol_details{version="0.1.0"} 1"#), "{text}");
        assert!(
            text.contains(
                r#"cardpatrol_exploding_label_distinct_values{label_name="request_id",metric_name="http_requests_total"} 1000"#
            ),
            "{text}"
        );

        metrics.set("http_requests_total", "request_id", 0.0).await;
        assert_eq!(metrics.value("http_requests_total", "request_id"), 0.0);
    }
}
