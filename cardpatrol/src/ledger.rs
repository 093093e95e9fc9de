use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{store::Configurator, Result};

/// Label name to the encoding of the rule suppressing it.
pub type SuppressedLabels = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerDocument {
    #[serde(rename = "suppressedmetrics", default)]
    pub suppressed_metrics: BTreeMap<String, SuppressedLabels>,
}

/// Persisted record of which metric/label pairs are suppressed, and by which
/// rule.
///
/// Nothing is cached: every call reads the document afresh, and every change
/// rewrites it whole.
#[derive(Clone)]
pub struct SuppressionLedger {
    store: Arc<dyn Configurator>,
}

impl SuppressionLedger {
    pub fn new(store: Arc<dyn Configurator>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> String {
        self.store.location()
    }

    pub async fn load(&self) -> Result<LedgerDocument> {
        let data = self.store.read().await?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(LedgerDocument::default());
        }
        Ok(serde_yaml::from_slice(&data)?)
    }

    async fn save(&self, doc: &LedgerDocument) -> Result<()> {
        let data = serde_yaml::to_string(doc)?;
        self.store.write(data.as_bytes()).await
    }

    /// Inserts or overwrites the entry for `(metric, label)`. Returns whether
    /// the document changed; an identical entry is not rewritten.
    pub async fn record(&self, metric: &str, label: &str, encoded: &str) -> Result<bool> {
        let mut doc = self.load().await?;
        let labels = doc.suppressed_metrics.entry(metric.to_string()).or_default();
        if labels.get(label).map(String::as_str) == Some(encoded) {
            return Ok(false);
        }
        labels.insert(label.to_string(), encoded.to_string());
        self.save(&doc).await?;
        tracing::info!(%metric, %label, ledger = %self.location(), "recorded suppression");
        Ok(true)
    }

    /// Removes the entry for `(metric, label)`, and the metric itself once it
    /// has no labels left. Returns whether anything was removed.
    pub async fn forget(&self, metric: &str, label: &str) -> Result<bool> {
        let mut doc = self.load().await?;
        let Some(labels) = doc.suppressed_metrics.get_mut(metric) else {
            return Ok(false);
        };
        if labels.remove(label).is_none() {
            return Ok(false);
        }
        if labels.is_empty() {
            doc.suppressed_metrics.remove(metric);
        }
        self.save(&doc).await?;
        tracing::info!(%metric, %label, ledger = %self.location(), "forgot suppression");
        Ok(true)
    }

    /// Encoding of the rule suppressing `(metric, label)`, if any.
    pub async fn lookup(&self, metric: &str, label: &str) -> Result<Option<String>> {
        let doc = self.load().await?;
        Ok(doc
            .suppressed_metrics
            .get(metric)
            .and_then(|labels| labels.get(label))
            .cloned())
    }

    /// Every suppressed `(metric, label)` pair, ordered by metric then label.
    pub async fn list(&self) -> Result<Vec<(String, String)>> {
        let doc = self.load().await?;
        Ok(doc
            .suppressed_metrics
            .into_iter()
            .flat_map(|(metric, labels)| {
                labels
                    .into_keys()
                    .map(move |label| (metric.clone(), label))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use expect_test::expect;

    fn ledger() -> (SuppressionLedger, MemoryStore) {
        let store = MemoryStore::new("ledger", "");
        (SuppressionLedger::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_record_and_list() {
        let (ledger, store) = ledger();
        assert!(ledger.record("http_requests_total", "request_id", "AAA").await.unwrap());
        assert!(ledger.record("http_requests_total", "session", "BBB").await.unwrap());
        assert!(ledger.record("grpc_calls_total", "peer", "CCC").await.unwrap());
        assert!(!ledger.record("grpc_calls_total", "peer", "CCC").await.unwrap());

        expect![[r#"
            [
                (
                    "grpc_calls_total",
                    "peer",
                ),
                (
                    "http_requests_total",
                    "request_id",
                ),
                (
                    "http_requests_total",
                    "session",
                ),
            ]
        "#]]
        .assert_debug_eq(&ledger.list().await.unwrap());

        expect![[r#"
            suppressedmetrics:
              grpc_calls_total:
                peer: CCC
              http_requests_total:
                request_id: AAA
                session: BBB
        "#]]
        .assert_eq(&String::from_utf8(store.contents()).unwrap());
    }

    #[tokio::test]
    async fn test_record_overwrites() {
        let (ledger, _) = ledger();
        ledger.record("up", "instance", "old").await.unwrap();
        assert!(ledger.record("up", "instance", "new").await.unwrap());
        assert_eq!(ledger.lookup("up", "instance").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_forget_drops_empty_metric() {
        let (ledger, _) = ledger();
        ledger.record("m", "a", "1").await.unwrap();
        ledger.record("m", "b", "2").await.unwrap();

        assert!(ledger.forget("m", "a").await.unwrap());
        assert_eq!(ledger.list().await.unwrap(), vec![("m".to_string(), "b".to_string())]);

        assert!(ledger.forget("m", "b").await.unwrap());
        assert!(ledger.list().await.unwrap().is_empty());
        assert!(!ledger.load().await.unwrap().suppressed_metrics.contains_key("m"));

        assert!(!ledger.forget("m", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_rereads_backing_store() {
        let (ledger, store) = ledger();
        ledger.record("m", "a", "1").await.unwrap();
        store
            .write(b"suppressedmetrics:\n  other:\n    label: X\n")
            .await
            .unwrap();
        assert_eq!(
            ledger.list().await.unwrap(),
            vec![("other".to_string(), "label".to_string())]
        );
    }
}
