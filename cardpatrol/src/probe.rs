use promql_parser::parser;

use crate::{
    cardinality::{self, HighCardSeries},
    prom::PromClient,
    Error, Result,
};

/// Recording rule whose per-metric delta signals an explosion. Its series carry
/// the counted metric's name in `metric_name`.
pub const CARD_COUNT_METRIC: &str = "card_count";
pub const CARD_COUNT_LABEL: &str = "metric_name";

/// Range over which growth is measured.
const GROWTH_WINDOW: &str = "1m";

/// Finds metrics whose cardinality is exploding and the label responsible.
#[derive(Debug, Clone)]
pub struct SeriesCardinalityProbe {
    client: PromClient,
}

impl SeriesCardinalityProbe {
    pub fn new(client: PromClient) -> Self {
        Self { client }
    }

    fn top_growth_query(top_n: usize) -> Result<String> {
        let query = format!("topk({top_n},delta({CARD_COUNT_METRIC}[{GROWTH_WINDOW}]))");
        parser::parse(&query).map_err(|err| Error::InvalidInput(format!("{query}: {err}")))?;
        Ok(query)
    }

    /// Names of at most `top_n` metrics whose cardinality grew by at least
    /// `threshold` over the window, in the backend's ranking order.
    pub async fn find_exploding_metrics(&self, threshold: f64, top_n: usize) -> Result<Vec<String>> {
        if top_n == 0 {
            return Ok(Vec::new());
        }
        let query = Self::top_growth_query(top_n)?;
        let vector = self.client.query(&query).await?;

        let mut out = Vec::new();
        for result in &vector.result {
            let growth = result.sample_value()?;
            if growth.is_nan() || growth < threshold {
                continue;
            }
            let Some(metric) = result.metric.get(CARD_COUNT_LABEL) else {
                return Err(Error::Query(format!(
                    "{CARD_COUNT_METRIC} result without a {CARD_COUNT_LABEL} label"
                )));
            };
            tracing::debug!(%metric, growth, "cardinality above threshold");
            out.push(metric.clone());
        }
        out.truncate(top_n);
        Ok(out)
    }

    /// Lists every series of `metric` and returns its highest-cardinality
    /// label. See [`cardinality::select_high_card_label`].
    pub async fn discover_high_card_label(&self, metric: &str) -> Result<HighCardSeries> {
        let series = self.client.series(metric).await?;
        let hcs = cardinality::select_high_card_label(metric, &series);
        if hcs.is_actionable() {
            tracing::info!(
                %metric,
                label = %hcs.label_name,
                distinct_values = hcs.distinct_values,
                series = series.len(),
                "detected exploding label"
            );
        }
        Ok(hcs)
    }
}
