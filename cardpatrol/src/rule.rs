use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::{
    cardinality::{HighCardSeries, METRIC_NAME_LABEL},
    Error, Result,
};

/// Value every suppressed label is rewritten to.
pub const SILENCE_SENTINEL: &str = "cardpatrol_silenced";

static METRIC_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));

/// Relabel actions understood by Prometheus.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RelabelAction {
    #[default]
    Replace,
    Keep,
    Drop,
    KeepEqual,
    DropEqual,
    HashMod,
    LabelMap,
    LabelDrop,
    LabelKeep,
    Lowercase,
    Uppercase,
}

/// One `metric_relabel_configs` entry.
///
/// Field order is the serialization order, which makes
/// [`RelabelRule::encode`] canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelabelRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    source_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modulus: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replacement: Option<String>,
    #[serde(default)]
    action: RelabelAction,
}

impl RelabelRule {
    pub fn source_labels(&self) -> &[String] {
        &self.source_labels
    }

    pub fn regex(&self) -> Option<&str> {
        self.regex.as_deref()
    }

    pub fn target_label(&self) -> Option<&str> {
        self.target_label.as_deref()
    }

    pub fn replacement(&self) -> Option<&str> {
        self.replacement.as_deref()
    }

    pub fn action(&self) -> RelabelAction {
        self.action
    }

    /// Single printable token identifying the rule. Rules are the same rule
    /// exactly when their encodings are equal.
    pub fn encode(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self)?;
        Ok(STANDARD.encode(yaml))
    }
}

/// Builds the rule that collapses every value of the exploding label of
/// `series.metric_name` into [`SILENCE_SENTINEL`].
pub fn generate(series: &HighCardSeries) -> Result<RelabelRule> {
    let metric = series.metric_name.as_str();
    if metric.is_empty() {
        return Err(Error::InvalidInput("metric name is empty".to_string()));
    }
    if !METRIC_NAME_RE.is_match(metric) {
        return Err(Error::InvalidInput(format!(
            "{metric:?} is not a valid metric name"
        )));
    }
    if !series.is_actionable() {
        return Err(Error::InvalidInput(format!(
            "no label to suppress on {metric}"
        )));
    }

    // Source labels are joined with ";" before matching, so the name comes
    // first and the label's value follows it.
    let pattern = format!("^{};.*$", regex::escape(metric));
    Regex::new(&pattern).map_err(|err| Error::InvalidInput(format!("{pattern}: {err}")))?;

    Ok(RelabelRule {
        source_labels: vec![METRIC_NAME_LABEL.to_string(), series.label_name.clone()],
        separator: None,
        regex: Some(pattern),
        modulus: None,
        target_label: Some(series.label_name.clone()),
        replacement: Some(SILENCE_SENTINEL.to_string()),
        action: RelabelAction::Replace,
    })
}
