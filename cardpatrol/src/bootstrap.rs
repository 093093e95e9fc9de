//! Installs the `card_count` recording rule the probe relies on.

use std::{sync::Arc, time::Duration};

use promql_parser::parser;
use serde::Serialize;

use crate::{
    config::PromConfig,
    probe::{CARD_COUNT_LABEL, CARD_COUNT_METRIC},
    store::Configurator,
    waiter::PropagationWaiter,
    Error, Result,
};

#[derive(Debug, Serialize)]
struct RuleFile {
    groups: Vec<RuleGroup>,
}

#[derive(Debug, Serialize)]
struct RuleGroup {
    name: String,
    rules: Vec<RecordingRule>,
}

#[derive(Debug, Serialize)]
struct RecordingRule {
    record: String,
    expr: String,
}

/// Series count per metric name, with the name copied into `metric_name` so
/// it survives `delta()`.
fn card_count_expr() -> String {
    format!(
        r#"label_replace(count by (__name__) ({{__name__=~".+"}}), "{CARD_COUNT_LABEL}", "$1", "__name__", "(.+)")"#
    )
}

/// The rule file document defining [`CARD_COUNT_METRIC`].
pub fn recording_rules() -> Result<String> {
    let expr = card_count_expr();
    parser::parse(&expr).map_err(|err| Error::InvalidInput(format!("{expr}: {err}")))?;
    let doc = RuleFile {
        groups: vec![RuleGroup {
            name: "cardpatrol".to_string(),
            rules: vec![RecordingRule {
                record: CARD_COUNT_METRIC.to_string(),
                expr,
            }],
        }],
    };
    Ok(serde_yaml::to_string(&doc)?)
}

pub struct Bootstrap {
    pub prom_config: Arc<dyn Configurator>,
    pub rules: Arc<dyn Configurator>,
    /// Path of the rule file as the backend sees it.
    pub rule_file_path: String,
    pub waiter: PropagationWaiter,
    pub max_attempts: usize,
    pub poll_interval: Duration,
}

impl Bootstrap {
    /// Writes the rule file, references it from the configuration and reloads
    /// once the reference is visible.
    pub async fn run(&self) -> Result<()> {
        let rules = recording_rules()?;
        if self.rules.read().await? != rules.as_bytes() {
            self.rules.write(rules.as_bytes()).await?;
            tracing::info!(location = %self.rules.location(), "wrote recording rules");
        }

        let mut config = PromConfig::from_yaml(&self.prom_config.read().await?)?;
        if config.ensure_rule_file(&self.rule_file_path) {
            self.prom_config.write(&config.to_yaml()?).await?;
            tracing::info!(rule_file = %self.rule_file_path, "referenced rule file from configuration");
        }

        let path = self.rule_file_path.as_str();
        self.waiter
            .wait_until_and_reload(
                |rendered| Ok(rendered.rule_files.iter().any(|f| f == path)),
                self.max_attempts,
                self.poll_interval,
            )
            .await?;
        tracing::info!("bootstrapped");
        Ok(())
    }
}
