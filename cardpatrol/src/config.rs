//! The slice of the Prometheus configuration the patrol edits, and the merge
//! and removal of suppression rules over it.
//!
//! Everything the patrol does not model is carried through untouched in the
//! `rest` mappings, so a read-modify-write only changes relabel rules and
//! rule files.

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::{rule::RelabelRule, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_files: Vec<String>,
    #[serde(default)]
    pub scrape_configs: Vec<ScrapeConfig>,
    #[serde(flatten)]
    pub rest: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub job_name: String,
    #[serde(default)]
    pub metric_relabel_configs: Vec<RelabelRule>,
    #[serde(flatten)]
    pub rest: Mapping,
}

impl ScrapeConfig {
    /// Position of the rule whose encoding is `encoded`.
    pub fn find_rule(&self, encoded: &str) -> Result<Option<usize>> {
        for (i, rule) in self.metric_relabel_configs.iter().enumerate() {
            if rule.encode()? == encoded {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl PromConfig {
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(data)?)
    }

    pub fn to_yaml(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    /// Whether any job carries the rule encoded as `encoded`.
    pub fn contains_rule(&self, encoded: &str) -> Result<bool> {
        for job in &self.scrape_configs {
            if job.find_rule(encoded)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Appends `rule` to every job that does not already carry it. Returns
    /// whether any job changed; merging the same rule twice changes nothing
    /// the second time.
    pub fn merge(&mut self, rule: &RelabelRule) -> Result<bool> {
        let encoded = rule.encode()?;
        let mut inserted = false;
        for job in &mut self.scrape_configs {
            if job.find_rule(&encoded)?.is_none() {
                tracing::info!(job = %job.job_name, "adding suppression rule to scrape config");
                job.metric_relabel_configs.push(rule.clone());
                inserted = true;
            }
        }
        Ok(inserted)
    }

    /// Deletes every rule encoded as `encoded`, from every job.
    pub fn remove(&mut self, encoded: &str) -> Result<bool> {
        let mut removed = false;
        for job in &mut self.scrape_configs {
            let before = job.metric_relabel_configs.len();
            let mut failure = None;
            job.metric_relabel_configs.retain(|rule| match rule.encode() {
                Ok(e) => e != encoded,
                Err(err) => {
                    failure.get_or_insert(err);
                    true
                }
            });
            if let Some(err) = failure {
                return Err(err);
            }
            if job.metric_relabel_configs.len() != before {
                tracing::info!(job = %job.job_name, "deleted suppression rule from scrape config");
                removed = true;
            }
        }
        Ok(removed)
    }

    /// Adds `path` to `rule_files` unless it is already listed.
    pub fn ensure_rule_file(&mut self, path: &str) -> bool {
        if self.rule_files.iter().any(|f| f == path) {
            return false;
        }
        self.rule_files.push(path.to_string());
        true
    }
}
