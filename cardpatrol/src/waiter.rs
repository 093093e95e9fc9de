use std::{sync::Arc, time::Duration};

use crate::{config::PromConfig, prom::PromClient, store::Configurator, Error, Result};

/// Holds back reloads until a written configuration is visible where the
/// backend reads it from.
///
/// The rendered copy (a mounted file, typically) lags the written one by
/// however long the orchestrator takes to propagate it; reloading before it
/// catches up would reload the old configuration.
#[derive(Clone)]
pub struct PropagationWaiter {
    rendered: Arc<dyn Configurator>,
    client: PromClient,
}

impl PropagationWaiter {
    pub fn new(rendered: Arc<dyn Configurator>, client: PromClient) -> Self {
        Self { rendered, client }
    }

    async fn rendered_config(&self) -> Option<PromConfig> {
        let data = match self.rendered.read().await {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!(error = %err, "rendered configuration unreadable");
                return None;
            }
        };
        match PromConfig::from_yaml(&data) {
            Ok(config) => Some(config),
            Err(err) => {
                tracing::debug!(error = %err, "rendered configuration unparseable");
                None
            }
        }
    }

    /// Polls the rendered configuration until `ready` holds for it, at most
    /// `max_attempts` times, then triggers a reload. Gives up with
    /// [`Error::PropagationTimeout`] without reloading.
    pub async fn wait_until_and_reload<F>(
        &self,
        mut ready: F,
        max_attempts: usize,
        poll_interval: Duration,
    ) -> Result<()>
    where
        F: FnMut(&PromConfig) -> Result<bool>,
    {
        for attempt in 1..=max_attempts {
            if let Some(config) = self.rendered_config().await {
                if ready(&config)? {
                    tracing::info!(
                        attempt,
                        rendered = %self.rendered.location(),
                        "change propagated"
                    );
                    return self.client.reload().await;
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(poll_interval).await;
            }
        }
        tracing::warn!(
            attempts = max_attempts,
            rendered = %self.rendered.location(),
            "change not propagated yet, deferring reload"
        );
        Err(Error::PropagationTimeout {
            attempts: max_attempts,
        })
    }

    /// Waits until every rule in `expected` is present in the rendered
    /// configuration, then reloads.
    pub async fn wait_and_reload(
        &self,
        expected: &[String],
        max_attempts: usize,
        poll_interval: Duration,
    ) -> Result<()> {
        self.wait_until_and_reload(
            |config| {
                for encoded in expected {
                    if !config.contains_rule(encoded)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            },
            max_attempts,
            poll_interval,
        )
        .await
    }
}
