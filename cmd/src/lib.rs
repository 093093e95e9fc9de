use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use cardpatrol::{
    bootstrap::Bootstrap,
    gauge::{GaugeSink, PatrolMetrics, RemoteGaugeReset},
    ledger::SuppressionLedger,
    probe::SeriesCardinalityProbe,
    prom::{self, PromClient},
    store::{ConfigMapStore, Configurator, FileStore, InClusterConfig},
    waiter::PropagationWaiter,
    Patrol, PatrolSettings, Suppression,
};
use clap::{Args, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};
use reqwest::Url;

pub mod api;
pub mod http;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// Plain files on a local or mounted filesystem
    File,
    /// Keys of a Kubernetes ConfigMap, edited through the API server
    Configmap,
}

/// Where the backend lives and where the documents the patrol edits are kept.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Prometheus base URL, queried and reloaded
    #[arg(long, env = "CARDPATROL_PROM_URL", default_value = "http://localhost:9090")]
    pub prom_url: Url,

    #[arg(long, env = "CARDPATROL_STORE", value_enum, default_value_t = StoreBackend::File)]
    pub store: StoreBackend,

    /// Prometheus configuration edited by the patrol (file store)
    #[arg(long, env = "CARDPATROL_PROM_CONFIG", default_value = "/etc/config/prometheus.yml")]
    pub prom_config: PathBuf,

    /// Suppression ledger (file store)
    #[arg(long, env = "CARDPATROL_LEDGER", default_value = "/etc/config/cardpatrol.yaml")]
    pub ledger: PathBuf,

    /// Recording rules written at startup (file store)
    #[arg(
        long,
        env = "CARDPATROL_RULES",
        default_value = "/etc/config/cardpatrol/rules.yaml"
    )]
    pub rules: PathBuf,

    #[arg(long, env = "CARDPATROL_CONFIGMAP_NAME", default_value = "prometheus")]
    pub configmap_name: String,

    /// Defaults to the namespace of the pod's service account
    #[arg(long, env = "CARDPATROL_CONFIGMAP_NAMESPACE")]
    pub configmap_namespace: Option<String>,

    #[arg(
        long,
        env = "CARDPATROL_CONFIGMAP_PROMETHEUS_KEY",
        default_value = "prometheus.yml"
    )]
    pub configmap_prometheus_key: String,

    #[arg(
        long,
        env = "CARDPATROL_CONFIGMAP_LEDGER_KEY",
        default_value = "cardpatrol.yaml"
    )]
    pub configmap_ledger_key: String,

    #[arg(
        long,
        env = "CARDPATROL_CONFIGMAP_RULES_KEY",
        default_value = "cardpatrol-rules.yaml"
    )]
    pub configmap_rules_key: String,

    /// The configuration as the running backend sees it
    #[arg(
        long,
        env = "CARDPATROL_RENDERED_CONFIG",
        default_value = "/etc/config/prometheus.yml"
    )]
    pub rendered_config: PathBuf,

    /// Path of the recording rules file as the backend sees it
    #[arg(
        long,
        env = "CARDPATROL_RULE_FILE_PATH",
        default_value = "/etc/config/cardpatrol/rules.yaml"
    )]
    pub rule_file_path: String,
}

/// Knobs of the patrol loop and its metrics endpoint.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Seconds between ticks
    #[arg(long, env = "CARDPATROL_INTERVAL", default_value_t = 5)]
    pub interval: u64,

    /// Fastest growing metrics examined per tick
    #[arg(long, env = "CARDPATROL_TOP_N", default_value_t = 5)]
    pub top_n: usize,

    /// Series growth per minute at which a metric counts as exploding
    #[arg(long, env = "CARDPATROL_THRESHOLD", default_value_t = 100.0)]
    pub threshold: f64,

    /// Polls of the rendered configuration before a reload is deferred
    #[arg(long, env = "CARDPATROL_PROPAGATION_ATTEMPTS", default_value_t = 12)]
    pub propagation_attempts: usize,

    /// Milliseconds between polls of the rendered configuration
    #[arg(long, env = "CARDPATROL_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "CARDPATROL_METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}

impl RunArgs {
    pub fn patrol_settings(&self) -> PatrolSettings {
        PatrolSettings {
            interval: Duration::from_secs(self.interval),
            top_n: self.top_n,
            threshold: self.threshold,
            propagation_attempts: self.propagation_attempts,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// The documents the patrol reads and writes.
pub struct Stores {
    pub prom_config: Arc<dyn Configurator>,
    pub ledger: Arc<dyn Configurator>,
    pub rules: Arc<dyn Configurator>,
    /// Always a file: what the backend has actually loaded.
    pub rendered: Arc<dyn Configurator>,
}

impl Settings {
    pub async fn stores(&self) -> Result<Stores> {
        let rendered: Arc<dyn Configurator> = Arc::new(FileStore::new(&self.rendered_config));
        let stores = match self.store {
            StoreBackend::File => Stores {
                prom_config: Arc::new(FileStore::new(&self.prom_config)),
                ledger: Arc::new(FileStore::new(&self.ledger)),
                rules: Arc::new(FileStore::new(&self.rules)),
                rendered,
            },
            StoreBackend::Configmap => {
                let mut cluster = InClusterConfig::discover()
                    .await
                    .wrap_err("failed to discover in-cluster service account")?;
                if let Some(namespace) = &self.configmap_namespace {
                    cluster.namespace = namespace.clone();
                }
                let client = cluster.http_client()?;
                let key = |key: &str| -> Arc<dyn Configurator> {
                    Arc::new(ConfigMapStore::in_cluster(
                        &cluster,
                        client.clone(),
                        &self.configmap_name,
                        key,
                    ))
                };
                Stores {
                    prom_config: key(&self.configmap_prometheus_key),
                    ledger: key(&self.configmap_ledger_key),
                    rules: key(&self.configmap_rules_key),
                    rendered,
                }
            }
        };
        tracing::debug!(
            prom_config = %stores.prom_config.location(),
            ledger = %stores.ledger.location(),
            rendered = %stores.rendered.location(),
            "opened stores"
        );
        Ok(stores)
    }

    pub fn prom_client(&self) -> Result<PromClient> {
        Ok(PromClient::new(prom::http_client()?, self.prom_url.clone()))
    }

    fn patrol(
        &self,
        stores: &Stores,
        gauges: Arc<dyn GaugeSink>,
        settings: PatrolSettings,
    ) -> Result<Patrol> {
        let client = self.prom_client()?;
        Ok(Patrol::new(
            SeriesCardinalityProbe::new(client.clone()),
            stores.prom_config.clone(),
            SuppressionLedger::new(stores.ledger.clone()),
            PropagationWaiter::new(stores.rendered.clone(), client),
            gauges,
            settings,
        ))
    }
}

/// Installs the recording rule, then patrols and serves `/metrics` until
/// interrupted.
pub async fn run(settings: &Settings, args: &RunArgs) -> Result<()> {
    let stores = settings.stores().await?;
    let metrics = Arc::new(PatrolMetrics::new(VERSION)?);
    let patrol_settings = args.patrol_settings();

    tracing::info!(version = VERSION, prom_url = %settings.prom_url, "starting cardpatrol");
    Bootstrap {
        prom_config: stores.prom_config.clone(),
        rules: stores.rules.clone(),
        rule_file_path: settings.rule_file_path.clone(),
        waiter: PropagationWaiter::new(stores.rendered.clone(), settings.prom_client()?),
        max_attempts: patrol_settings.propagation_attempts,
        poll_interval: patrol_settings.poll_interval,
    }
    .run()
    .await
    .wrap_err("failed to bootstrap")?;

    let patrol = settings.patrol(&stores, metrics.clone(), patrol_settings)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.metrics_port));
    tokio::select! {
        served = http::server(addr, metrics) => served.wrap_err("metrics server stopped"),
        () = patrol.run(shutdown_signal()) => Ok(()),
    }
}

pub async fn list(settings: &Settings) -> Result<Vec<Suppression>> {
    let stores = settings.stores().await?;
    // Listing never touches a gauge; a private registry keeps it local.
    let gauges = Arc::new(PatrolMetrics::new(VERSION)?);
    let patrol = settings.patrol(&stores, gauges, PatrolSettings::default())?;
    patrol
        .list()
        .await
        .wrap_err_with(|| format!("failed to read ledger {}", stores.ledger.location()))
}

/// Reverses one suppression. The gauge lives in the running instance, so it
/// is reset through `reset_url`.
pub async fn unsilence(settings: &Settings, identifier: &str, reset_url: &Url) -> Result<Suppression> {
    let stores = settings.stores().await?;
    let gauges = Arc::new(RemoteGaugeReset::new(prom::http_client()?, reset_url)?);
    let patrol = settings.patrol(&stores, gauges, PatrolSettings::default())?;
    patrol
        .unsilence(identifier)
        .await
        .wrap_err_with(|| format!("failed to unsilence {identifier}"))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received interrupt, shutting down"),
        Err(error) => {
            tracing::error!(?error, "failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    }
}
