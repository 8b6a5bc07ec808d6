use crate::api::{ApiServer, AppState};
use crate::auth::Authenticator;
use crate::collector::TrafficCollector;
use crate::config::MeterConfig;
use crate::error::Result;
use crate::fetcher::HttpTrafficSource;
use crate::quota::QuotaEnforcer;
use crate::store::SqlStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Owns the store and the long-running services built on it.
pub struct MeterServer {
    config: Arc<MeterConfig>,
    store: Arc<SqlStore>,
    quota: QuotaEnforcer,
    collector: Arc<TrafficCollector>,
}

impl MeterServer {
    pub async fn new(config: MeterConfig) -> Result<Self> {
        let config = Arc::new(config);

        let store = Arc::new(SqlStore::open(&config.database_path).await?);
        info!("Opened traffic database at {}", config.database_path);

        let quota = QuotaEnforcer::new(store.clone(), store.clone());
        let source = Arc::new(HttpTrafficSource::new(config.fetch_timeout()));
        let collector = Arc::new(TrafficCollector::new(
            store.clone(),
            store.clone(),
            source,
            quota.clone(),
        ));

        Ok(Self {
            config,
            store,
            quota,
            collector,
        })
    }

    pub fn store(&self) -> Arc<SqlStore> {
        self.store.clone()
    }

    pub fn collector(&self) -> Arc<TrafficCollector> {
        self.collector.clone()
    }

    /// Run the collection loop and the API until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let collector_handle = tokio::spawn(
            self.collector
                .clone()
                .run(self.config.collect_interval(), shutdown.clone()),
        );

        let state = AppState {
            authenticator: Arc::new(Authenticator::new(self.store.clone(), self.quota.clone())),
            quota: self.quota,
            counters: self.store.clone(),
            collector: self.collector,
        };
        let api = ApiServer::new(self.config.api_addr.clone(), state);

        let api_result = api.run(shutdown.clone()).await;
        if let Err(e) = &api_result {
            error!("API server error: {}", e);
            shutdown.cancel();
        }

        if let Err(e) = collector_handle.await {
            error!("Traffic collector task failed: {}", e);
        }

        info!("Meter server stopped");
        api_result
    }
}
