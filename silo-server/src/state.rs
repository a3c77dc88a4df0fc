//! Application state shared across handlers.

use std::sync::Arc;

use silo_jobs::{IdempotencyLedger, JobRegistry};
use silo_store::Store;

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: Arc<JobRegistry>,
    pub ledger: Arc<IdempotencyLedger>,
    pub metrics: AppMetrics,
    pub http: reqwest::Client,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        Self {
            store,
            registry: Arc::new(JobRegistry::new()),
            ledger: Arc::new(IdempotencyLedger::new()),
            metrics: AppMetrics::new(),
            http: reqwest::Client::new(),
            config,
        }
    }
}
