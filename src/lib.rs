pub mod chat;
pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod prompts;
pub mod resilience;
pub mod rollout;
pub mod scan;

use std::sync::Arc;

use crate::clients::LlmClient;
use crate::config::Config;
use crate::resilience::{BreakerConfig, CallRunner, CircuitBreaker};
use crate::scan::{CachedScanStore, InMemoryScanStore, ScanStore};

/// Scan store for a single-node deployment: the optional seed file behind an LRU cache.
pub fn build_scan_store(config: &Config) -> error::Result<Arc<dyn ScanStore>> {
    let inner = match &config.chat.scan_seed_path {
        Some(path) => InMemoryScanStore::from_json_file(path)?,
        None => InMemoryScanStore::new(),
    };
    Ok(Arc::new(CachedScanStore::new(
        inner,
        config.chat.scan_cache_capacity,
    )))
}

/// Wire the process-wide breaker and worker pool into an orchestrator.
pub fn build_orchestrator(
    config: &Config,
    llm: Arc<dyn LlmClient>,
    scans: Arc<dyn ScanStore>,
) -> chat::ChatOrchestrator {
    let breaker = Arc::new(CircuitBreaker::with_system_clock(BreakerConfig::from(
        &config.breaker,
    )));
    let runner = CallRunner::new(config.chat.worker_pool_size);
    chat::ChatOrchestrator::new(llm, scans, breaker, runner, config)
}
