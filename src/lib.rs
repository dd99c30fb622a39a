use std::sync::Arc;

use config::Config;
use counters::AggregateStore;
use middleware::RateLimiter;
use persistence::JsonFileStore;

pub mod config;
pub mod counters;
pub mod error;
pub mod middleware;
pub mod persistence;
pub mod result;
pub mod router;
pub mod routes;
pub mod scheduler;

/// 进程内共享状态，由请求处理和调度器共同持有
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<AggregateStore>,
    pub limiter: Arc<RateLimiter>,
    pub gateway: Arc<JsonFileStore>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            store: Arc::new(AggregateStore::new()),
            limiter: Arc::new(RateLimiter::new(config.stats_rate_limit)),
            gateway: Arc::new(JsonFileStore::new(&config.store_path)),
            config,
        }
    }
}
