use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub store_path: String,
    pub stats_rate_limit: u64,
    pub flush_interval_secs: u64,
    pub flush_timeout_secs: u64,
    pub simulated_latency_ms: u64,
    pub click_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".into(),
            server_port: 8080,
            store_path: "store.json".into(),
            stats_rate_limit: 100,
            flush_interval_secs: 5,
            flush_timeout_secs: 3,
            simulated_latency_ms: 50,
            click_rate: 0.5,
        }
    }
}

// 未设置或无法解析时使用默认值
fn var_or<T: FromStr>(key: &'static str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {}={:?}, falling back to default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let defaults = Config::default();
        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or(defaults.server_host),
            server_port: var_or("SERVER_PORT", defaults.server_port),
            store_path: env::var("STORE_PATH").unwrap_or(defaults.store_path),
            stats_rate_limit: var_or("STATS_RATE_LIMIT", defaults.stats_rate_limit),
            flush_interval_secs: var_or("FLUSH_INTERVAL", defaults.flush_interval_secs),
            flush_timeout_secs: var_or("FLUSH_TIMEOUT", defaults.flush_timeout_secs),
            simulated_latency_ms: var_or("SIMULATED_LATENCY_MS", defaults.simulated_latency_ms),
            click_rate: var_or("CLICK_RATE", defaults.click_rate),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stats_rate_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "STATS_RATE_LIMIT",
                value: self.stats_rate_limit.to_string(),
            });
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "FLUSH_INTERVAL",
                value: self.flush_interval_secs.to_string(),
            });
        }
        if self.flush_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "FLUSH_TIMEOUT",
                value: self.flush_timeout_secs.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.click_rate) {
            return Err(ConfigError::Invalid {
                key: "CLICK_RATE",
                value: self.click_rate.to_string(),
            });
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}
