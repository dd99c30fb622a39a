//! 两个互相独立的后台定时任务：
//!
//! - flush：固定周期把当前窗口的快照合并进持久化文件，不影响内存中的计数；
//! - window：对齐到每分钟整点，清空聚合窗口和统计接口的限流计数。
//!
//! 两个任务只通过 `AggregateStore` / `RateLimiter` 自身的同步机制交互。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeZone, Timelike};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::{
    AppState,
    counters::AggregateStore,
    error::PersistError,
    middleware::RateLimiter,
    persistence::{FlushReport, JsonFileStore},
};

/// 聚合窗口长度，固定为一分钟
pub const WINDOW_PERIOD: Duration = Duration::from_secs(60);

/// 距离下一个整分钟的时长
pub fn until_next_window<Tz: TimeZone>(now: DateTime<Tz>) -> Duration {
    // 闰秒时 nanosecond 会超过 1e9
    let elapsed = Duration::from_secs(u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond() % 1_000_000_000));
    let remaining = WINDOW_PERIOD.saturating_sub(elapsed);
    if remaining.is_zero() {
        WINDOW_PERIOD
    } else {
        remaining
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    store: Arc<AggregateStore>,
    limiter: Arc<RateLimiter>,
    gateway: Arc<JsonFileStore>,
    flush_interval: Duration,
    flush_timeout: Duration,
}

impl Scheduler {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            limiter: state.limiter.clone(),
            gateway: state.gateway.clone(),
            flush_interval: state.config.flush_interval(),
            flush_timeout: state.config.flush_timeout(),
        }
    }

    /// 取快照并落盘，整个文件操作受 `flush_timeout` 限制
    ///
    /// 超时返回后这次 flush 不会再改动目标文件。
    pub async fn flush_once(&self) -> Result<FlushReport, PersistError> {
        let snapshot = self.store.snapshot();
        self.gateway
            .flush_within(&snapshot, self.flush_timeout)
            .await
    }

    /// 开始新窗口：先清空聚合，再清零限流计数
    pub fn rotate_window(&self) -> usize {
        let retired = self.store.reset();
        self.limiter.reset();
        retired
    }

    /// 同时启动 flush 和 window 两个任务，进程存活期间一直运行
    pub fn spawn(self) -> (JoinHandle<()>, JoinHandle<()>) {
        (self.spawn_flush_task(), self.spawn_window_task())
    }

    pub fn spawn_flush_task(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let period = scheduler.flush_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                path = %scheduler.gateway.path().display(),
                interval_secs = period.as_secs_f64(),
                "flush task started"
            );

            loop {
                ticker.tick().await;
                match scheduler.flush_once().await {
                    Ok(report) => tracing::info!(
                        written = report.written,
                        total = report.total,
                        "counters uploaded"
                    ),
                    // 本轮放弃，下一次定时触发时重新开始
                    Err(e) => tracing::error!("failed to upload counters: {}", e),
                }
            }
        })
    }

    pub fn spawn_window_task(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let first = until_next_window(Local::now());
            let mut ticker = interval_at(Instant::now() + first, WINDOW_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(first_reset_in_ms = first.as_millis() as u64, "window task started");

            loop {
                ticker.tick().await;
                let retired = scheduler.rotate_window();
                tracing::info!(retired_keys = retired, "window reset");
            }
        })
    }

    #[cfg(test)]
    fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }
}
