use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;

use crate::{error::AppError, scheduler};

/// 统计接口的窗口计数限流
///
/// 计数在每个窗口开始时由调度器清零，窗口内单调递增。
#[derive(Debug)]
pub struct RateLimiter {
    count: Mutex<u64>,
    ceiling: u64,
}

impl RateLimiter {
    pub fn new(ceiling: u64) -> Self {
        Self {
            count: Mutex::new(0),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// 先自增再比较，两步在同一把锁内完成
    ///
    /// 每个窗口最多放行 `ceiling - 1` 次。
    pub fn admit(&self) -> bool {
        let mut count = self.count.lock();
        *count = count.saturating_add(1);
        *count < self.ceiling
    }

    pub fn reset(&self) {
        *self.count.lock() = 0;
    }
}

pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.admit() {
        let retry_after_secs = scheduler::until_next_window(chrono::Local::now())
            .as_secs()
            .max(1);
        tracing::info!(
            path = %req.uri().path(),
            ceiling = limiter.ceiling(),
            "stats request rejected by rate limiter"
        );
        return AppError::TooManyRequests { retry_after_secs }.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn admits_until_ceiling() {
        let limiter = RateLimiter::new(10);
        let results: Vec<bool> = (0..12).map(|_| limiter.admit()).collect();
        assert_eq!(results.iter().filter(|ok| **ok).count(), 9);
        assert!(results[..9].iter().all(|ok| *ok));
        assert!(results[9..].iter().all(|ok| !*ok));
        assert_eq!(limiter.count(), 12);
    }

    #[test]
    fn reset_restarts_sequence() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());
        limiter.reset();
        assert_eq!(limiter.count(), 0);
        assert!(limiter.admit());
        assert!(limiter.admit());
        assert!(!limiter.admit());
    }

    #[test]
    fn concurrent_admits_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                thread::spawn(move || (0..50).filter(|_| limiter.admit()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 99);
        assert_eq!(limiter.count(), 400);
    }
}
