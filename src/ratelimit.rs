use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::Mutex, time::Instant};

/// Paces transfers to a bytes-per-second budget. A limit of 0 disables
/// pacing.
#[derive(Clone, Default)]
pub struct RateLimiter {
    limit: Arc<AtomicU64>,
    next_free: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: u64) -> Self {
        let limiter = Self::default();
        limiter.set_limit(limit);
        limiter
    }

    pub fn set_limit(&self, bytes_per_second: u64) {
        self.limit.store(bytes_per_second, Ordering::Relaxed);
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    /// Waits until `bytes` may be transferred under the current limit.
    pub async fn acquire(&self, bytes: u64) {
        let limit = self.limit();
        if limit == 0 {
            return;
        }
        let cost = Duration::from_secs_f64(bytes as f64 / limit as f64);
        let start = {
            let mut next_free = self.next_free.lock().await;
            let now = Instant::now();
            let start = next_free.map_or(now, |t| t.max(now));
            *next_free = Some(start + cost);
            start
        };
        tokio::time::sleep_until(start).await;
    }
}

#[derive(Clone, Default)]
pub struct RateLimits {
    pub download: RateLimiter,
    pub upload: RateLimiter,
}

impl RateLimits {
    pub fn new(max_download_speed: u64, max_upload_speed: u64) -> Self {
        Self {
            download: RateLimiter::new(max_download_speed),
            upload: RateLimiter::new(max_upload_speed),
        }
    }

    pub fn set(&self, max_download_speed: u64, max_upload_speed: u64) {
        self.download.set_limit(max_download_speed);
        self.upload.set_limit(max_upload_speed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn paces_transfers_to_the_limit() {
        let limiter = RateLimiter::new(1000);
        let start = Instant::now();
        limiter.acquire(500).await;
        limiter.acquire(500).await;
        limiter.acquire(500).await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert!(start.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_is_unlimited() {
        let limiter = RateLimiter::new(0);
        let start = Instant::now();
        limiter.acquire(u64::MAX).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
