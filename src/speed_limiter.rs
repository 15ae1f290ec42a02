//! Per-task speed limiting using a token bucket
//!
//! Each task owns one [`SpeedLimiter`]. Transfers call [`SpeedLimiter::acquire`]
//! for every chunk; `set_max_speed` changes the rate while the transfer runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Token bucket shared between a task handle and its worker
///
/// Tokens are bytes. The bucket holds at most one second worth of tokens and
/// refills continuously at `limit_bps`. A limit of 0 means unlimited.
#[derive(Clone, Debug)]
pub struct SpeedLimiter {
    limit_bps: Arc<AtomicU64>,
    tokens: Arc<AtomicU64>,
    last_refill: Arc<AtomicU64>,
}

impl SpeedLimiter {
    /// Create a limiter; `None` means unlimited
    ///
    /// ```
    /// use request_agent::speed_limiter::SpeedLimiter;
    ///
    /// let limiter = SpeedLimiter::new(Some(64 * 1024));
    /// assert_eq!(limiter.limit(), Some(64 * 1024));
    /// assert_eq!(SpeedLimiter::new(None).limit(), None);
    /// ```
    #[must_use]
    pub fn new(limit_bps: Option<u64>) -> Self {
        let limit = limit_bps.unwrap_or(0);
        Self {
            limit_bps: Arc::new(AtomicU64::new(limit)),
            tokens: Arc::new(AtomicU64::new(limit)),
            last_refill: Arc::new(AtomicU64::new(now_nanos())),
        }
    }

    /// Change the limit; takes effect on the next `acquire` round
    pub fn set_limit(&self, limit_bps: Option<u64>) {
        let new_limit = limit_bps.unwrap_or(0);
        let old_limit = self.limit_bps.swap(new_limit, Ordering::SeqCst);
        if new_limit > old_limit {
            self.tokens
                .fetch_add(new_limit - old_limit, Ordering::SeqCst);
        } else {
            // Never keep more than one second of the new rate
            self.tokens.fetch_min(new_limit, Ordering::SeqCst);
        }
    }

    /// Current limit, `None` when unlimited
    pub fn limit(&self) -> Option<u64> {
        match self.limit_bps.load(Ordering::Relaxed) {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Wait until `bytes` may be transferred
    pub async fn acquire(&self, bytes: u64) {
        let mut remaining = bytes;
        while remaining > 0 {
            let limit = self.limit_bps.load(Ordering::Relaxed);
            if limit == 0 {
                return;
            }

            self.refill(limit);

            let available = self.tokens.load(Ordering::SeqCst);
            let take = remaining.min(available);
            if take > 0 {
                if self
                    .tokens
                    .compare_exchange(
                        available,
                        available - take,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    remaining -= take;
                }
                continue;
            }

            // Re-check at least every 100ms so limit changes apply quickly
            let wait_ms = (remaining as f64 / limit as f64 * 1000.0) as u64;
            tokio::time::sleep(Duration::from_millis(wait_ms.clamp(10, 100))).await;
        }
    }

    fn refill(&self, limit: u64) {
        let now = now_nanos();
        let last = self.last_refill.load(Ordering::SeqCst);
        let elapsed_secs = now.saturating_sub(last) as f64 / 1_000_000_000.0;
        let earned = (limit as f64 * elapsed_secs) as u64;
        if earned == 0 {
            return;
        }
        if self
            .last_refill
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let current = self.tokens.load(Ordering::SeqCst);
            self.tokens
                .store(current.saturating_add(earned).min(limit), Ordering::SeqCst);
        }
    }
}

fn now_nanos() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
