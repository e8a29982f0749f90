use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Time source for the rate limiter, swappable in tests.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep_until(&self, deadline: Instant);
}

/// Wall clock backed by tokio timers.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline.into()).await;
    }
}

struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window request counter shared by every call through one adapter.
///
/// Process-local. A caller that finds the budget exhausted sleeps until the
/// window boundary while holding the lock, so queued callers wait behind it.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub const WINDOW: Duration = Duration::from_secs(60);

    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_clock(requests_per_minute, Arc::new(SystemClock))
    }

    pub fn with_clock(requests_per_minute: u32, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            limit: requests_per_minute.max(1),
            window: Self::WINDOW,
            clock,
            state: Mutex::new(Window { start, count: 0 }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Wait until a request may be dispatched.
    pub async fn acquire(&self) {
        let mut window = self.state.lock().await;
        let now = self.clock.now();

        if now.duration_since(window.start) >= self.window {
            window.start = now;
            window.count = 0;
        }

        if window.count >= self.limit {
            let boundary = window.start + self.window;
            info!(
                "Rate limit reached ({}/{} per minute), waiting {:.1}s",
                window.count,
                self.limit,
                boundary.saturating_duration_since(now).as_secs_f64()
            );
            self.clock.sleep_until(boundary).await;
            window.start = self.clock.now();
            window.count = 0;
        }
    }

    /// Count a request that was dispatched successfully.
    pub async fn record_dispatch(&self) {
        let mut window = self.state.lock().await;
        window.count += 1;
        debug!("Rate limiter: {}/{} in current window", window.count, self.limit);
    }

    /// Requests counted in the current window.
    pub async fn used(&self) -> u32 {
        self.state.lock().await.count
    }
}
