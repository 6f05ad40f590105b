use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sliding-window admission gate for one named service.
///
/// Tracks the timestamps of recent calls; when the window is at capacity
/// the caller is suspended until the oldest call falls out of the window.
/// The window state is mutex-guarded so concurrent callers can never
/// corrupt it, but the wait itself happens outside the lock.
pub struct RateLimiter {
    name: String,
    max_calls: usize,
    period: Duration,
    window: Mutex<Window>,
}

#[derive(Default)]
struct Window {
    calls: VecDeque<Instant>,
    total_calls: u64,
    total_waits: u64,
    total_wait: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub max_calls: usize,
    pub period_secs: u64,
    pub active_calls: usize,
    pub total_calls: u64,
    pub total_waits: u64,
    pub total_wait_secs: f64,
    pub avg_wait_secs: f64,
    pub utilization_pct: f64,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, max_calls: usize, period: Duration) -> Self {
        let name = name.into();
        info!(
            "rate limiter '{}' initialized: {} calls per {:?}",
            name, max_calls, period
        );
        Self {
            name,
            max_calls,
            period,
            window: Mutex::new(Window::default()),
        }
    }

    /// Acquires one admission slot, suspending until the trailing window
    /// has room. Returns how long the caller was made to wait.
    pub async fn acquire(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                Self::purge(&mut window.calls, now, self.period);

                if window.calls.len() < self.max_calls {
                    window.calls.push_back(now);
                    window.total_calls += 1;
                    if waited > Duration::ZERO {
                        window.total_waits += 1;
                        window.total_wait += waited;
                    }
                    return waited;
                }

                // Window is full; wait until the oldest call expires.
                let oldest = *window.calls.front().expect("full window has a front");
                self.period.saturating_sub(now.duration_since(oldest))
            };

            debug!(
                "rate limiter '{}': window full, waiting {:?}",
                self.name, wait
            );
            tokio::time::sleep(wait).await;
            waited += wait;
        }
    }

    fn purge(calls: &mut VecDeque<Instant>, now: Instant, period: Duration) {
        while let Some(front) = calls.front() {
            if now.duration_since(*front) >= period {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        Self::purge(&mut window.calls, now, self.period);

        let active = window.calls.len();
        let avg = if window.total_waits > 0 {
            window.total_wait.as_secs_f64() / window.total_waits as f64
        } else {
            0.0
        };
        RateLimiterStats {
            name: self.name.clone(),
            max_calls: self.max_calls,
            period_secs: self.period.as_secs(),
            active_calls: active,
            total_calls: window.total_calls,
            total_waits: window.total_waits,
            total_wait_secs: window.total_wait.as_secs_f64(),
            avg_wait_secs: avg,
            utilization_pct: (active as f64 / self.max_calls as f64) * 100.0,
        }
    }

    pub async fn reset(&self) {
        let mut window = self.window.lock().await;
        *window = Window::default();
        info!("rate limiter '{}' reset", self.name);
    }
}

/// Registry of per-service limiters. Services without a configured limiter
/// pass through unthrottled: every source has a sane default configured at
/// startup, so failing open favors availability.
pub struct MultiServiceRateLimiter {
    limiters: HashMap<String, RateLimiter>,
}

impl MultiServiceRateLimiter {
    pub fn new() -> Self {
        Self {
            limiters: HashMap::new(),
        }
    }

    /// Limiters for the services the relay talks to, with the budgets the
    /// upstream free tiers allow.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.add_limiter("translate", 100, Duration::from_secs(60));
        registry.add_limiter("rss", 30, Duration::from_secs(60));
        registry.add_limiter("scrape", 60, Duration::from_secs(60));
        registry.add_limiter("api", 4, Duration::from_secs(3600));
        registry
    }

    pub fn add_limiter(&mut self, service: &str, max_calls: usize, period: Duration) {
        self.limiters
            .insert(service.to_string(), RateLimiter::new(service, max_calls, period));
    }

    pub async fn acquire(&self, service: &str) -> Duration {
        match self.limiters.get(service) {
            Some(limiter) => limiter.acquire().await,
            None => {
                warn!("no rate limiter for '{}', allowing call", service);
                Duration::ZERO
            }
        }
    }

    pub async fn all_stats(&self) -> Vec<RateLimiterStats> {
        let mut stats = Vec::with_capacity(self.limiters.len());
        for limiter in self.limiters.values() {
            stats.push(limiter.stats().await);
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

}

impl Default for MultiServiceRateLimiter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_without_waiting() {
        let limiter = RateLimiter::new("test", 5, Duration::from_secs(10));
        for _ in 0..5 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        let stats = limiter.stats().await;
        assert_eq!(stats.total_calls, 5);
        assert_eq!(stats.total_waits, 0);
        assert_eq!(stats.active_calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn never_admits_while_window_is_full() {
        let limiter = RateLimiter::new("test", 5, Duration::from_secs(10));

        // Space the first batch out so each later call has a distinct slot
        // to wait for.
        let mut admitted = Vec::new();
        for _ in 0..5 {
            limiter.acquire().await;
            admitted.push(Instant::now());
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        for _ in 5..10 {
            let waited = limiter.acquire().await;
            assert!(waited > Duration::ZERO, "call should have waited");
            admitted.push(Instant::now());
        }

        // Admission invariant: at most 5 admissions inside any trailing
        // 10s window.
        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[..=i]
                .iter()
                .filter(|a| t.duration_since(**a) < Duration::from_secs(10))
                .count();
            assert!(in_window <= 5, "call {} saw {} in window", i + 1, in_window);
        }

        let stats = limiter.stats().await;
        assert_eq!(stats.total_calls, 10);
        assert_eq!(stats.total_waits, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquires_keep_the_invariant() {
        let limiter = Arc::new(RateLimiter::new("test", 3, Duration::from_secs(5)));
        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }
        admitted.sort();
        for (i, t) in admitted.iter().enumerate() {
            let in_window = admitted[..=i]
                .iter()
                .filter(|a| t.duration_since(**a) < Duration::from_secs(5))
                .count();
            assert!(in_window <= 3);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_the_window_and_counters() {
        let limiter = RateLimiter::new("test", 2, Duration::from_secs(10));
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        limiter.reset().await;
        let stats = limiter.stats().await;
        assert_eq!(stats.total_calls, 0);
        assert_eq!(stats.total_waits, 0);
        assert_eq!(stats.active_calls, 0);

        // A full window's worth admits again immediately.
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_service_passes_through() {
        let registry = MultiServiceRateLimiter::new();
        assert_eq!(registry.acquire("unknown").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_utilization() {
        let mut registry = MultiServiceRateLimiter::new();
        registry.add_limiter("svc", 4, Duration::from_secs(60));
        registry.acquire("svc").await;
        registry.acquire("svc").await;

        let stats = registry.all_stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].active_calls, 2);
        assert!((stats[0].utilization_pct - 50.0).abs() < f64::EPSILON);
    }
}
