//! Per-origin request spacing with random jitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Spaces consecutive fetches of the same origin by a uniformly random delay
/// in `[min, max]`. The first fetch of an origin is not delayed, and origins
/// never wait on each other.
pub struct OriginThrottle {
    min: Duration,
    max: Duration,
    /// Last fetch instant per origin. Each slot is held while its caller waits,
    /// which queues later callers for the same origin behind it.
    slots: Mutex<HashMap<String, Arc<Mutex<Option<Instant>>>>>,
}

impl OriginThrottle {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// A throttle that never waits.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Wait until a fetch of `url` is allowed, then record it as started.
    pub async fn acquire(&self, url: &Url) {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.entry(origin_key(url)).or_default().clone()
        };

        let mut last = slot.lock().await;
        if let Some(previous) = *last {
            let gap = self.jitter();
            let ready_at = previous + gap;
            if ready_at > Instant::now() {
                debug!(origin = %origin_key(url), gap_ms = gap.as_millis() as u64, "throttling");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn jitter(&self) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let (lo, hi) = (self.min.as_millis() as u64, self.max.as_millis() as u64);
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

fn origin_key(url: &Url) -> String {
    url.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn first_fetch_is_immediate() {
        let throttle = OriginThrottle::new(Duration::from_secs(5), Duration::from_secs(5));
        let started = Instant::now();
        throttle.acquire(&url("https://a.example/x")).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn same_origin_is_spaced() {
        let throttle = OriginThrottle::new(Duration::from_millis(40), Duration::from_millis(60));
        let started = Instant::now();
        throttle.acquire(&url("https://a.example/1")).await;
        throttle.acquire(&url("https://a.example/2")).await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn other_origins_do_not_wait() {
        let throttle = OriginThrottle::new(Duration::from_secs(5), Duration::from_secs(5));
        let started = Instant::now();
        throttle.acquire(&url("https://a.example/1")).await;
        throttle.acquire(&url("https://b.example/1")).await;
        throttle.acquire(&url("http://a.example/1")).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_range() {
        let throttle = OriginThrottle::new(Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let d = throttle.jitter();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(OriginThrottle::disabled().jitter(), Duration::ZERO);
    }
}
