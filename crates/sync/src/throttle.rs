//! Per-engine backoff instant and pre-request jitter, shared by every worker
//! downloading pages for one document.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

const VATICAN_HOST_NEEDLE: &str = "vatlib.it";

/// A single mutable "do not issue a request before this instant" field,
/// guarded by a mutex and shared between every worker downloading pages for
/// one document. 429 responses push the instant forward; every request
/// first waits for it to pass.
#[derive(Clone, Debug)]
pub struct Backoff {
    until: Arc<Mutex<Instant>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            until: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl Backoff {
    /// Push the backoff instant to `now + 2^attempt * 15s`.
    pub fn trip(&self, attempt: u32) {
        let wait = Duration::from_secs(15) * 2u32.saturating_pow(attempt);
        let mut guard = self.until.lock();
        let candidate = Instant::now() + wait;
        if candidate > *guard {
            *guard = candidate;
        }
    }

    /// Sleep out any outstanding backoff, with jitter in [0.1, 0.5]s, then
    /// apply the per-host base delay.
    pub fn wait(&self, manifest_host: &str) {
        let now = Instant::now();
        let until = *self.until.lock();
        if now < until {
            let jitter = jittered(0.1, 0.5);
            std::thread::sleep((until - now) + jitter);
        }

        let (low, high) = if manifest_host.contains(VATICAN_HOST_NEEDLE) {
            (1.5, 4.0)
        } else {
            (0.4, 1.2)
        };
        std::thread::sleep(jittered(low, high));
    }
}

/// A uniformly distributed delay in `[low, high]` seconds, sourced from the
/// OS-backed CSPRNG `rand::rng()` uses by default on every supported target.
fn jittered(low: f64, high: f64) -> Duration {
    let secs = rand::rng().random_range(low..=high);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_only_extends_forward() {
        let backoff = Backoff::default();
        let first = Instant::now() + Duration::from_secs(60);
        *backoff.until.lock() = first;
        backoff.trip(0); // 15s, should not shorten the existing 60s window
        assert!(*backoff.until.lock() >= first);
    }

    #[test]
    fn trip_grows_exponentially() {
        let backoff = Backoff::default();
        *backoff.until.lock() = Instant::now();
        backoff.trip(3); // 2^3 * 15s = 120s
        let remaining = *backoff.until.lock() - Instant::now();
        assert!(remaining.as_secs() >= 119 && remaining.as_secs() <= 120);
    }

    #[test]
    fn wait_applies_vatican_delay_floor() {
        let backoff = Backoff::default();
        let start = Instant::now();
        backoff.wait("digi.vatlib.it");
        assert!(start.elapsed() >= Duration::from_secs_f64(1.4));
    }
}
