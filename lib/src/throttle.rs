/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::settings::ThrottleSettings;

/// Per-key sliding window rate limiters. Keys identify the external
/// destination (webhook url, api key), so one tenant's traffic never
/// delays another tenant's destination.
#[derive(Default)]
pub struct Throttle {
    limiters: Mutex<HashMap<String, Limiter>>,
}

struct Limiter {
    settings: ThrottleSettings,
    /// Admission times, oldest first. May contain reserved future
    /// slots of callers that are still waiting.
    calls: VecDeque<Instant>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a limiter for a key. Re-registering with different
    /// settings resets its history.
    pub fn register(&self, key: &str, settings: ThrottleSettings) {
        let mut limiters = self.limiters.lock();
        if limiters.get(key).is_some_and(|l| l.settings == settings) {
            return;
        }
        limiters.insert(
            key.to_string(),
            Limiter {
                settings,
                calls: VecDeque::new(),
            },
        );
    }

    /// Wait for admission. Returns false if admission would take longer
    /// than the limiter's maximum wait time. Keys without a limiter are
    /// always admitted.
    pub async fn allow(&self, key: &str) -> bool {
        let admit_at = {
            let mut limiters = self.limiters.lock();
            let Some(limiter) = limiters.get_mut(key) else {
                return true;
            };
            match limiter.reserve(Instant::now()) {
                Some(at) => at,
                None => {
                    log::debug!("throttle: refusing call for {key}");
                    return false;
                }
            }
        };
        tokio::time::sleep_until(admit_at).await;
        true
    }
}

impl Limiter {
    fn reserve(&mut self, now: Instant) -> Option<Instant> {
        let unit = self.settings.unit;
        let threshold = self.settings.threshold.max(1);

        while self.calls.front().is_some_and(|t| *t + unit <= now) {
            self.calls.pop_front();
        }

        let at = match self.calls.len() < threshold {
            true => now,
            false => self.calls[self.calls.len() - threshold] + unit,
        };
        if at.duration_since(now) > self.settings.max_wait_time {
            return None;
        }

        let at = self.calls.back().map_or(at, |last| at.max(*last));
        self.calls.push_back(at);
        Some(at)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::Throttle;
    use crate::settings::ThrottleSettings;

    fn settings(max_wait_ms: u64) -> ThrottleSettings {
        ThrottleSettings {
            threshold: 2,
            unit: Duration::from_secs(1),
            max_wait_time: Duration::from_millis(max_wait_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_then_admits() {
        let throttle = Throttle::new();
        throttle.register("hook", settings(2000));

        let start = Instant::now();
        assert!(throttle.allow("hook").await);
        assert!(throttle.allow("hook").await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(throttle.allow("hook").await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_beyond_max_wait() {
        let throttle = Throttle::new();
        throttle.register("hook", settings(100));

        let start = Instant::now();
        assert!(throttle.allow("hook").await);
        assert!(throttle.allow("hook").await);
        assert!(!throttle.allow("hook").await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(throttle.allow("hook").await);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let throttle = Throttle::new();
        throttle.register("a", settings(0));
        throttle.register("b", settings(0));
        assert!(throttle.allow("a").await);
        assert!(throttle.allow("a").await);
        assert!(!throttle.allow("a").await);
        assert!(throttle.allow("b").await);
        assert!(throttle.allow("unregistered").await);
    }
}
