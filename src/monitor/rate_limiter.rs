//! Two purpose-built limiters (§4.3), deliberately not a token bucket: a
//! sliding window for broadcast creation, and a burst-then-interval gate for
//! job creation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Accepts at most `max` calls in any trailing `window`, evaluated by
/// trimming timestamps older than the window on every check (§4.3 broadcast
/// cap: 10 per 10 minutes).
pub struct SlidingWindowLimiter {
    window: Duration,
    max: usize,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            timestamps: Mutex::new(VecDeque::with_capacity(max)),
        }
    }

    /// Attempts to record a call now; returns whether it was within budget.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::trim(&mut timestamps, now, self.window);
        if timestamps.len() >= self.max {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Checks budget without recording a call, for call sites where
    /// recording only happens on a downstream success (§4.3 broadcast
    /// limiter: "recorded only on successful broadcast creation").
    pub fn would_admit(&self) -> bool {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::trim(&mut timestamps, now, self.window);
        timestamps.len() < self.max
    }

    /// Records a call that has already been admitted by `would_admit`.
    pub fn record(&self) {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        Self::trim(&mut timestamps, now, self.window);
        timestamps.push_back(now);
    }

    fn trim(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Calls recorded in the current window, for observability endpoints.
    pub fn current_count(&self) -> usize {
        let now = Instant::now();
        let mut timestamps = self.timestamps.lock();
        while let Some(&front) = timestamps.front() {
            if now.duration_since(front) > self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        timestamps.len()
    }
}

/// Allows an initial burst of `burst` calls within any trailing `interval`,
/// then requires the oldest of those calls to age back out of the interval
/// before admitting another (§4.3 job-creation cap: burst 5, then >=2s
/// apart). Entries older than `interval` are dropped on every check, so a
/// burst budget replenishes once a full `interval` has passed — this is a
/// sliding window in the same shape as `SlidingWindowLimiter`, just with a
/// tighter window and named for its burst behavior rather than its cap.
pub struct BurstIntervalLimiter {
    burst: usize,
    interval: Duration,
    accepted: Mutex<VecDeque<Instant>>,
}

impl BurstIntervalLimiter {
    pub fn new(burst: usize, interval: Duration) -> Self {
        Self {
            burst,
            interval,
            accepted: Mutex::new(VecDeque::with_capacity(burst)),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut accepted = self.accepted.lock();

        while let Some(&oldest) = accepted.front() {
            if now.duration_since(oldest) > self.interval {
                accepted.pop_front();
            } else {
                break;
            }
        }

        if accepted.len() < self.burst {
            accepted.push_back(now);
            return true;
        }

        let oldest = *accepted.front().expect("len >= burst > 0 implies front");
        if now.duration_since(oldest) >= self.interval {
            accepted.pop_front();
            accepted.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_caps_then_recovers_after_expiry() {
        let limiter = SlidingWindowLimiter::new(Duration::from_millis(50), 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn burst_interval_allows_burst_then_gates_on_spacing() {
        let limiter = BurstIntervalLimiter::new(2, Duration::from_millis(50));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // Once the whole burst has aged out of the interval, the full burst
        // budget is available again.
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
