//! Rate limiting and stream health monitoring (§4.3, §4.4).

pub mod health_monitor;
pub mod rate_limiter;

pub use health_monitor::HealthMonitor;
pub use rate_limiter::{BurstIntervalLimiter, SlidingWindowLimiter};
