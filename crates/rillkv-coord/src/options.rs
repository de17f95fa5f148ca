//! Coordinator policy knobs.

use std::time::Duration;

/// Upper bound on concurrent catch-up joins across all partitions.
pub const MAX_RAFT_JOIN_RUNNING: i64 = 5;

/// Timing and concurrency policy for the coordinator. Production uses the
/// defaults; tests shrink the durations.
#[derive(Clone, Debug)]
pub struct CoordOptions {
    /// Interval of the full periodic reconciliation.
    pub tick_interval: Duration,
    /// Delay before a nudge posts, coalescing bursts of requests.
    pub nudge_delay: Duration,
    /// Overall budget for one join attempt.
    pub join_budget: Duration,
    /// Pause between join retries and sync polls.
    pub retry_pause: Duration,
    /// Concurrent catch-up join cap.
    pub max_join_running: i64,
}

impl Default for CoordOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(600),
            nudge_delay: Duration::from_secs(1),
            join_budget: Duration::from_secs(30),
            retry_pause: Duration::from_millis(500),
            max_join_running: MAX_RAFT_JOIN_RUNNING,
        }
    }
}

impl CoordOptions {
    /// Fast variant for tests: same shape, millisecond scale.
    pub fn fast() -> Self {
        Self {
            tick_interval: Duration::from_millis(200),
            nudge_delay: Duration::from_millis(10),
            join_budget: Duration::from_millis(100),
            retry_pause: Duration::from_millis(10),
            max_join_running: MAX_RAFT_JOIN_RUNNING,
        }
    }
}
