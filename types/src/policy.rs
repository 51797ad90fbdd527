use std::time::Duration;

/// Unified timeout policy injected into the bridge and the session service.
///
/// Every suspension point in the system derives its bound from this one
/// struct, replacing the per-flow ad hoc constants the original UI carried.
#[derive(Clone, Copy, Debug)]
pub struct TimeoutPolicy {
    /// Upper bound on any single ledger call.
    pub ledger_call: Duration,
    /// How long a disconnected player may return before forfeiting.
    pub disconnect_grace: Duration,
    /// Interval between countdown ticks.
    pub countdown_interval: Duration,
    /// Interval between retry attempts for queued settlement calls.
    pub settlement_retry: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            ledger_call: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(30),
            countdown_interval: Duration::from_secs(1),
            settlement_retry: Duration::from_secs(5),
        }
    }
}
