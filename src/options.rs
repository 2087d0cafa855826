use std::time::Duration;

/// Configures backoff and timeout behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Length of one backoff unit in milliseconds (linear strategy).
    ///
    /// Before attempt `n + 1` the client sleeps `n` units.
    pub backoff_unit_ms: u64,
    /// Per-request timeout in milliseconds, applied to requests that do not
    /// carry their own.
    pub timeout_ms: Option<u64>,
}

impl ClientOptions {
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        let units = u64::try_from(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(units))
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            backoff_unit_ms: 1_000,
            timeout_ms: None,
        }
    }
}
