use tokio::time::Duration;

/// Bounds for the exponential backoff applied between failed queries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BackoffParams {
    pub initial: Duration,
    pub max: Duration,
}

/// Doubling backoff with a ceiling.
///
/// Delays are non-decreasing until they reach `max` and then stay constant.
/// There is no jitter: each region backs off independently already.
#[derive(Clone, Debug)]
pub struct Backoff {
    params: BackoffParams,
    next: Duration,
}

// === impl BackoffParams ===

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

// === impl Backoff ===

impl Backoff {
    pub fn new(params: BackoffParams) -> Self {
        Self {
            next: params.initial.min(params.max),
            params,
        }
    }

    /// Returns the delay to wait before the next attempt and advances the
    /// schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay.saturating_mul(2).min(self.params.max);
        delay
    }

    /// Restarts the schedule after a successful attempt.
    pub fn reset(&mut self) {
        self.next = self.params.initial.min(self.params.max);
    }
}
