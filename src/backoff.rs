//! Reconnect backoff and failure escalation policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Linear reconnect backoff with a ceiling, plus the attempt numbers at which
/// consecutive failures are escalated to error level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay added per failed attempt.
    pub step: Duration,
    /// Upper bound for the delay between two attempts.
    pub max_delay: Duration,
    /// First attempt number that triggers an escalation log.
    pub first_escalation: u32,
    /// Every multiple of this attempt number triggers an escalation log.
    pub escalation_interval: u32,
}

impl ReconnectPolicy {
    /// Creates a policy waiting `step * attempt_no`, capped at `max_delay`.
    pub fn new(step: Duration, max_delay: Duration) -> Self {
        Self {
            step,
            max_delay,
            ..Self::default()
        }
    }

    /// Returns the delay before the next connect attempt.
    ///
    /// `attempt_no` is the counter value after it was incremented for the
    /// attempt that just failed.
    pub fn reconnect_delay(&self, attempt_no: u32) -> Duration {
        self.step.saturating_mul(attempt_no).min(self.max_delay)
    }

    /// Whether a failure at `attempt_no` is logged at error level.
    pub fn should_escalate(&self, attempt_no: u32) -> bool {
        attempt_no == self.first_escalation
            || (self.escalation_interval != 0 && attempt_no % self.escalation_interval == 0)
    }
}

impl Default for ReconnectPolicy {
    /// One second per attempt up to thirty seconds; escalate at 10 and every 100th attempt.
    fn default() -> Self {
        Self {
            step: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            first_escalation: 10,
            escalation_interval: 100,
        }
    }
}
