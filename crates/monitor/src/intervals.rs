//! Interval resolution: per-account and per-binding overrides inherit the
//! global defaults when left at 0.

use std::time::Duration;

/// Recurring live updates are never allowed below this floor.
const RECURRING_FLOOR_MINUTES: u64 = 30;

/// Poll cadence for one account: its override when non-zero, else the
/// global interval.
pub fn effective_poll_interval(account_secs: u64, global_secs: u64) -> Duration {
    let secs = if account_secs > 0 { account_secs } else { global_secs };
    Duration::from_secs(secs.max(1))
}

/// Recurring "still live" cadence for one binding, floored at 30 minutes.
pub fn effective_recurring_minutes(binding_minutes: u64, default_minutes: u64) -> u64 {
    let minutes = if binding_minutes > 0 {
        binding_minutes
    } else {
        default_minutes
    };
    minutes.max(RECURRING_FLOOR_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_override_wins_when_set() {
        assert_eq!(effective_poll_interval(120, 30), Duration::from_secs(120));
        assert_eq!(effective_poll_interval(0, 30), Duration::from_secs(30));
    }

    #[test]
    fn poll_interval_never_reaches_zero() {
        assert_eq!(effective_poll_interval(0, 0), Duration::from_secs(1));
    }

    #[test]
    fn recurring_floor_applies_to_both_layers() {
        assert_eq!(effective_recurring_minutes(0, 60), 60);
        assert_eq!(effective_recurring_minutes(90, 60), 90);
        assert_eq!(effective_recurring_minutes(10, 60), 30);
        assert_eq!(effective_recurring_minutes(0, 5), 30);
    }
}
