//! Admission control for meeting rosters.
//!
//! The guard is a pure predicate over the current roster size and the
//! meeting's configured maximum. Reconnects of an already-present user never
//! consult it, since replacing a connection in place does not change the
//! roster size. The configured minimum participant count is informational
//! only and is never enforced at join time.

/// Returns true when a new session may be admitted into a roster of
/// `current_roster_size` entries.
pub fn can_admit(current_roster_size: usize, max_participants: u32) -> bool {
    (current_roster_size as u64) < u64::from(max_participants)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_below_maximum() {
        assert!(can_admit(0, 2));
        assert!(can_admit(1, 2));
    }

    #[test]
    fn test_rejects_at_maximum() {
        assert!(!can_admit(2, 2));
        assert!(!can_admit(3, 2));
    }

    #[test]
    fn test_zero_capacity_admits_nobody() {
        assert!(!can_admit(0, 0));
    }

    #[test]
    fn test_large_roster_does_not_overflow() {
        assert!(!can_admit(usize::MAX, u32::MAX));
        assert!(can_admit(100, u32::MAX));
    }
}
