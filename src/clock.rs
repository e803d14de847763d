//! Wall-clock helpers
//!
//! Timers use `tokio::time::Instant`; wall-clock time is only used for
//! values that go on the wire (session names, chat timestamps).

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds, or 0 if the clock is before the epoch
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_millis_is_recent() {
        // 2020-01-01 in millis
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
