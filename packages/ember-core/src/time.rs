//! Clock helpers.
//!
//! Every timestamp stored by the engine (`at`, `updated_at`) is Unix time in
//! milliseconds. Seconds are only used for log output.

/// Returns the current Unix timestamp in seconds.
pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Returns a timestamp strictly greater than `previous` and not earlier than now.
///
/// Used for `updated_at` fields so local edits always win last-write-wins
/// comparisons against the version they replace, even if the wall clock
/// stepped backwards.
pub fn next_timestamp_after(previous: i64) -> i64 {
    now_timestamp_millis().max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_is_reasonable() {
        let ts = now_timestamp();
        // Should be after 2024-01-01 (1704067200)
        assert!(ts > 1704067200, "Timestamp {} is too old", ts);
        // Should be before 2100-01-01 (4102444800)
        assert!(ts < 4102444800, "Timestamp {} is too far in future", ts);
    }

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
    }

    #[test]
    fn test_next_timestamp_after_is_monotonic() {
        let future = now_timestamp_millis() + 60_000;
        assert_eq!(next_timestamp_after(future), future + 1);
        assert!(next_timestamp_after(0) >= 1704067200_000);
    }
}
