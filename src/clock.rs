//! Timestamp utilities for Vitrine
//!
//! Ledger timestamps are stored as milliseconds since the Unix epoch.

use chrono::{DateTime, Local, TimeZone};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Render a millisecond timestamp in local time for display.
///
/// Returns `"never"` for zero, which is what an empty ledger carries.
pub fn format_ms(ms: u64) -> String {
    if ms == 0 {
        return "never".to_string();
    }
    match Local.timestamp_millis_opt(ms as i64).single() {
        Some(dt) => format_local(dt),
        None => format!("{}ms", ms),
    }
}

fn format_local(dt: DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_format_ms_zero_is_never() {
        assert_eq!(format_ms(0), "never");
    }

    #[test]
    fn test_format_ms_shape() {
        let rendered = format_ms(1_738_300_800_123);
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(rendered.len(), 19);
        assert!(rendered.starts_with("2025-01-31") || rendered.starts_with("2025-01-30"));
    }
}
