//! Formatting helpers shared by the CLI and the markdown exporter.

use chrono::{DateTime, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format a millisecond duration compactly ("850ms", "2.4s", "1m05s").
pub fn format_duration_ms(ms: f64) -> String {
    if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else {
        let total_secs = (ms / 1000.0) as i64;
        format!("{}m{:02}s", total_secs / 60, total_secs % 60)
    }
}

/// Format a 0..=1 rate as a percentage ("99.0%").
pub fn format_rate(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert!(format_relative_time(now - Duration::seconds(30)).ends_with("s ago"));
        assert!(format_relative_time(now - Duration::minutes(5)).ends_with("m ago"));
        assert!(format_relative_time(now - Duration::hours(3)).ends_with("h ago"));
        assert_eq!(format_relative_time(now + Duration::seconds(10)), "just now");
    }

    #[test]
    fn test_duration_ms() {
        assert_eq!(format_duration_ms(850.0), "850ms");
        assert_eq!(format_duration_ms(2400.0), "2.4s");
        assert_eq!(format_duration_ms(65_000.0), "1m05s");
    }

    #[test]
    fn test_rate() {
        assert_eq!(format_rate(0.99), "99.0%");
        assert_eq!(format_rate(0.0), "0.0%");
    }
}
