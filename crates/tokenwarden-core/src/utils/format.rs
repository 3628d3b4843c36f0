use chrono::{DateTime, Duration, Local, Utc};

/// Format a countdown as HH:MM:SS, or "Expired" once it reaches zero
pub fn format_remaining(remaining: Duration) -> String {
    if remaining.num_milliseconds() <= 0 {
        return "Expired".to_string();
    }
    let total_seconds = remaining.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format an expiry instant in local time, with a placeholder when unknown
pub fn format_expiry(instant: Option<DateTime<Utc>>, missing: &str) -> String {
    match instant {
        Some(instant) => instant
            .with_timezone(&Local)
            .format("%b %d, %Y %H:%M:%S")
            .to_string(),
        None => missing.to_string(),
    }
}

/// Comma-separated role list
pub fn format_roles(roles: &[String]) -> String {
    if roles.is_empty() {
        "(none)".to_string()
    } else {
        roles.join(", ")
    }
}

/// Format an optional string, returning a default if None
pub fn format_optional(value: &Option<String>, default: &str) -> String {
    value.as_deref().unwrap_or(default).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(Duration::seconds(3 * 3600 + 5 * 60 + 9)), "03:05:09");
        assert_eq!(format_remaining(Duration::milliseconds(59_999)), "00:00:59");
        assert_eq!(format_remaining(Duration::hours(120)), "120:00:00");
        assert_eq!(format_remaining(Duration::zero()), "Expired");
        assert_eq!(format_remaining(Duration::seconds(-5)), "Expired");
    }

    #[test]
    fn test_format_expiry_missing() {
        assert_eq!(format_expiry(None, "not found"), "not found");
        let instant = DateTime::from_timestamp(1_700_000_000, 0);
        assert!(format_expiry(instant, "-").contains("2023"));
    }

    #[test]
    fn test_format_roles() {
        assert_eq!(format_roles(&[]), "(none)");
        assert_eq!(
            format_roles(&["ROLE_GUEST".to_string(), "ROLE_ADMIN".to_string()]),
            "ROLE_GUEST, ROLE_ADMIN"
        );
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(&Some("alice".to_string()), "-"), "alice");
        assert_eq!(format_optional(&None, "-"), "-");
    }
}
