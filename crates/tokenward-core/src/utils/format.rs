use chrono::{DateTime, Utc};

/// Number of trailing characters of a token kept when redacting for logs.
/// The tail is signature bytes, which differ between tokens; the head of
/// every JWT is the same encoded header.
const REDACTED_SUFFIX_LEN: usize = 6;

/// Redact a token for logs and debug output.
pub fn redact_token(token: &str) -> String {
    let len = token.chars().count();
    if len <= REDACTED_SUFFIX_LEN * 2 {
        return "***".to_string();
    }
    let suffix: String = token.chars().skip(len - REDACTED_SUFFIX_LEN).collect();
    format!("...{} ({} chars)", suffix, len)
}

/// Describe when a token expires relative to `now`, e.g. "in 5m", "2h ago",
/// or "never" for tokens without an expiry.
pub fn format_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(expires_at) = expires_at else {
        return "never".to_string();
    };

    let minutes = (expires_at - now).num_minutes();
    if minutes < 0 {
        format!("{} ago", format_minutes(-minutes))
    } else if minutes == 0 {
        if expires_at < now {
            "just now".to_string()
        } else {
            "in <1m".to_string()
        }
    } else {
        format!("in {}", format_minutes(minutes))
    }
}

fn format_minutes(minutes: i64) -> String {
    if minutes < 60 {
        format!("{}m", minutes)
    } else if minutes < 1440 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}d", minutes / 1440)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_redact_token() {
        assert_eq!(redact_token("short"), "***");
        assert_eq!(redact_token("abcdefghijklmnop"), "...klmnop (16 chars)");
    }

    #[test]
    fn test_format_expiry() {
        let now = Utc::now();
        assert_eq!(format_expiry(None, now), "never");
        assert_eq!(format_expiry(Some(now + Duration::seconds(30)), now), "in <1m");
        assert_eq!(format_expiry(Some(now - Duration::seconds(30)), now), "just now");
        assert_eq!(format_expiry(Some(now + Duration::minutes(5)), now), "in 5m");
        assert_eq!(format_expiry(Some(now + Duration::hours(3)), now), "in 3h");
        assert_eq!(format_expiry(Some(now - Duration::days(2)), now), "2d ago");
    }
}
