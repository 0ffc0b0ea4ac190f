//! Utility functions for shardmaster

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Longest dataset or shard name accepted from clients and discovery
const MAX_NAME_LEN: usize = 255;

/// Parse duration string (e.g., "30s", "5m", "1h", "7d")
pub fn parse_duration(s: &str) -> crate::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map(char::len_utf8).unwrap_or(0);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let scale = match unit {
        "ms" => return Ok(Duration::from_millis(num)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => {
            return Err(crate::Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    num.checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))
}

/// Parse a duration string into whole milliseconds
pub fn parse_duration_millis(s: &str) -> crate::Result<u64> {
    let duration = parse_duration(s)?;
    u64::try_from(duration.as_millis())
        .map_err(|_| crate::Error::InvalidConfig(format!("duration out of range: {}", s)))
}

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Render a Unix-millis timestamp as RFC 3339 for logs and CLI output
pub fn format_timestamp_millis(millis: u64) -> String {
    chrono::DateTime::from_timestamp_millis(millis as i64)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

/// Validate a dataset name (non-empty, bounded, no separators or control chars)
pub fn validate_dataset(name: &str) -> crate::Result<()> {
    validate_name("dataset", name)
}

/// Validate a shard name (same rules as dataset names)
pub fn validate_shard(name: &str) -> crate::Result<()> {
    validate_name("shard", name)
}

fn validate_name(kind: &str, name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::Error::InvalidRequest(format!(
            "{} name cannot be empty",
            kind
        )));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(crate::Error::InvalidRequest(format!(
            "{} name too long (max {} bytes)",
            kind, MAX_NAME_LEN
        )));
    }

    if name == "." || name == ".." || name.contains('/') || name.chars().any(|c| c.is_control())
    {
        return Err(crate::Error::InvalidRequest(format!(
            "{} name contains invalid characters: {:?}",
            kind, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("10é").is_err());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        assert!(matches!(
            parse_duration("300000000000000d"),
            Err(crate::Error::InvalidConfig(_))
        ));
        assert!(parse_duration("18446744073709551615h").is_err());
        assert!(parse_duration_millis("18446744073709551615s").is_err());
        assert_eq!(parse_duration_millis("5m").unwrap(), 300_000);
        assert_eq!(parse_duration_millis("250ms").unwrap(), 250);
    }

    #[test]
    fn test_validate_dataset() {
        assert!(validate_dataset("orders").is_ok());
        assert!(validate_dataset("orders_v2.daily").is_ok());
        assert!(validate_dataset("").is_err());
        assert!(validate_dataset("a/b").is_err());
        assert!(validate_dataset("..").is_err());
        assert!(validate_dataset("nul\0byte").is_err());
        assert!(validate_dataset(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp_millis(0), "1970-01-01T00:00:00+00:00");
    }
}
