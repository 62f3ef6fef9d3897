//! Parsing of human-readable publish times
//!
//! Operators give publish times as relative durations, natural language, or
//! absolute timestamps; everything normalizes to a UTC instant.

use crate::error::{Result, SyndicError};
use chrono::{DateTime, Duration, Utc};

/// Parse a publish-time string into a DateTime
///
/// Supports multiple formats:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next monday 10am"
/// - Absolute times: "2026-09-20 15:00"
///
/// # Errors
///
/// Returns an error if the time format is invalid or cannot be parsed.
pub fn parse_publish_time(input: &str) -> Result<DateTime<Utc>> {
    if input.is_empty() {
        return Err(SyndicError::Validation(
            "publish time cannot be empty".to_string(),
        ));
    }

    // Try duration parsing first
    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    // Fall back to natural language / absolute parsing
    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(SyndicError::Validation(format!(
        "could not parse publish time: {}",
        input
    )))
}

/// Parse a duration string into a chrono::Duration
fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| SyndicError::Validation("duration out of range".to_string()));
    }

    Err(SyndicError::Validation(format!(
        "could not parse duration: {}",
        input
    )))
}

fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| SyndicError::Validation(format!("could not parse time: {}", e)))
}
