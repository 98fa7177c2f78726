//! Schedule-string parsing
//!
//! CLI-facing parsing of human-readable times into publish timestamps.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::{Result, SyndicastError};

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600; // 30 days

/// Parse a schedule string into a DateTime
///
/// Supports multiple formats:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "next week", "in 1 hour"
/// - Absolute times: "2026-09-20 15:00", "next monday 10am"
/// - Random intervals: "random:10m-20m", "random:1h-2h"
///
/// The `last_scheduled` timestamp anchors random intervals so repeated
/// invocations space posts out instead of clustering them around now.
pub fn parse_schedule(input: &str, last_scheduled: Option<i64>) -> Result<DateTime<Utc>> {
    if input.is_empty() {
        return Err(SyndicastError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.starts_with("random:") {
        return parse_random_schedule(input, last_scheduled);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Utc::now() + duration);
    }

    if let Ok(dt) = parse_natural_language(input) {
        return Ok(dt);
    }

    Err(SyndicastError::InvalidInput(format!(
        "Could not parse schedule string: {}",
        input
    )))
}

fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(std_duration) = humantime::parse_duration(input) {
        let seconds = std_duration.as_secs() as i64;
        return Duration::try_seconds(seconds)
            .ok_or_else(|| SyndicastError::InvalidInput("Duration out of range".to_string()));
    }

    Err(SyndicastError::InvalidInput(format!(
        "Could not parse duration: {}",
        input
    )))
}

fn parse_natural_language(input: &str) -> Result<DateTime<Utc>> {
    chrono_english::parse_date_string(input, Utc::now(), chrono_english::Dialect::Us)
        .map_err(|e| SyndicastError::InvalidInput(format!("Could not parse time: {}", e)))
}

/// Parse random schedule format: "random:MIN-MAX"
fn parse_random_schedule(input: &str, last_scheduled: Option<i64>) -> Result<DateTime<Utc>> {
    let range_part = input
        .strip_prefix("random:")
        .ok_or_else(|| SyndicastError::InvalidInput("Invalid random format".to_string()))?;

    let (min_str, max_str) = parse_random_range(range_part)?;
    let min_duration = parse_duration(min_str)?;
    let max_duration = parse_duration(max_str)?;

    validate_random_range(min_duration, max_duration)?;

    let base_time = match last_scheduled {
        Some(timestamp) => DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
        None => Utc::now(),
    };

    let min_secs = min_duration.num_seconds();
    let max_secs = max_duration.num_seconds();
    let random_secs = rand::thread_rng().gen_range(min_secs..=max_secs);
    let random_duration = Duration::try_seconds(random_secs).unwrap_or(min_duration);

    Ok(base_time + random_duration)
}

fn parse_random_range(range: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(SyndicastError::InvalidInput(
            "Random format must be MIN-MAX".to_string(),
        ));
    }
    Ok((parts[0], parts[1]))
}

fn validate_random_range(min: Duration, max: Duration) -> Result<()> {
    let min_secs = min.num_seconds();
    let max_secs = max.num_seconds();

    if min_secs < MIN_RANDOM_SECONDS {
        return Err(SyndicastError::InvalidInput(format!(
            "Minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }

    if max_secs > MAX_RANDOM_SECONDS {
        return Err(SyndicastError::InvalidInput(format!(
            "Maximum random interval must be less than {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }

    if min_secs >= max_secs {
        return Err(SyndicastError::InvalidInput(
            "Minimum must be less than maximum".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_minutes() {
        let scheduled = parse_schedule("30m", None).unwrap();
        let diff = (scheduled - Utc::now()).num_minutes();
        assert!((29..=30).contains(&diff));
    }

    #[test]
    fn test_parse_duration_hours_and_days() {
        let in_two_hours = parse_schedule("2h", None).unwrap();
        assert!((in_two_hours - Utc::now()).num_minutes() >= 119);

        let in_a_day = parse_schedule("1day", None).unwrap();
        assert!((in_a_day - Utc::now()).num_hours() >= 23);
    }

    #[test]
    fn test_parse_natural_language_tomorrow() {
        let scheduled = parse_schedule("tomorrow", None).unwrap();
        assert!(scheduled > Utc::now());
    }

    #[test]
    fn test_parse_empty_is_invalid_input() {
        assert!(matches!(
            parse_schedule("", None),
            Err(SyndicastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_parse_garbage_is_invalid_input() {
        assert!(matches!(
            parse_schedule("never o'clock nowhere", None),
            Err(SyndicastError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_random_range_within_bounds() {
        let now = Utc::now();
        for _ in 0..20 {
            let scheduled = parse_schedule("random:10m-20m", None).unwrap();
            let diff = (scheduled - now).num_seconds();
            assert!((595..=1205).contains(&diff), "diff was {}", diff);
        }
    }

    #[test]
    fn test_random_anchors_to_last_scheduled() {
        let anchor = Utc::now().timestamp() + 7200;
        let scheduled = parse_schedule("random:10m-20m", Some(anchor)).unwrap();
        assert!(scheduled.timestamp() >= anchor + 600);
        assert!(scheduled.timestamp() <= anchor + 1200);
    }

    #[test]
    fn test_random_rejects_inverted_range() {
        assert!(parse_schedule("random:20m-10m", None).is_err());
    }

    #[test]
    fn test_random_rejects_tiny_minimum() {
        assert!(parse_schedule("random:5s-10m", None).is_err());
    }

    #[test]
    fn test_random_rejects_malformed_range() {
        assert!(parse_schedule("random:10m", None).is_err());
        assert!(parse_schedule("random:10m-20m-30m", None).is_err());
    }
}
