//! Timeline scores.
//!
//! A record's score is its `updated` timestamp, else its `created`
//! timestamp, else the wall-clock time of the write. Timestamps are read as
//! epoch seconds (integer or fractional) or RFC 3339.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Score a record from its fields.
#[must_use]
pub fn timestamp_score(
    fields: &BTreeMap<String, String>,
    updated_field: &str,
    created_field: &str,
) -> f64 {
    [updated_field, created_field]
        .into_iter()
        .find_map(|field| fields.get(field).and_then(|raw| parse_timestamp(raw)))
        .unwrap_or_else(now)
}

/// Parse an epoch-seconds or RFC 3339 timestamp.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<f64>() {
        return secs.is_finite().then_some(secs);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| to_epoch(dt.with_timezone(&Utc)))
}

/// Current wall-clock time in epoch seconds.
#[must_use]
pub fn now() -> f64 {
    to_epoch(Utc::now())
}

#[allow(clippy::cast_precision_loss)]
fn to_epoch(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_updated_preferred() {
        let f = fields(&[("updated", "200"), ("created", "100")]);
        assert!((timestamp_score(&f, "updated", "created") - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_created_fallback() {
        let f = fields(&[("created", "100.5")]);
        assert!((timestamp_score(&f, "updated", "created") - 100.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unparseable_updated_falls_through() {
        let f = fields(&[("updated", "yesterday"), ("created", "42")]);
        assert!((timestamp_score(&f, "updated", "created") - 42.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rfc3339() {
        let parsed = parse_timestamp("1970-01-01T00:01:40Z").unwrap();
        assert!((parsed - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_wall_clock_fallback() {
        let before = now();
        let score = timestamp_score(&BTreeMap::new(), "updated", "created");
        assert!(score >= before);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert_eq!(parse_timestamp("NaN"), None);
        assert_eq!(parse_timestamp("inf"), None);
    }
}
