//! Time and date parsing utilities.
//!
//! Storage keeps timestamps as RFC3339 text and calendar dates as
//! `YYYY-MM-DD`. Gramps documents carry dates in a looser shape and change
//! times as epoch seconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

/// Parse a Gramps `dateval/@val` permissively.
///
/// - `YYYY` becomes January 1 of that year
/// - `YYYY-MM` becomes the first of that month
/// - `YYYY-MM-DD` parses directly
///
/// Any other shape, or an impossible calendar date, is `None`.
#[must_use]
pub fn parse_gramps_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    match value.len() {
        4 if all_digits(value) => NaiveDate::from_ymd_opt(value.parse().ok()?, 1, 1),
        7 if value.matches('-').count() == 1 => {
            let (year, month) = value.split_once('-')?;
            if !all_digits(year) || !all_digits(month) {
                return None;
            }
            NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
        }
        10 if value.matches('-').count() == 2 => NaiveDate::parse_from_str(value, "%Y-%m-%d").ok(),
        _ => None,
    }
}

/// Read a record's `change` attribute (epoch seconds).
///
/// Falls back to `now` when absent or unparseable, so every record has a
/// modification moment to compare against.
#[must_use]
pub fn parse_change_time(value: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(now)
}

/// Parse a latitude/longitude component.
///
/// Accepts plain decimals and a leading or trailing hemisphere letter;
/// `S` and `W` negate. A decimal comma is tolerated.
#[must_use]
pub fn parse_coordinate(value: &str) -> Option<f64> {
    let mut text = value.trim().to_uppercase().replace(',', ".");
    let mut negate = false;

    for hemisphere in ['N', 'S', 'E', 'W'] {
        if let Some(rest) = text.strip_prefix(hemisphere) {
            negate = matches!(hemisphere, 'S' | 'W');
            text = rest.trim().to_string();
            break;
        }
        if let Some(rest) = text.strip_suffix(hemisphere) {
            negate = matches!(hemisphere, 'S' | 'W');
            text = rest.trim().to_string();
            break;
        }
    }

    let parsed: f64 = text.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }
    Some(if negate { -parsed } else { parsed })
}

/// Format a timestamp for storage.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp. Accepts RFC3339 and `YYYY-MM-DD HH:MM:SS`.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Format a calendar date for storage.
#[must_use]
pub fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a stored calendar date.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
