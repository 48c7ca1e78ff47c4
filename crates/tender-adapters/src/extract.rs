use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::RecordError;

static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9][0-9,]*(?:\.[0-9]+)?").expect("amount pattern is valid")
});

static DAY_MONTH_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/\-](\d{1,2})[/\-](\d{2,4})").expect("date pattern is valid")
});

pub(crate) fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// String or number leaf, rendered as text. OCDS ids show up as both.
pub(crate) fn json_text(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn json_amount(
    value: &JsonValue,
    path: &[&str],
    field: &'static str,
) -> Result<Option<f64>, RecordError> {
    match json_at(value, path) {
        None => Ok(None),
        Some(JsonValue::Number(n)) => Ok(n.as_f64()),
        Some(JsonValue::String(s)) => parse_amount_text(field, s),
        Some(other) => Err(RecordError::InvalidValue {
            field,
            value: other.to_string(),
        }),
    }
}

pub(crate) fn json_date(
    value: &JsonValue,
    path: &[&str],
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, RecordError> {
    match json_text(value, path) {
        Some(raw) => parse_upstream_date(field, &raw),
        None => Ok(None),
    }
}

/// First numeric run in free text, thousands separators dropped.
/// `"$2,400,000.00 (inc GST)"` becomes `2400000.0`.
pub fn parse_amount_text(field: &'static str, raw: &str) -> Result<Option<f64>, RecordError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let invalid = || RecordError::InvalidValue {
        field,
        value: raw.to_string(),
    };
    let token = AMOUNT.find(raw).ok_or_else(invalid)?;
    token
        .as_str()
        .replace(',', "")
        .parse::<f64>()
        .map(Some)
        .map_err(|_| invalid())
}

/// Normalizes the date shapes upstreams send: RFC 3339, RFC 2822 (feeds),
/// bare ISO timestamps or dates, `DD/MM/YYYY` and `DD-Mon-YYYY`. Two-digit
/// years are taken as 20xx.
pub fn parse_upstream_date(
    field: &'static str,
    raw: &str,
) -> Result<Option<DateTime<Utc>>, RecordError> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(Some(naive.and_utc()));
        }
    }
    // Day-first before ISO dates: chrono reads "1-7-26" as year 1.
    if let Some(date) = parse_day_month_year(value) {
        return Ok(Some(date));
    }
    for format in ["%Y-%m-%d", "%d-%b-%Y", "%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Ok(date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()));
        }
    }

    Err(RecordError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

fn parse_day_month_year(value: &str) -> Option<DateTime<Utc>> {
    let caps = DAY_MONTH_YEAR.captures(value)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let mut year: i32 = caps[3].parse().ok()?;
    if year < 100 {
        year += 2000;
    }
    NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
}
