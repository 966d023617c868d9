//! Scalar coercion helpers shared by entity normalizers.
//!
//! None of these fail: a value that does not coerce falls back to a
//! documented sentinel, an empty string or `None`, so one malformed legacy row
//! never aborts a pass.

use chrono::NaiveDate;
use tracing::debug;

use crate::Scalar;

/// Stored for measurement and percentage columns that are present but do not
/// parse. Zero is a legitimate reading, so it cannot mark "invalid".
pub const MEASUREMENT_SENTINEL: f64 = -1.0;

/// Right-trimmed text rendering; null becomes the empty string.
pub fn text(value: &Scalar) -> String {
    optional_text(value).unwrap_or_default()
}

pub fn optional_text(value: &Scalar) -> Option<String> {
    match value {
        Scalar::Null => None,
        Scalar::Number(number) => Some(format!("{number}")),
        Scalar::Text(text) => Some(text.trim_end().to_string()),
    }
}

/// Float parse with null propagation. Non-finite results count as unparseable
/// since they would never compare equal on the next pass.
pub fn parse_number(value: &Scalar) -> Option<f64> {
    let parsed = match value {
        Scalar::Null => return None,
        Scalar::Number(number) => Some(*number),
        Scalar::Text(text) => text.trim().parse::<f64>().ok(),
    };
    match parsed {
        Some(number) if number.is_finite() => Some(number),
        _ => {
            if !value.is_blank() {
                debug!(value = ?value, "unparseable numeric value");
            }
            None
        }
    }
}

pub fn parse_measurement(value: &Scalar) -> f64 {
    parse_number(value).unwrap_or(MEASUREMENT_SENTINEL)
}

/// Legacy flag columns hold a marker character or nothing.
pub fn flag_present(value: &Scalar) -> bool {
    !value.is_blank()
}

/// Records are active unless the inactive-flag column carries a marker.
pub fn is_active(inactive_flag: &Scalar) -> bool {
    !flag_present(inactive_flag)
}

/// Builds a date from the legacy day / month / century-offset-year triple.
///
/// Years below 1000 are offsets from 2000 (`24` -> 2024); anything else is
/// taken as a full year. Any missing or zero part, or an impossible calendar
/// date, yields `None`.
pub fn legacy_date(day: &Scalar, month: &Scalar, year: &Scalar) -> Option<NaiveDate> {
    let part = |value: &Scalar| {
        parse_number(value)
            .filter(|n| *n >= 1.0 && n.fract() == 0.0)
            .map(|n| n as u32)
    };
    let (day, month, year) = (part(day)?, part(month)?, part(year)?);
    let year = if year < 1000 { 2000 + year } else { year };
    let date = NaiveDate::from_ymd_opt(year as i32, month, day);
    if date.is_none() {
        debug!(day, month, year, "invalid legacy date");
    }
    date
}

/// Folds the legacy country codes onto their canonical ISO-3 code.
pub fn country_code(code: &str) -> String {
    match code.trim() {
        "CDA" | "CD0" | "CD1" => "CAN".to_string(),
        "SA" => "SAF".to_string(),
        "US1" | "USE" | "" => "USA".to_string(),
        other => other.to_string(),
    }
}

/// A numeric zero part is an unset part and contributes nothing.
pub fn phone(area: &Scalar, exchange: &Scalar, number: &Scalar) -> String {
    let part = |value: &Scalar| match value {
        Scalar::Number(number) if *number == 0.0 => String::new(),
        other => text(other),
    };
    format!("{}{}{}", part(area), part(exchange), part(number))
}

/// Integer-parses a zip code and left-pads it to five digits. Values without
/// a leading integer are kept as their trimmed text.
pub fn zip_code(value: &Scalar) -> String {
    let raw = match value {
        Scalar::Number(number) if number.is_finite() => return pad_zip(number.trunc() as i64),
        other => text(other),
    };
    let trimmed = raw.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i64>() {
        Ok(number) => pad_zip(number),
        Err(_) => raw.trim().to_string(),
    }
}

fn pad_zip(number: i64) -> String {
    format!("{number:0>5}")
}
