//! Normalization of source timestamp representations.
//!
//! Source columns may store a Unix-epoch numeric value or a textual
//! temporal value, and the representation can vary row by row. Everything
//! is normalized to a single `NaiveDateTime` (UTC) before comparison
//! against the checkpoint and before computing the checkpoint candidate,
//! so both sides of a persisted checkpoint use identical semantics.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::source::CellValue;

/// Format used for the persisted checkpoint instant (microsecond precision).
pub const CHECKPOINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Textual formats accepted for source timestamp values, tried in order.
const TEXT_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Convert Unix epoch seconds (with fractional sub-second part) to an instant.
pub fn from_epoch_seconds(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.div_euclid(1.0) as i64;
    let nanos = (seconds.rem_euclid(1.0) * 1e9).round() as u32;
    // Rounding can push the fraction to a full second
    let (whole, nanos) = if nanos >= 1_000_000_000 {
        (whole + 1, 0)
    } else {
        (whole, nanos)
    };
    DateTime::from_timestamp(whole, nanos).map(|dt| dt.naive_utc())
}

/// Convert an instant back to Unix epoch seconds.
pub fn to_epoch_seconds(instant: NaiveDateTime) -> f64 {
    let utc = instant.and_utc();
    utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) / 1e9
}

/// Parse a textual timestamp value.
pub fn from_text(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in TEXT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    None
}

/// Normalize a source cell to an instant.
///
/// Integer and real cells are interpreted as Unix epoch seconds; text cells
/// are parsed against the accepted textual formats. Returns `None` for
/// values no rule accepts (the caller skips and logs the row).
pub fn normalize(value: &CellValue) -> Option<NaiveDateTime> {
    match value {
        CellValue::Integer(secs) => DateTime::from_timestamp(*secs, 0).map(|dt| dt.naive_utc()),
        CellValue::Real(secs) => from_epoch_seconds(*secs),
        CellValue::Text(text) => from_text(text),
        CellValue::Null | CellValue::Blob(_) => None,
    }
}
