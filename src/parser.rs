//! Parser for the colon-delimited machine-readable (`-Y`) output of the
//! mm* administrative commands.
//!
//! The format is line oriented: every line starts with the command prefix and
//! a section name, a line whose third field is the literal `HEADER` defines
//! the column layout for that section, and the remaining lines of the section
//! carry values zipped positionally against the header. Numeric fields may be
//! KB-scaled and timestamps arrive percent-escaped in the ANSI C date format.

use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::error;

/// ANSI C asctime layout used by the mm commands, e.g. `Fri Oct  5 10:41:03 2018`.
const MM_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

static TIMEZONE_OVERRIDE: OnceCell<FixedOffset> = OnceCell::new();

/// Pins timestamp interpretation to a fixed offset instead of the host's
/// local zone. Test-only knob; the first caller wins for the process lifetime.
pub fn set_timezone_override(offset: FixedOffset) {
    let _ = TIMEZONE_OVERRIDE.set(offset);
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid numeric value '{value}' for field {field}")]
    InvalidNumber { field: String, value: String },
    #[error("invalid timestamp '{value}' for field {field}")]
    InvalidTime { field: String, value: String },
}

/// Writes one raw field value into a typed record.
pub type FieldSetter<T> = fn(&mut T, &str) -> Result<(), ParseError>;

/// Parses all body rows of one `prefix:section:` block into typed records.
///
/// Headers without a setter are ignored, which keeps the tables forward
/// compatible with columns added by newer filesystem releases. Rows shorter
/// than the header are logged and skipped; a conversion failure in a mapped
/// field aborts the parse so the collector can flag the scrape as failed.
pub fn parse_section<T: Default>(
    output: &str,
    prefix: &str,
    section: &str,
    fields: &[(&str, FieldSetter<T>)],
) -> Result<Vec<T>, ParseError> {
    let mut records = Vec::new();
    let Some(raw) = parse_raw_section(output, prefix, section) else {
        return Ok(records);
    };

    for row in &raw.rows {
        let mut record = T::default();
        for (i, header) in raw.headers.iter().enumerate() {
            if let Some((_, setter)) = fields.iter().find(|(name, _)| name == header) {
                setter(&mut record, &row[i])?;
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// One section of `-Y` output with its header row still in raw form.
///
/// Used where the header names themselves carry data, such as `mmces state`
/// output whose columns are the protocol service names.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSection {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn parse_raw_section(output: &str, prefix: &str, section: &str) -> Option<RawSection> {
    let mut parsed: Option<RawSection> = None;

    for line in output.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        // Guard against trailing garbage that happens to share the prefix.
        if parts.len() < 3 {
            continue;
        }
        if parts[0] != prefix || parts[1] != section {
            continue;
        }
        if parts[2] == "HEADER" {
            parsed = Some(RawSection {
                headers: parts.iter().map(|p| p.to_string()).collect(),
                rows: Vec::new(),
            });
            continue;
        }
        let Some(raw) = parsed.as_mut() else {
            // Body rows before any header have no column layout.
            continue;
        };
        if parts.len() < raw.headers.len() {
            error!(
                "Skipping short {} {} line: {} fields, header has {}",
                prefix,
                section,
                parts.len(),
                raw.headers.len()
            );
            continue;
        }
        raw.rows
            .push(parts.iter().map(|p| p.to_string()).collect());
    }

    parsed
}

/// Parses a decimal value, mapping the literal `nan` to 0.
pub fn parse_float(field: &str, value: &str) -> Result<f64, ParseError> {
    if value.eq_ignore_ascii_case("nan") {
        return Ok(0.0);
    }
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parses a KB-denominated integer field and scales it to bytes.
/// The multiplication stays in integer arithmetic so the conversion is exact.
pub fn parse_kb(field: &str, value: &str) -> Result<f64, ParseError> {
    let kb: u64 = value.parse().map_err(|_| ParseError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    let bytes = kb.checked_mul(1024).ok_or_else(|| ParseError::InvalidNumber {
        field: field.to_string(),
        value: value.to_string(),
    })?;
    Ok(bytes as f64)
}

/// Parses a percent-escaped ANSI C timestamp into Unix seconds, interpreted
/// in the host's local zone (or the test override).
pub fn parse_mm_time(field: &str, value: &str) -> Result<f64, ParseError> {
    let invalid = || ParseError::InvalidTime {
        field: field.to_string(),
        value: value.to_string(),
    };

    let decoded = urlencoding::decode(value).map_err(|_| invalid())?;
    let naive =
        NaiveDateTime::parse_from_str(decoded.trim(), MM_TIME_FORMAT).map_err(|_| invalid())?;

    let timestamp = match TIMEZONE_OVERRIDE.get() {
        Some(offset) => offset
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(invalid)?
            .timestamp(),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(invalid)?
            .timestamp(),
    };
    Ok(timestamp as f64)
}
