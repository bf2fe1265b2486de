//! InfluxDB line-protocol encoding.
//!
//! One point per line:
//!
//! ```text
//! measurement[,tag=value...] field=value[,field=value...] timestamp_ns
//! ```
//!
//! Fields are always floats, so values carry no type suffix.

use sensorhub_core::{DataPoint, StoreError};

/// Encode one point as a single line (no trailing newline).
///
/// # Errors
///
/// Returns [`StoreError::Encoding`] if the point has no fields, a field is
/// not finite, or the timestamp is outside the nanosecond range.
pub fn encode(point: &DataPoint) -> Result<String, StoreError> {
    if point.fields.is_empty() {
        return Err(StoreError::Encoding(format!(
            "point '{}' has no fields",
            point.measurement
        )));
    }
    let nanos = point.timestamp.timestamp_nanos_opt().ok_or_else(|| {
        StoreError::Encoding(format!(
            "timestamp {} does not fit in nanoseconds",
            point.timestamp
        ))
    })?;

    let mut line = escape(&point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        line.push(',');
        line.push_str(&escape(key, KEY_SPECIALS));
        line.push('=');
        line.push_str(&escape(value, KEY_SPECIALS));
    }

    let mut first = true;
    for (key, value) in &point.fields {
        if !value.is_finite() {
            return Err(StoreError::Encoding(format!(
                "field '{key}' is not finite: {value}"
            )));
        }
        line.push(if first { ' ' } else { ',' });
        first = false;
        line.push_str(&escape(key, KEY_SPECIALS));
        line.push('=');
        line.push_str(&value.to_string());
    }

    line.push(' ');
    line.push_str(&nanos.to_string());
    Ok(line)
}

const KEY_SPECIALS: &[char] = &[',', '=', ' '];

fn escape(raw: &str, specials: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if specials.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
