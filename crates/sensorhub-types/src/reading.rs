//! The [`Reading`] value produced by one successful poll of one sensor.
//!
//! A reading is only ever constructed from values a sensor affirmatively
//! produced. The constructors enforce the invariants the rest of the
//! workspace relies on: the source kind is lowercase, the field map is
//! non-empty, and every value is finite (the time-series store rejects
//! `NaN` and infinities).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Errors raised when a sensor hands back values that cannot form a reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadingError {
    /// The source kind was empty.
    #[error("reading has an empty source kind")]
    EmptyKind,

    /// The sensor produced no fields.
    #[error("reading from {kind} has no fields")]
    NoFields {
        /// Source kind of the offending sensor.
        kind: String,
    },

    /// A field value was `NaN` or infinite.
    #[error("reading from {kind} has non-finite value for field {field}")]
    NonFinite {
        /// Source kind of the offending sensor.
        kind: String,
        /// Name of the offending field.
        field: String,
    },
}

/// One validated sample from one sensor at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    source_kind: String,
    fields: BTreeMap<String, f64>,
    observed_at: DateTime<Utc>,
}

impl Reading {
    /// Build a reading with an explicit observation time.
    ///
    /// `source_kind` is lowercased. Field names are kept as given; the wire
    /// format lowercases them separately.
    pub fn new(
        source_kind: &str,
        fields: BTreeMap<String, f64>,
        observed_at: DateTime<Utc>,
    ) -> Result<Self, ReadingError> {
        let source_kind = source_kind.trim().to_lowercase();
        if source_kind.is_empty() {
            return Err(ReadingError::EmptyKind);
        }
        if fields.is_empty() {
            return Err(ReadingError::NoFields { kind: source_kind });
        }
        if let Some((field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ReadingError::NonFinite {
                field: field.clone(),
                kind: source_kind,
            });
        }
        Ok(Self {
            source_kind,
            fields,
            observed_at,
        })
    }

    /// Build a reading stamped with the current UTC time.
    ///
    /// Drivers call this at the moment the hardware returned valid values,
    /// not at the start of the poll cycle.
    pub fn observed_now<K, I>(source_kind: &str, fields: I) -> Result<Self, ReadingError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f64)>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::new(source_kind, fields, Utc::now())
    }

    /// Lowercase identifier of the sensor type (e.g. `dht22`).
    pub fn source_kind(&self) -> &str {
        &self.source_kind
    }

    /// Measurement name to value.
    pub const fn fields(&self) -> &BTreeMap<String, f64> {
        &self.fields
    }

    /// Value of a single field, if present.
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).copied()
    }

    /// UTC instant at which the sensor produced the values.
    pub const fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_lowercased() {
        let reading = Reading::observed_now("DHT22", [("temperature", 21.5)]).unwrap();
        assert_eq!(reading.source_kind(), "dht22");
        assert_eq!(reading.field("temperature"), Some(21.5));
    }

    #[test]
    fn empty_fields_rejected() {
        let err = Reading::new("gy32", BTreeMap::new(), Utc::now()).unwrap_err();
        assert_eq!(
            err,
            ReadingError::NoFields {
                kind: String::from("gy32")
            }
        );
    }

    #[test]
    fn blank_kind_rejected() {
        let err = Reading::observed_now("  ", [("lux", 10.0)]).unwrap_err();
        assert_eq!(err, ReadingError::EmptyKind);
    }

    #[test]
    fn non_finite_rejected() {
        let err = Reading::observed_now("bmp280", [("pressure", f64::NAN)]).unwrap_err();
        assert!(matches!(err, ReadingError::NonFinite { ref field, .. } if field == "pressure"));

        let err = Reading::observed_now("bmp280", [("altitude", f64::INFINITY)]).unwrap_err();
        assert!(matches!(err, ReadingError::NonFinite { .. }));
    }

    #[test]
    fn observed_at_is_preserved() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut fields = BTreeMap::new();
        fields.insert(String::from("lux"), 120.0);
        let reading = Reading::new("gy32", fields, at).unwrap();
        assert_eq!(reading.observed_at(), at);
    }
}
