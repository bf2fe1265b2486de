//! Live-broadcast wire message.
//!
//! Every connected subscriber receives one JSON object per [`Reading`]:
//!
//! ```json
//! {
//!   "sensor_type": "dht22",
//!   "fields": { "temperature": 21.5, "humidity": 48.0 },
//!   "timestamp": "2024-01-01T00:00:00.000000+00:00"
//! }
//! ```
//!
//! Field names are lowercased on the wire. The timestamp is RFC 3339 with
//! microsecond precision and an explicit `+00:00` offset.

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::reading::Reading;

/// JSON message pushed to subscribers for each reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingBroadcast {
    /// Lowercase source kind of the sensor.
    pub sensor_type: String,
    /// Field values keyed by lowercase field name.
    pub fields: BTreeMap<String, f64>,
    /// Observation time of the reading.
    pub timestamp: String,
}

impl ReadingBroadcast {
    /// Serialize the message to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&Reading> for ReadingBroadcast {
    fn from(reading: &Reading) -> Self {
        // Two internal names that collide after lowercasing keep the
        // later one in key order.
        let fields = reading
            .fields()
            .iter()
            .map(|(name, value)| (name.to_lowercase(), *value))
            .collect();

        Self {
            sensor_type: reading.source_kind().to_owned(),
            fields,
            timestamp: reading
                .observed_at()
                .to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}
