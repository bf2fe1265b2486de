//! Sensor capability trait and its error types.
//!
//! The aggregation loop polls every source through the [`Sensor`] trait
//! and never names a concrete driver. Drivers live in `sensorhub-sensors`;
//! tests supply their own implementations.
//!
//! [`Sensor::read`] is a blocking call. The loop runs it on the blocking
//! thread pool and bounds it with a timeout, so a driver does not need to
//! enforce one itself.

use sensorhub_types::{Reading, ReadingError};

/// Errors from a single poll of a single sensor.
///
/// Always recovered by the loop: the sensor contributes no reading this
/// cycle and is polled again next cycle.
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    /// The device reported a failure (bus error, checksum mismatch, ...).
    #[error("{kind}: hardware error: {message}")]
    Hardware {
        /// Source kind of the sensor.
        kind: String,
        /// Description of the failure.
        message: String,
    },

    /// The read did not complete within the configured bound.
    #[error("{kind}: read timed out after {timeout_ms}ms")]
    Timeout {
        /// Source kind of the sensor.
        kind: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },

    /// A previous read of this sensor is still in flight.
    #[error("{kind}: previous read still in progress")]
    Busy {
        /// Source kind of the sensor.
        kind: String,
    },

    /// The driver panicked during the read.
    #[error("{kind}: read task failed: {message}")]
    Panicked {
        /// Source kind of the sensor.
        kind: String,
        /// Description from the task join error.
        message: String,
    },

    /// The driver produced values that do not form a valid reading.
    #[error("{kind}: invalid reading: {source}")]
    InvalidReading {
        /// Source kind of the sensor.
        kind: String,
        /// The underlying validation error.
        source: ReadingError,
    },
}

impl SensorError {
    /// Source kind of the sensor that failed.
    pub fn kind(&self) -> &str {
        match self {
            Self::Hardware { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Busy { kind }
            | Self::Panicked { kind, .. }
            | Self::InvalidReading { kind, .. } => kind,
        }
    }

    /// Convenience constructor for driver-side hardware failures.
    pub fn hardware(kind: &str, message: impl Into<String>) -> Self {
        Self::Hardware {
            kind: kind.to_owned(),
            message: message.into(),
        }
    }
}

/// Errors raised while bringing a sensor up at startup.
///
/// A sensor that fails to initialize is excluded for the lifetime of the
/// process; the loop runs with whatever subset came up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorInitError {
    /// The configured I2C address is not one the device answers on.
    #[error("{kind}: unsupported I2C address {address:#04x}")]
    InvalidAddress {
        /// Source kind of the sensor.
        kind: String,
        /// The configured address.
        address: u8,
    },

    /// The configured setting is outside its valid range.
    #[error("{kind}: invalid setting {setting}: {reason}")]
    InvalidSetting {
        /// Source kind of the sensor.
        kind: String,
        /// Name of the setting.
        setting: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The device could not be opened.
    #[error("{kind}: device unavailable: {message}")]
    Unavailable {
        /// Source kind of the sensor.
        kind: String,
        /// Description of the failure.
        message: String,
    },
}

/// A pollable source of readings.
///
/// Implementations must be [`Send`] so the loop can move reads onto the
/// blocking thread pool.
pub trait Sensor: Send {
    /// Human-readable name for logs (e.g. `DHT22`).
    fn name(&self) -> &str;

    /// Lowercase source kind stamped on readings and errors (e.g. `dht22`).
    fn kind(&self) -> &str;

    /// Poll the device once.
    ///
    /// Returns `Ok(None)` when the device has nothing valid yet. This is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError`] if the device fails.
    fn read(&mut self) -> Result<Option<Reading>, SensorError>;

    /// Release device handles. Called once when the loop shuts down.
    fn close(&mut self) {}
}

/// Build a reading stamped now, mapping validation failures into
/// [`SensorError::InvalidReading`].
///
/// # Errors
///
/// Returns [`SensorError::InvalidReading`] if the fields are empty or
/// contain a non-finite value.
pub fn reading_now<'a, I>(kind: &str, fields: I) -> Result<Reading, SensorError>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    Reading::observed_now(kind, fields).map_err(|source| SensorError::InvalidReading {
        kind: kind.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_reported_for_every_variant() {
        let errors = [
            SensorError::hardware("dht22", "checksum"),
            SensorError::Timeout {
                kind: String::from("dht22"),
                timeout_ms: 10,
            },
            SensorError::Busy {
                kind: String::from("dht22"),
            },
        ];
        for err in &errors {
            assert_eq!(err.kind(), "dht22");
        }
    }

    #[test]
    fn reading_now_wraps_validation_errors() {
        let err = reading_now("gy32", [("lux", f64::NAN)]);
        assert!(matches!(err, Err(SensorError::InvalidReading { ref kind, .. }) if kind == "gy32"));
    }

    #[test]
    fn init_error_formats_address_as_hex() {
        let err = SensorInitError::InvalidAddress {
            kind: String::from("bmp280"),
            address: 0x10,
        };
        assert_eq!(err.to_string(), "bmp280: unsupported I2C address 0x10");
    }
}
