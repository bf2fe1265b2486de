//! BMP280 barometric pressure/temperature sensor on I2C.
//!
//! Altitude is derived from pressure with the international barometric
//! formula against a configurable sea-level reference.

use rand::rngs::StdRng;
use sensorhub_core::config::Bmp280Config;
use sensorhub_core::sensor::{reading_now, Sensor, SensorError, SensorInitError};
use sensorhub_types::Reading;
use tracing::debug;

use crate::simulated::{self, Walk};

/// Source kind for BMP280 readings.
pub const KIND: &str = "bmp280";

/// Addresses the BMP280 answers on (SDO low / high).
pub const ADDRESSES: [u8; 2] = [0x76, 0x77];

/// BMP280 driver.
#[derive(Debug)]
pub struct Bmp280 {
    address: u8,
    sea_level_hpa: f64,
    rng: StdRng,
    temperature: Walk,
    pressure: Walk,
}

impl Bmp280 {
    /// Open the sensor at the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`SensorInitError::InvalidAddress`] for an address the chip
    /// does not use, or [`SensorInitError::InvalidSetting`] for a
    /// non-positive sea-level pressure.
    pub fn new(config: &Bmp280Config, seed: Option<u64>) -> Result<Self, SensorInitError> {
        if !ADDRESSES.contains(&config.address) {
            return Err(SensorInitError::InvalidAddress {
                kind: KIND.to_owned(),
                address: config.address,
            });
        }
        if !(config.sea_level_hpa.is_finite() && config.sea_level_hpa > 0.0) {
            return Err(SensorInitError::InvalidSetting {
                kind: KIND.to_owned(),
                setting: String::from("sea_level_hpa"),
                reason: format!("{} is not a positive pressure", config.sea_level_hpa),
            });
        }

        Ok(Self {
            address: config.address,
            sea_level_hpa: config.sea_level_hpa,
            rng: simulated::rng(seed),
            temperature: Walk::new(21.0, -40.0, 85.0, 0.2),
            pressure: Walk::new(1013.0, 300.0, 1100.0, 0.5),
        })
    }

    /// The I2C address in use.
    pub const fn address(&self) -> u8 {
        self.address
    }
}

/// Altitude in metres for a pressure reading, given sea-level pressure.
pub fn altitude_m(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44_330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903))
}

impl Sensor for Bmp280 {
    fn name(&self) -> &str {
        "BMP280"
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        let temperature = simulated::quantize(self.temperature.next(&mut self.rng), 0.01);
        let pressure = simulated::quantize(self.pressure.next(&mut self.rng), 0.01);
        let altitude = altitude_m(pressure, self.sea_level_hpa);
        reading_now(
            KIND,
            [
                ("temperature", temperature),
                ("pressure", pressure),
                ("altitude", altitude),
            ],
        )
        .map(Some)
    }

    fn close(&mut self) {
        debug!(address = self.address, "BMP280 released");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(address: u8) -> Bmp280Config {
        Bmp280Config {
            enabled: true,
            address,
            sea_level_hpa: 1013.25,
        }
    }

    #[test]
    fn reads_three_fields() {
        let mut sensor = Bmp280::new(&config(0x76), Some(9)).unwrap();
        let reading = sensor.read().unwrap().unwrap();
        let mut names: Vec<&str> = reading.fields().keys().map(String::as_str).collect();
        names.sort_unstable();
        assert_eq!(names, vec!["altitude", "pressure", "temperature"]);
        let pressure = reading.field("pressure").unwrap();
        assert!((300.0..=1100.0).contains(&pressure));
    }

    #[test]
    fn altitude_is_zero_at_sea_level() {
        assert!(altitude_m(1013.25, 1013.25).abs() < 1e-9);
        assert!(altitude_m(900.0, 1013.25) > 900.0);
        assert!(altitude_m(1030.0, 1013.25) < 0.0);
    }

    #[test]
    fn wrong_address_is_rejected() {
        let err = Bmp280::new(&config(0x23), None).unwrap_err();
        assert_eq!(
            err,
            SensorInitError::InvalidAddress {
                kind: String::from("bmp280"),
                address: 0x23
            }
        );
        assert_eq!(Bmp280::new(&config(0x77), None).unwrap().address(), 0x77);
    }

    #[test]
    fn non_positive_sea_level_is_rejected() {
        let cfg = Bmp280Config {
            sea_level_hpa: 0.0,
            ..config(0x76)
        };
        assert!(matches!(
            Bmp280::new(&cfg, None),
            Err(SensorInitError::InvalidSetting { .. })
        ));
    }
}
