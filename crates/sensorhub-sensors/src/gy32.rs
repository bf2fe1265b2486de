//! GY-32 breakout (BH1750 ambient light sensor) on I2C.

use rand::rngs::StdRng;
use sensorhub_core::config::Gy32Config;
use sensorhub_core::sensor::{reading_now, Sensor, SensorError, SensorInitError};
use sensorhub_types::Reading;
use tracing::debug;

use crate::simulated::{self, Walk};

/// Source kind for GY-32 readings.
pub const KIND: &str = "gy32";

/// Addresses the BH1750 answers on (ADDR low / high).
pub const ADDRESSES: [u8; 2] = [0x23, 0x5C];

/// GY-32 driver.
#[derive(Debug)]
pub struct Gy32 {
    address: u8,
    rng: StdRng,
    lux: Walk,
}

impl Gy32 {
    /// Open the sensor at the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`SensorInitError::InvalidAddress`] for an address the chip
    /// does not use.
    pub fn new(config: &Gy32Config, seed: Option<u64>) -> Result<Self, SensorInitError> {
        if !ADDRESSES.contains(&config.address) {
            return Err(SensorInitError::InvalidAddress {
                kind: KIND.to_owned(),
                address: config.address,
            });
        }
        Ok(Self {
            address: config.address,
            rng: simulated::rng(seed),
            lux: Walk::new(300.0, 0.0, 65_535.0, 25.0),
        })
    }

    /// The I2C address in use.
    pub const fn address(&self) -> u8 {
        self.address
    }
}

impl Sensor for Gy32 {
    fn name(&self) -> &str {
        "GY32"
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        let lux = simulated::quantize(self.lux.next(&mut self.rng), 0.1);
        reading_now(KIND, [("lux", lux)]).map(Some)
    }

    fn close(&mut self) {
        debug!(address = self.address, "GY32 released");
    }
}
