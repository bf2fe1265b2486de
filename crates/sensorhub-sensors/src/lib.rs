//! Sensor drivers for SensorHub.
//!
//! Each driver implements [`sensorhub_core::Sensor`]. [`init_sensors`]
//! opens every enabled driver from configuration; a driver that fails to
//! open is logged and left out, so the hub still runs with the rest.
//!
//! # Modules
//!
//! - [`dht22`] -- Temperature and humidity over a GPIO pin.
//! - [`bmp280`] -- Temperature, pressure, and derived altitude over I2C.
//! - [`gy32`] -- Ambient light (BH1750) over I2C.
//! - [`simulated`] -- Bounded random-walk values behind the drivers.

pub mod bmp280;
pub mod dht22;
pub mod gy32;
pub mod simulated;

use sensorhub_core::config::SensorsConfig;
use sensorhub_core::{Sensor, SensorInitError};
use tracing::{info, warn};

pub use bmp280::Bmp280;
pub use dht22::Dht22;
pub use gy32::Gy32;

/// Result of opening the configured drivers.
#[derive(Default)]
pub struct SensorSet {
    /// Drivers that opened successfully, in configuration order.
    pub active: Vec<Box<dyn Sensor>>,
    /// Drivers that failed to open.
    pub failed: Vec<SensorInitError>,
}

impl SensorSet {
    /// Names of the active drivers.
    pub fn names(&self) -> Vec<String> {
        self.active.iter().map(|s| s.name().to_owned()).collect()
    }
}

impl std::fmt::Debug for SensorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSet")
            .field("active", &self.names())
            .field("failed", &self.failed)
            .finish()
    }
}

/// Open every enabled driver.
///
/// With a configured seed, each driver gets its own derived seed so runs
/// are reproducible without the drivers sharing a value stream.
pub fn init_sensors(config: &SensorsConfig) -> SensorSet {
    let seed_for = |index: u64| config.seed.map(|s| s.wrapping_add(index));
    let mut set = SensorSet::default();

    if config.dht22.enabled {
        record(&mut set, Dht22::new(&config.dht22, seed_for(0)));
    }
    if config.bmp280.enabled {
        record(&mut set, Bmp280::new(&config.bmp280, seed_for(1)));
    }
    if config.gy32.enabled {
        record(&mut set, Gy32::new(&config.gy32, seed_for(2)));
    }

    if set.active.is_empty() {
        warn!("No sensors available; the hub will publish nothing");
    }
    set
}

fn record<S: Sensor + 'static>(set: &mut SensorSet, opened: Result<S, SensorInitError>) {
    match opened {
        Ok(sensor) => {
            info!(sensor = sensor.name(), kind = sensor.kind(), "Sensor initialized");
            set.active.push(Box::new(sensor));
        }
        Err(e) => {
            warn!(error = %e, "Sensor failed to initialize, skipping");
            set.failed.push(e);
        }
    }
}
