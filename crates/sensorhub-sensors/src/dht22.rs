//! DHT22 temperature/humidity sensor on a GPIO pin.
//!
//! The single-wire protocol is timing sensitive and regularly misses a
//! sample; a missed sample is reported as "not ready" (`Ok(None)`), not as
//! an error.
//!
//! A frame is 40 bits sent MSB first: humidity (16 bits, tenths of a
//! percent), temperature (15 bits of tenths of a degree plus a sign bit),
//! then an 8-bit checksum of the first four bytes. Each bit is a ~50µs low
//! followed by a high pulse whose length carries the value.

use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use sensorhub_core::config::Dht22Config;
use sensorhub_core::sensor::{reading_now, Sensor, SensorError, SensorInitError};
use sensorhub_types::Reading;
use tracing::{debug, warn};

use crate::simulated::{self, Walk};

/// Source kind for DHT22 readings.
pub const KIND: &str = "dht22";

/// Pins the DHT22 may be wired to.
pub const SUPPORTED_PINS: [&str; 4] = ["GPIO4", "GPIO17", "GPIO27", "GPIO22"];

const DEFAULT_PIN: &str = "GPIO4";

/// Level durations in a complete capture: 3 response levels, then a low
/// and a high per data bit.
pub const MIN_TRANSITIONS: usize = 83;

const FRAME_BITS: usize = 40;

/// High pulses longer than this are a `1`.
const ONE_THRESHOLD: Duration = Duration::from_micros(50);

const START_RELEASE: Duration = Duration::from_micros(30);
const RESPONSE_LEVEL: Duration = Duration::from_micros(80);
const BIT_LOW: Duration = Duration::from_micros(50);
const ZERO_HIGH: Duration = Duration::from_micros(27);
const ONE_HIGH: Duration = Duration::from_micros(70);

/// Recover the five frame bytes from captured level durations.
///
/// Index 4 holds the first bit's high pulse; every second entry after it
/// holds the next one.
///
/// # Errors
///
/// Returns [`SensorError::Hardware`] if fewer than [`MIN_TRANSITIONS`]
/// levels were captured.
pub fn decode_transitions(transitions: &[Duration]) -> Result<[u8; 5], SensorError> {
    if transitions.len() < MIN_TRANSITIONS {
        return Err(SensorError::hardware(
            KIND,
            format!(
                "insufficient data: got {} transitions, need {MIN_TRANSITIONS}",
                transitions.len()
            ),
        ));
    }

    let bits: Vec<bool> = transitions
        .iter()
        .skip(4)
        .step_by(2)
        .take(FRAME_BITS)
        .map(|high| *high > ONE_THRESHOLD)
        .collect();

    let mut frame = [0_u8; 5];
    for (byte, chunk) in frame.iter_mut().zip(bits.chunks(8)) {
        *byte = chunk
            .iter()
            .fold(0_u8, |acc, bit| acc.wrapping_shl(1) | u8::from(*bit));
    }
    Ok(frame)
}

/// Check a frame's checksum and convert it to `(temperature °C, humidity %)`.
///
/// # Errors
///
/// Returns [`SensorError::Hardware`] on a checksum mismatch.
pub fn decode_frame(frame: [u8; 5]) -> Result<(f64, f64), SensorError> {
    let [h_hi, h_lo, t_hi, t_lo, checksum] = frame;
    let sum = checksum_of(h_hi, h_lo, t_hi, t_lo);
    if sum != checksum {
        return Err(SensorError::hardware(
            KIND,
            format!("checksum mismatch: expected {checksum}, got {sum}"),
        ));
    }

    let humidity = f64::from(u16::from_be_bytes([h_hi, h_lo])) / 10.0;
    let magnitude = f64::from(u16::from_be_bytes([t_hi & 0x7F, t_lo])) / 10.0;
    let temperature = if t_hi & 0x80 == 0 { magnitude } else { -magnitude };
    Ok((temperature, humidity))
}

const fn checksum_of(h_hi: u8, h_lo: u8, t_hi: u8, t_lo: u8) -> u8 {
    h_hi.wrapping_add(h_lo).wrapping_add(t_hi).wrapping_add(t_lo)
}

/// Build the frame the device would send for these values.
fn encode_frame(temperature: f64, humidity: f64) -> [u8; 5] {
    let [h_hi, h_lo] = tenths(humidity).to_be_bytes();
    let [t_hi, t_lo] = tenths(temperature.abs()).to_be_bytes();
    let t_hi = if temperature < 0.0 { t_hi | 0x80 } else { t_hi };
    [h_hi, h_lo, t_hi, t_lo, checksum_of(h_hi, h_lo, t_hi, t_lo)]
}

/// Clamped to the 15 bits the frame carries.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn tenths(value: f64) -> u16 {
    (value * 10.0).round().clamp(0.0, f64::from(0x7FFF_u16)) as u16
}

/// Level durations of a clean capture of `frame`.
fn frame_to_transitions(frame: [u8; 5]) -> Vec<Duration> {
    let mut transitions = vec![START_RELEASE, RESPONSE_LEVEL, RESPONSE_LEVEL];
    for byte in frame {
        for shift in (0..8_u32).rev() {
            let one = byte.wrapping_shr(shift) & 1 == 1;
            transitions.push(BIT_LOW);
            transitions.push(if one { ONE_HIGH } else { ZERO_HIGH });
        }
    }
    transitions
}

/// DHT22 driver.
#[derive(Debug)]
pub struct Dht22 {
    pin: String,
    miss_rate: f64,
    rng: StdRng,
    temperature: Walk,
    humidity: Walk,
}

impl Dht22 {
    /// Open the sensor on the configured pin.
    ///
    /// An unknown pin name falls back to `GPIO4` with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SensorInitError::InvalidSetting`] if `miss_rate` is not in
    /// `[0, 1]`.
    pub fn new(config: &Dht22Config, seed: Option<u64>) -> Result<Self, SensorInitError> {
        if !(0.0..=1.0).contains(&config.miss_rate) {
            return Err(SensorInitError::InvalidSetting {
                kind: KIND.to_owned(),
                setting: String::from("miss_rate"),
                reason: format!("{} is outside [0, 1]", config.miss_rate),
            });
        }

        let requested = config.pin.trim().to_uppercase();
        let pin = if SUPPORTED_PINS.contains(&requested.as_str()) {
            requested
        } else {
            warn!(pin = %config.pin, fallback = DEFAULT_PIN, "Unknown DHT22 pin, using default");
            DEFAULT_PIN.to_owned()
        };

        Ok(Self {
            pin,
            miss_rate: config.miss_rate,
            rng: simulated::rng(seed),
            temperature: Walk::new(22.0, -40.0, 80.0, 0.3),
            humidity: Walk::new(45.0, 0.0, 100.0, 1.0),
        })
    }

    /// The pin in use.
    pub fn pin(&self) -> &str {
        &self.pin
    }
}

impl Sensor for Dht22 {
    fn name(&self) -> &str {
        "DHT22"
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        if self.rng.random_bool(self.miss_rate) {
            debug!(pin = %self.pin, "DHT22 not ready");
            return Ok(None);
        }

        let frame = encode_frame(
            self.temperature.next(&mut self.rng),
            self.humidity.next(&mut self.rng),
        );
        let capture = frame_to_transitions(frame);
        let (temperature, humidity) = decode_frame(decode_transitions(&capture)?)?;
        reading_now(KIND, [("temperature", temperature), ("humidity", humidity)]).map(Some)
    }

    fn close(&mut self) {
        debug!(pin = %self.pin, "DHT22 released");
    }
}
