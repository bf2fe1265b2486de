//! Configuration loading and typed config structures for SensorHub.
//!
//! The canonical configuration lives in `sensorhub-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure, and
//! provides a loader that reads the file and applies environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `sensorhub-config.yaml`. Every field has a
/// default so an empty file (or no file) yields a runnable setup.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HubConfig {
    /// Poll cadence and per-operation timeouts.
    #[serde(default)]
    pub poll: PollConfig,

    /// Time-series store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Sensor pin/address assignments.
    #[serde(default)]
    pub sensors: SensorsConfig,

    /// HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HubConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `INFLUX_URL`, `INFLUX_TOKEN`, `INFLUX_ORG`, `INFLUX_BUCKET`
    ///   override the `store` section
    /// - `DHT_PIN` overrides `sensors.dht22.pin`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_env(yaml)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse configuration from a YAML string without consulting the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_env(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Override values from an environment lookup function.
    ///
    /// Takes the lookup as a parameter so callers can supply a fixed map
    /// instead of the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("INFLUX_URL") {
            self.store.url = val;
        }
        if let Some(val) = lookup("INFLUX_TOKEN") {
            self.store.token = val;
        }
        if let Some(val) = lookup("INFLUX_ORG") {
            self.store.org = val;
        }
        if let Some(val) = lookup("INFLUX_BUCKET") {
            self.store.bucket = val;
        }
        if let Some(val) = lookup("DHT_PIN") {
            self.sensors.dht22.pin = val;
        }
    }
}

/// Poll cadence and timeout bounds for every suspension point of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PollConfig {
    /// Sleep between the end of one cycle and the start of the next.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound on a single sensor read.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Upper bound on a single store write.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Upper bound on delivering one message to one subscriber.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// How long an in-flight cycle may keep running after shutdown is
    /// requested before it is abandoned.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl PollConfig {
    /// Poll interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Read timeout as a [`Duration`].
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Store write timeout as a [`Duration`].
    pub const fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Subscriber send timeout as a [`Duration`].
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Shutdown grace period as a [`Duration`].
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            store_timeout_ms: default_store_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// InfluxDB v2 connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Base URL of the InfluxDB server.
    #[serde(default = "default_store_url")]
    pub url: String,

    /// API token.
    #[serde(default)]
    pub token: String,

    /// Organization name.
    #[serde(default)]
    pub org: String,

    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
}

impl StoreConfig {
    /// Whether enough is configured to attempt writes.
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty() && !self.org.is_empty() && !self.bucket.is_empty()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
        }
    }
}

/// Sensor assignments. Each sensor can be disabled individually.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SensorsConfig {
    /// Seed for the simulated value sources. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,

    /// DHT22 temperature/humidity sensor.
    #[serde(default)]
    pub dht22: Dht22Config,

    /// BMP280 barometric sensor.
    #[serde(default)]
    pub bmp280: Bmp280Config,

    /// GY-32 (BH1750) light sensor.
    #[serde(default)]
    pub gy32: Gy32Config,
}

/// DHT22 settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Dht22Config {
    /// Whether to initialize this sensor.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// GPIO pin name (e.g. `GPIO4`).
    #[serde(default = "default_dht_pin")]
    pub pin: String,

    /// Fraction of polls on which the sensor is not ready (0.0 to 1.0).
    #[serde(default = "default_dht_miss_rate")]
    pub miss_rate: f64,
}

impl Default for Dht22Config {
    fn default() -> Self {
        Self {
            enabled: true,
            pin: default_dht_pin(),
            miss_rate: default_dht_miss_rate(),
        }
    }
}

/// BMP280 settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bmp280Config {
    /// Whether to initialize this sensor.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// I2C address (`0x76` or `0x77`).
    #[serde(default = "default_bmp280_address")]
    pub address: u8,

    /// Sea-level pressure in hPa used for the altitude estimate.
    #[serde(default = "default_sea_level_hpa")]
    pub sea_level_hpa: f64,
}

impl Default for Bmp280Config {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_bmp280_address(),
            sea_level_hpa: default_sea_level_hpa(),
        }
    }
}

/// GY-32 (BH1750) settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Gy32Config {
    /// Whether to initialize this sensor.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// I2C address (`0x23` or `0x5C`).
    #[serde(default = "default_gy32_address")]
    pub address: u8,
}

impl Default for Gy32Config {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_gy32_address(),
        }
    }
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding `index.html` and other dashboard assets.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Maximum concurrent subscribers (0 = unlimited).
    #[serde(default)]
    pub max_subscribers: usize,

    /// Messages buffered per subscriber before sends start to wait.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            max_subscribers: 0,
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_interval_ms() -> u64 {
    2_000
}

const fn default_read_timeout_ms() -> u64 {
    1_000
}

const fn default_store_timeout_ms() -> u64 {
    2_000
}

const fn default_send_timeout_ms() -> u64 {
    1_000
}

const fn default_shutdown_grace_ms() -> u64 {
    3_000
}

fn default_store_url() -> String {
    "http://localhost:8086".to_owned()
}

fn default_dht_pin() -> String {
    "GPIO4".to_owned()
}

const fn default_dht_miss_rate() -> f64 {
    0.05
}

const fn default_bmp280_address() -> u8 {
    0x76
}

const fn default_sea_level_hpa() -> f64 {
    1013.25
}

const fn default_gy32_address() -> u8 {
    0x23
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8080
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./static")
}

const fn default_subscriber_buffer() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}
