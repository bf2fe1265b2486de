//! Time-series persistence for SensorHub.
//!
//! [`InfluxStore`] implements [`sensorhub_core::PointStore`] over the
//! InfluxDB v2 HTTP API. [`open_store`] picks it, or the no-op
//! [`DisabledStore`], from configuration.
//!
//! # Modules
//!
//! - [`influx`] -- HTTP write and health client.
//! - [`line_protocol`] -- Point encoding.

pub mod influx;
pub mod line_protocol;

use sensorhub_core::config::StoreConfig;
use sensorhub_core::{DisabledStore, PointStore};
use tracing::{info, warn};

pub use influx::{Health, InfluxStore};

/// Build the configured store, checking server health when there is one.
///
/// An unhealthy or unreachable server is logged but still used; writes are
/// attempted each cycle and fail individually until it comes back.
pub async fn open_store(config: &StoreConfig) -> Box<dyn PointStore> {
    if !config.is_configured() {
        warn!("InfluxDB org/bucket not configured, store writes disabled");
        return Box::new(DisabledStore);
    }

    let store = InfluxStore::new(config);
    match store.health().await {
        Ok(health) if health.is_pass() => info!(
            url = %config.url,
            bucket = %config.bucket,
            version = health.version.as_deref().unwrap_or("unknown"),
            "InfluxDB reachable"
        ),
        Ok(health) => warn!(url = %config.url, status = %health.status, "InfluxDB reports unhealthy"),
        Err(e) => warn!(url = %config.url, error = %e, "InfluxDB health check failed"),
    }
    Box::new(store)
}
