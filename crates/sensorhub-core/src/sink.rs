//! Delivery sinks: durable store and live broadcast.
//!
//! Both sinks take a [`Reading`] and swallow their own failures after
//! logging them. The aggregation loop only uses the returned values for
//! its cycle report.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use sensorhub_types::{Reading, ReadingBroadcast};
use tracing::{debug, warn};

use crate::registry::{SubscriberRegistry, WireMessage};

/// Measurement name every reading is written under.
pub const MEASUREMENT: &str = "sensor_data";

/// Tag key carrying the source kind.
pub const SENSOR_TAG: &str = "sensor";

/// Store-side projection of a [`Reading`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Measurement name.
    pub measurement: String,
    /// Tag set.
    pub tags: BTreeMap<String, String>,
    /// Float fields.
    pub fields: BTreeMap<String, f64>,
    /// Observation time.
    pub timestamp: DateTime<Utc>,
}

impl From<&Reading> for DataPoint {
    fn from(reading: &Reading) -> Self {
        Self {
            measurement: MEASUREMENT.to_owned(),
            tags: BTreeMap::from([(SENSOR_TAG.to_owned(), reading.source_kind().to_owned())]),
            fields: reading.fields().clone(),
            timestamp: reading.observed_at(),
        }
    }
}

/// Errors a [`PointStore`] implementation reports for one write.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The request could not be sent or the connection failed.
    #[error("store request failed: {0}")]
    Request(String),

    /// The store answered with a non-success status.
    #[error("store rejected write ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        body: String,
    },

    /// The point could not be encoded.
    #[error("point encoding failed: {0}")]
    Encoding(String),
}

/// A durable time-series store.
///
/// Returns a boxed future so the loop can hold the store as a trait object.
pub trait PointStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Persist one point.
    fn write<'a>(&'a self, point: &'a DataPoint) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Store used when no backend is configured. Every write is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStore;

impl PointStore for DisabledStore {
    fn name(&self) -> &str {
        "disabled"
    }

    fn write<'a>(&'a self, point: &'a DataPoint) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            debug!(measurement = %point.measurement, "Store disabled, skipping write");
            Ok(())
        })
    }
}

/// Durable persistence of one reading failed.
#[derive(Debug, thiserror::Error)]
pub enum StoreWriteError {
    /// The store reported an error.
    #[error("{kind}: store write failed: {source}")]
    Failed {
        /// Source kind of the reading.
        kind: String,
        /// The store's error.
        source: StoreError,
    },

    /// The write did not complete within the configured bound.
    #[error("{kind}: store write timed out after {timeout_ms}ms")]
    TimedOut {
        /// Source kind of the reading.
        kind: String,
        /// The bound that was exceeded.
        timeout_ms: u64,
    },
}

/// Writes readings to a [`PointStore`] with a per-write timeout.
pub struct StoreSink {
    store: Box<dyn PointStore>,
    timeout: Duration,
}

impl StoreSink {
    /// Wrap a store with a per-write timeout.
    pub fn new(store: Box<dyn PointStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Name of the underlying store.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Persist one reading. Failures are logged and returned; the caller
    /// only counts them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreWriteError`] if the store fails or times out.
    pub async fn write(&self, reading: &Reading) -> Result<(), StoreWriteError> {
        let point = DataPoint::from(reading);
        let kind = reading.source_kind();

        let result = match tokio::time::timeout(self.timeout, self.store.write(&point)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(StoreWriteError::Failed {
                kind: kind.to_owned(),
                source,
            }),
            Err(_) => Err(StoreWriteError::TimedOut {
                kind: kind.to_owned(),
                timeout_ms: millis(self.timeout),
            }),
        };

        match &result {
            Ok(()) => debug!(sensor = kind, store = self.store.name(), "Reading persisted"),
            Err(e) => warn!(error = %e, "Store write dropped"),
        }
        result
    }
}

impl core::fmt::Debug for StoreSink {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreSink")
            .field("store", &self.store.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of broadcasting one reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers that accepted the message.
    pub delivered: usize,
    /// Subscribers removed after a failed delivery.
    pub dropped: usize,
}

/// Pushes readings to every registered subscriber.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    registry: SubscriberRegistry,
    send_timeout: Duration,
}

impl BroadcastSink {
    /// Create a sink over the shared registry.
    pub const fn new(registry: SubscriberRegistry, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Deliver one reading to every subscriber in a fresh snapshot.
    ///
    /// Subscribers whose delivery fails are removed from the live registry.
    pub async fn publish(&self, reading: &Reading) -> BroadcastOutcome {
        let message: WireMessage = match ReadingBroadcast::from(reading).to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(sensor = reading.source_kind(), error = %e, "Failed to serialize reading");
                return BroadcastOutcome::default();
            }
        };

        let snapshot = self.registry.snapshot().await;
        if snapshot.is_empty() {
            return BroadcastOutcome::default();
        }

        let sends = snapshot
            .iter()
            .map(|subscriber| subscriber.deliver(Arc::clone(&message), self.send_timeout));
        let results = join_all(sends).await;

        let mut outcome = BroadcastOutcome::default();
        for result in results {
            match result {
                Ok(()) => outcome.delivered = outcome.delivered.saturating_add(1),
                Err(e) => {
                    debug!(error = %e, "Dropping subscriber after failed delivery");
                    // A concurrent publish may already have reaped it.
                    if self.registry.remove(e.id()).await {
                        outcome.dropped = outcome.dropped.saturating_add(1);
                    }
                }
            }
        }
        outcome
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
