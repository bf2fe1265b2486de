//! Aggregation loop, subscriber registry, and delivery sinks for SensorHub.
//!
//! This crate owns the poll-and-deliver cycle: every interval it reads all
//! sensors concurrently, then writes each reading to the time-series store
//! and broadcasts it to live subscribers, isolating every failure to the
//! sensor, reading, or subscriber it belongs to.
//!
//! # Modules
//!
//! - [`aggregator`] -- The [`Aggregator`] loop and its cycle reports.
//! - [`config`] -- Configuration loading from `sensorhub-config.yaml` into
//!   strongly-typed structs.
//! - [`registry`] -- [`SubscriberRegistry`], the shared set of live
//!   subscribers.
//! - [`sensor`] -- The [`Sensor`] capability and its error types.
//! - [`sink`] -- Store and broadcast sinks, and the [`PointStore`] trait.
//!
//! [`Aggregator`]: aggregator::Aggregator
//! [`SubscriberRegistry`]: registry::SubscriberRegistry
//! [`Sensor`]: sensor::Sensor
//! [`PointStore`]: sink::PointStore

pub mod aggregator;
pub mod config;
pub mod registry;
pub mod sensor;
pub mod sink;

pub use aggregator::{Aggregator, CycleReport, LoopPhase, LoopTimings, RunSummary};
pub use config::{ConfigError, HubConfig};
pub use registry::{Subscriber, SubscriberId, SubscriberRegistry};
pub use sensor::{Sensor, SensorError, SensorInitError};
pub use sink::{BroadcastSink, DataPoint, DisabledStore, PointStore, StoreError, StoreSink};
