//! Shared type definitions for SensorHub.
//!
//! # Modules
//!
//! - [`reading`] -- The validated [`Reading`] produced by a sensor poll
//! - [`broadcast`] -- The JSON message pushed to live subscribers

pub mod broadcast;
pub mod reading;

pub use broadcast::ReadingBroadcast;
pub use reading::{Reading, ReadingError};
