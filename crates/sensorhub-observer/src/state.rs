//! Shared state for the HTTP and `WebSocket` handlers.

use std::path::PathBuf;

use sensorhub_core::config::ServerConfig;
use sensorhub_core::SubscriberRegistry;

/// State shared by every request handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Live subscribers; the aggregation loop holds a handle to the same set.
    pub registry: SubscriberRegistry,
    /// Channel capacity given to each new subscriber.
    pub subscriber_buffer: usize,
    /// Directory holding `index.html` and other dashboard assets.
    pub static_dir: PathBuf,
}

impl AppState {
    /// Build handler state over a shared registry.
    pub fn new(registry: SubscriberRegistry, config: &ServerConfig) -> Self {
        Self {
            registry,
            subscriber_buffer: config.subscriber_buffer,
            static_dir: config.static_dir.clone(),
        }
    }
}
