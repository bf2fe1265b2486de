//! SensorHub binary.
//!
//! Wires the sensor drivers, the InfluxDB store, the subscriber registry,
//! and the HTTP/WebSocket server around one aggregation loop, then runs
//! until `Ctrl-C` (or `SIGTERM` on Unix).
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `sensorhub-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Open the configured sensors
//! 4. Open the time-series store
//! 5. Create the subscriber registry
//! 6. Bind the server address
//! 7. Start the aggregation loop and the server
//! 8. Wait for a shutdown signal, cancel, and drain
//! 9. Log the run summary
//! 10. Stop the runtime, abandoning blocking reads still stuck after the
//!     shutdown grace

mod error;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sensorhub_core::{
    Aggregator, BroadcastSink, HubConfig, LoopTimings, StoreSink, SubscriberRegistry,
};
use sensorhub_observer::AppState;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "sensorhub-config.yaml";

/// Environment variable that overrides the configuration path.
const CONFIG_PATH_ENV: &str = "SENSORHUB_CONFIG";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the runtime cannot
/// start, the server cannot bind, or a background task dies.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging depends on it, so it comes first.
    let config_path = config_path(|key| std::env::var(key).ok());
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("sensorhub starting");
    if from_file {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        info!(path = %config_path.display(), "Config file not found, using defaults");
    }
    info!(
        interval_ms = config.poll.interval_ms,
        read_timeout_ms = config.poll.read_timeout_ms,
        store_timeout_ms = config.poll.store_timeout_ms,
        send_timeout_ms = config.poll.send_timeout_ms,
        "Poll settings"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(EngineError::from)?;
    let grace = config.poll.shutdown_grace();
    let result = runtime.block_on(run(config));
    stop_runtime(runtime, grace);
    result?;
    Ok(())
}

/// Shut the runtime down without waiting on blocking tasks past `grace`.
///
/// A sensor read wedged in the driver keeps its blocking thread alive;
/// dropping the runtime would join that thread and hang the process.
fn stop_runtime(runtime: Runtime, grace: Duration) {
    runtime.shutdown_timeout(grace);
}

/// Run the hub until a shutdown signal arrives.
async fn run(config: HubConfig) -> Result<(), EngineError> {
    // 3. Open sensors.
    let sensors = sensorhub_sensors::init_sensors(&config.sensors);
    info!(
        active = sensors.active.len(),
        failed = sensors.failed.len(),
        names = ?sensors.names(),
        "Sensors initialized"
    );

    // 4. Open the store.
    let store = sensorhub_store::open_store(&config.store).await;
    info!(store = store.name(), "Store ready");

    // 5. Subscriber registry, shared by the loop and the server.
    let registry = SubscriberRegistry::with_capacity(config.server.max_subscribers);
    if registry.capacity() == 0 {
        info!("Subscriber registry ready, no connection limit");
    } else {
        info!(capacity = registry.capacity(), "Subscriber registry ready");
    }

    // 6. Bind before starting the loop so a taken port fails fast.
    let listener = sensorhub_observer::server::bind(&config.server).await?;

    // 7. Start the loop and the server.
    let shutdown = CancellationToken::new();
    let aggregator = Aggregator::new(
        sensors.active,
        StoreSink::new(store, config.poll.store_timeout()),
        BroadcastSink::new(registry.clone(), config.poll.send_timeout()),
        LoopTimings::from(&config.poll),
    );
    let loop_handle = tokio::spawn(aggregator.run(shutdown.clone()));

    let state = AppState::new(registry, &config.server);
    let mut server_handle = tokio::spawn(sensorhub_observer::server::serve(
        listener,
        state,
        shutdown.clone(),
    ));

    // 8. Wait for a signal, or for the server to die on its own.
    let server_result = tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received");
            shutdown.cancel();
            (&mut server_handle).await
        }
        result = &mut server_handle => {
            warn!("Server stopped unexpectedly, shutting down");
            shutdown.cancel();
            result
        }
    };

    let summary = loop_handle.await.map_err(|e| EngineError::Task {
        message: format!("aggregation loop: {e}"),
    })?;

    // 9. Log the result.
    info!(
        cycles = summary.cycles,
        readings = summary.readings,
        abandoned_cycle = summary.abandoned_cycle,
        "sensorhub stopped"
    );

    server_result.map_err(|e| EngineError::Task {
        message: format!("server: {e}"),
    })??;
    Ok(())
}

/// Resolve the configuration path from the environment lookup.
fn config_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup(CONFIG_PATH_ENV)
        .filter(|p| !p.trim().is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// Returns the config and whether it came from the file.
fn load_config(path: &Path) -> Result<(HubConfig, bool), EngineError> {
    if path.exists() {
        Ok((HubConfig::from_file(path)?, true))
    } else {
        let mut config = HubConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok((config, false))
    }
}

/// Resolve on `Ctrl-C`, or `SIGTERM` on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
