//! The aggregation loop.
//!
//! [`Aggregator`] owns the active sensors and the store sink, and shares the
//! subscriber registry with the service shell through its broadcast sink.
//! Each cycle runs in two phases:
//!
//! 1. **Polling** -- every sensor is read concurrently on the blocking
//!    thread pool, each bounded by the read timeout.
//! 2. **Delivering** -- every reading is written to the store and broadcast
//!    to subscribers. All readings are delivered concurrently, and for each
//!    reading the two sinks run concurrently.
//!
//! Failures in either phase are isolated to the sensor, reading, or
//! subscriber they belong to. Cycles run back to back with a fixed sleep
//! between them until the cancellation token fires.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use futures::future::join_all;
use sensorhub_types::Reading;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::sensor::{Sensor, SensorError};
use crate::sink::{BroadcastSink, StoreSink};

/// Phase of the aggregation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    /// Between cycles.
    Idle,
    /// Sensor reads in flight.
    Polling,
    /// Sink deliveries in flight.
    Delivering,
    /// Shut down; terminal.
    Cancelled,
}

/// Timeouts and cadence the loop runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// Sleep after each cycle.
    pub interval: Duration,
    /// Bound on one sensor read.
    pub read_timeout: Duration,
    /// How long an in-flight cycle may run on after cancellation.
    pub shutdown_grace: Duration,
}

impl From<&PollConfig> for LoopTimings {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: config.interval(),
            read_timeout: config.read_timeout(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// A sensor that failed this cycle, tagged with its kind.
#[derive(Debug)]
pub struct SensorFailure {
    /// Display name of the sensor.
    pub sensor: String,
    /// What went wrong.
    pub error: SensorError,
}

/// What happened in one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// One-based cycle number.
    pub cycle: u64,
    /// Readings produced (and delivered).
    pub readings: usize,
    /// Sensors that answered but had nothing valid yet.
    pub absent: usize,
    /// Sensors whose read failed or timed out.
    pub failures: Vec<SensorFailure>,
    /// Store writes that succeeded.
    pub stored: usize,
    /// Store writes that failed or timed out.
    pub store_failures: usize,
    /// Subscriber deliveries that succeeded, summed over readings.
    pub delivered: usize,
    /// Subscribers removed after a failed delivery.
    pub dropped_subscribers: usize,
}

/// What happened over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Cycles that ran to completion.
    pub cycles: u64,
    /// Readings delivered across those cycles.
    pub readings: u64,
    /// Whether an in-flight cycle was abandoned at shutdown.
    pub abandoned_cycle: bool,
}

/// Result of polling one sensor.
enum PollOutcome {
    Reading(Reading),
    Absent,
    Failed(SensorFailure),
}

/// One owned sensor plus the names needed to report on it without taking
/// its lock.
struct SensorSlot {
    name: String,
    kind: String,
    device: Arc<Mutex<Box<dyn Sensor>>>,
}

impl SensorSlot {
    fn new(sensor: Box<dyn Sensor>) -> Self {
        Self {
            name: sensor.name().to_owned(),
            kind: sensor.kind().to_owned(),
            device: Arc::new(Mutex::new(sensor)),
        }
    }

    /// Read the sensor once on the blocking pool, bounded by `timeout`.
    ///
    /// A read that outlives its timeout keeps the device lock until it
    /// returns, so the next poll fails fast with [`SensorError::Busy`]
    /// rather than stacking another blocked thread behind it.
    async fn poll(&self, timeout: Duration) -> PollOutcome {
        let device = Arc::clone(&self.device);
        let kind = self.kind.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut sensor = match device.try_lock() {
                Ok(guard) => guard,
                // A driver that panicked earlier left the lock poisoned;
                // its state is still the best we have.
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(SensorError::Busy { kind }),
            };
            sensor.read()
        });

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SensorError::Panicked {
                kind: self.kind.clone(),
                message: join_error.to_string(),
            }),
            Err(_) => Err(SensorError::Timeout {
                kind: self.kind.clone(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match result {
            Ok(Some(reading)) => PollOutcome::Reading(reading),
            Ok(None) => PollOutcome::Absent,
            Err(error) => PollOutcome::Failed(SensorFailure {
                sensor: self.name.clone(),
                error,
            }),
        }
    }

    /// Release the device if no read is holding it.
    fn close(&self) {
        let mut sensor = match self.device.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(sensor = %self.name, "Sensor busy at shutdown, dropping without close");
                return;
            }
        };
        sensor.close();
        debug!(sensor = %self.name, "Sensor closed");
    }
}

/// The aggregation loop.
pub struct Aggregator {
    sensors: Vec<SensorSlot>,
    store: StoreSink,
    broadcast: BroadcastSink,
    timings: LoopTimings,
    cycles: u64,
    phase: watch::Sender<LoopPhase>,
}

impl Aggregator {
    /// Build a loop over a fixed sensor set.
    ///
    /// An empty sensor set is allowed; every cycle then delivers nothing.
    pub fn new(
        sensors: Vec<Box<dyn Sensor>>,
        store: StoreSink,
        broadcast: BroadcastSink,
        timings: LoopTimings,
    ) -> Self {
        let (phase, _) = watch::channel(LoopPhase::Idle);
        Self {
            sensors: sensors.into_iter().map(SensorSlot::new).collect(),
            store,
            broadcast,
            timings,
            cycles: 0,
            phase,
        }
    }

    /// Display names of the sensors being polled.
    pub fn sensor_names(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.name.as_str()).collect()
    }

    /// Watch the loop's phase.
    pub fn phase(&self) -> watch::Receiver<LoopPhase> {
        self.phase.subscribe()
    }

    /// Run one poll-and-deliver cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycles = self.cycles.saturating_add(1);
        let cycle = self.cycles;

        self.phase.send_replace(LoopPhase::Polling);
        let timeout = self.timings.read_timeout;
        let outcomes = join_all(self.sensors.iter().map(|slot| slot.poll(timeout))).await;

        let mut report = CycleReport {
            cycle,
            ..CycleReport::default()
        };
        let mut readings = Vec::new();
        for outcome in outcomes {
            match outcome {
                PollOutcome::Reading(reading) => readings.push(reading),
                PollOutcome::Absent => report.absent = report.absent.saturating_add(1),
                PollOutcome::Failed(failure) => {
                    warn!(cycle, sensor = %failure.sensor, error = %failure.error, "Sensor read failed");
                    report.failures.push(failure);
                }
            }
        }

        self.phase.send_replace(LoopPhase::Delivering);
        let (store, broadcast) = (&self.store, &self.broadcast);
        let deliveries = readings
            .iter()
            .map(|reading| async move { tokio::join!(store.write(reading), broadcast.publish(reading)) });
        for (stored, broadcast) in join_all(deliveries).await {
            if stored.is_ok() {
                report.stored = report.stored.saturating_add(1);
            } else {
                report.store_failures = report.store_failures.saturating_add(1);
            }
            report.delivered = report.delivered.saturating_add(broadcast.delivered);
            report.dropped_subscribers =
                report.dropped_subscribers.saturating_add(broadcast.dropped);
        }
        report.readings = readings.len();

        self.phase.send_replace(LoopPhase::Idle);
        debug!(
            cycle,
            readings = report.readings,
            absent = report.absent,
            failures = report.failures.len(),
            store_failures = report.store_failures,
            delivered = report.delivered,
            dropped = report.dropped_subscribers,
            "Cycle complete"
        );
        report
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// The token is checked before every cycle and raced against the sleep
    /// between cycles. If it fires mid-cycle the cycle gets the configured
    /// grace period to settle before it is abandoned. Sensors are closed
    /// and released before this returns.
    pub async fn run(mut self, shutdown: CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();

        info!(
            sensors = self.sensors.len(),
            store = self.store.store_name(),
            interval_ms = u64::try_from(self.timings.interval.as_millis()).unwrap_or(u64::MAX),
            "Aggregation loop starting"
        );
        if self.sensors.is_empty() {
            warn!("No sensors active, loop will idle");
        }

        while !shutdown.is_cancelled() {
            let grace = self.timings.shutdown_grace;
            let completed = {
                let cycle = self.run_cycle();
                tokio::pin!(cycle);
                tokio::select! {
                    report = &mut cycle => Some(report),
                    () = shutdown.cancelled() => {
                        info!("Shutdown requested mid-cycle, waiting for in-flight work");
                        tokio::time::timeout(grace, &mut cycle).await.ok()
                    }
                }
            };

            let Some(report) = completed else {
                warn!(
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "In-flight cycle abandoned after grace period"
                );
                summary.abandoned_cycle = true;
                break;
            };
            summary.cycles = summary.cycles.saturating_add(1);
            summary.readings = summary
                .readings
                .saturating_add(u64::try_from(report.readings).unwrap_or(u64::MAX));

            tokio::select! {
                () = tokio::time::sleep(self.timings.interval) => {}
                () = shutdown.cancelled() => {}
            }
        }

        self.shutdown();
        info!(
            cycles = summary.cycles,
            readings = summary.readings,
            "Aggregation loop stopped"
        );
        summary
    }

    fn shutdown(&mut self) {
        for slot in &self.sensors {
            slot.close();
        }
        self.sensors.clear();
        self.phase.send_replace(LoopPhase::Cancelled);
    }
}

impl core::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Aggregator")
            .field("sensors", &self.sensor_names())
            .field("store", &self.store)
            .field("timings", &self.timings)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}
