//! End-to-end scenarios for the aggregation loop.
//!
//! Sensors, the store, and subscribers are in-process fakes. Subscribers are
//! plain channel receivers, exactly what a WebSocket session drains.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use sensorhub_core::registry::WireMessage;
use sensorhub_core::{
    Aggregator, BroadcastSink, DataPoint, LoopPhase, LoopTimings, PointStore, Sensor, SensorError,
    StoreError, StoreSink, Subscriber, SubscriberRegistry,
};
use sensorhub_types::Reading;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Always succeeds; the `seq` field counts polls so ordering is checkable.
struct SequenceSensor {
    kind: &'static str,
    polls: usize,
}

impl SequenceSensor {
    fn boxed(kind: &'static str) -> Box<dyn Sensor> {
        Box::new(Self { kind, polls: 0 })
    }
}

impl Sensor for SequenceSensor {
    fn name(&self) -> &str {
        self.kind
    }

    fn kind(&self) -> &str {
        self.kind
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        #[allow(clippy::cast_precision_loss)]
        let seq = self.polls as f64;
        self.polls = self.polls.saturating_add(1);
        let reading = Reading::observed_now(self.kind, [("seq", seq), ("value", 1.5)]).unwrap();
        Ok(Some(reading))
    }
}

/// Always fails.
struct BrokenSensor;

impl Sensor for BrokenSensor {
    fn name(&self) -> &str {
        "BROKEN"
    }

    fn kind(&self) -> &str {
        "broken"
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        Err(SensorError::hardware("broken", "bus error"))
    }
}

/// Blocks for a fixed time before answering.
struct StuckSensor {
    hold: Duration,
}

impl Sensor for StuckSensor {
    fn name(&self) -> &str {
        "STUCK"
    }

    fn kind(&self) -> &str {
        "stuck"
    }

    fn read(&mut self) -> Result<Option<Reading>, SensorError> {
        std::thread::sleep(self.hold);
        Ok(Some(Reading::observed_now("stuck", [("value", 0.0)]).unwrap()))
    }
}

/// Counts writes; optionally fails or stalls.
struct FakeStore {
    writes: Arc<AtomicUsize>,
    fail: bool,
    delay: Duration,
}

impl PointStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    fn write<'a>(&'a self, _point: &'a DataPoint) -> BoxFuture<'a, Result<(), StoreError>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err(StoreError::Rejected {
                    status: 500,
                    body: String::from("internal error"),
                })
            } else {
                Ok(())
            }
        })
    }
}

struct Harness {
    aggregator: Aggregator,
    registry: SubscriberRegistry,
    writes: Arc<AtomicUsize>,
}

fn timings() -> LoopTimings {
    LoopTimings {
        interval: Duration::from_millis(10),
        read_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
    }
}

fn harness_with(
    sensors: Vec<Box<dyn Sensor>>,
    timings: LoopTimings,
    fail_store: bool,
    store_delay: Duration,
    store_timeout: Duration,
) -> Harness {
    let writes = Arc::new(AtomicUsize::new(0));
    let store = FakeStore {
        writes: Arc::clone(&writes),
        fail: fail_store,
        delay: store_delay,
    };
    let registry = SubscriberRegistry::new();
    let aggregator = Aggregator::new(
        sensors,
        StoreSink::new(Box::new(store), store_timeout),
        BroadcastSink::new(registry.clone(), Duration::from_millis(200)),
        timings,
    );
    Harness {
        aggregator,
        registry,
        writes,
    }
}

fn harness(sensors: Vec<Box<dyn Sensor>>) -> Harness {
    harness_with(
        sensors,
        timings(),
        false,
        Duration::ZERO,
        Duration::from_secs(1),
    )
}

async fn subscribe(registry: &SubscriberRegistry) -> (Subscriber, mpsc::Receiver<WireMessage>) {
    let (subscriber, rx) = Subscriber::channel(64);
    registry.add(subscriber.clone()).await.unwrap();
    (subscriber, rx)
}

fn drain(rx: &mut mpsc::Receiver<WireMessage>) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(serde_json::from_str(&msg).unwrap());
    }
    out
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_healthy_sensors_two_subscribers_one_cycle() {
    let mut h = harness(vec![
        SequenceSensor::boxed("dht22"),
        SequenceSensor::boxed("bmp280"),
        SequenceSensor::boxed("gy32"),
    ]);
    let (_a, mut rx_a) = subscribe(&h.registry).await;
    let (_b, mut rx_b) = subscribe(&h.registry).await;

    let report = h.aggregator.run_cycle().await;

    assert_eq!(report.readings, 3);
    assert_eq!(report.stored, 3);
    assert_eq!(report.delivered, 6);
    assert_eq!(h.writes.load(Ordering::SeqCst), 3);

    for rx in [&mut rx_a, &mut rx_b] {
        let messages = drain(rx);
        assert_eq!(messages.len(), 3);
        let mut kinds: Vec<String> = messages
            .iter()
            .map(|m| m["sensor_type"].as_str().unwrap().to_owned())
            .collect();
        kinds.sort();
        assert_eq!(kinds, vec!["bmp280", "dht22", "gy32"]);
    }
}

#[tokio::test]
async fn per_sensor_order_follows_cycle_order() {
    let mut h = harness(vec![
        SequenceSensor::boxed("dht22"),
        SequenceSensor::boxed("gy32"),
    ]);
    let (_sub, mut rx) = subscribe(&h.registry).await;

    for _ in 0..4 {
        h.aggregator.run_cycle().await;
    }

    let mut per_sensor: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for message in drain(&mut rx) {
        per_sensor
            .entry(message["sensor_type"].as_str().unwrap().to_owned())
            .or_default()
            .push(message["fields"]["seq"].as_f64().unwrap());
    }
    for seqs in per_sensor.values() {
        assert_eq!(seqs, &vec![0.0, 1.0, 2.0, 3.0]);
    }
}

#[tokio::test]
async fn failing_sensor_never_blocks_the_others() {
    let mut h = harness(vec![
        SequenceSensor::boxed("dht22"),
        Box::new(BrokenSensor),
        SequenceSensor::boxed("gy32"),
    ]);

    for cycle in 1..=5_u64 {
        let report = h.aggregator.run_cycle().await;
        assert_eq!(report.cycle, cycle);
        assert_eq!(report.readings, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures.first().unwrap().error.kind(), "broken");
    }

    assert_eq!(h.writes.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn closed_subscriber_is_reaped_and_others_unaffected() {
    let mut h = harness(vec![
        SequenceSensor::boxed("dht22"),
        SequenceSensor::boxed("bmp280"),
        SequenceSensor::boxed("gy32"),
    ]);
    let (gone, rx_gone) = subscribe(&h.registry).await;
    let (kept, mut rx_kept) = subscribe(&h.registry).await;
    drop(rx_gone);

    let report = h.aggregator.run_cycle().await;

    // Removed after the first failed delivery and counted exactly once.
    assert_eq!(report.dropped_subscribers, 1);
    let snapshot = h.registry.snapshot().await;
    assert!(!snapshot.contains(gone.id()));
    assert!(snapshot.contains(kept.id()));
    assert_eq!(drain(&mut rx_kept).len(), 3);

    // No resurrection on later cycles.
    let report = h.aggregator.run_cycle().await;
    assert_eq!(report.dropped_subscribers, 0);
    assert!(!h.registry.contains(gone.id()).await);
    assert_eq!(drain(&mut rx_kept).len(), 3);
}

#[tokio::test]
async fn deliveries_match_readings_whatever_fails() {
    let mut h = harness(vec![
        SequenceSensor::boxed("dht22"),
        Box::new(BrokenSensor),
        Box::new(BrokenSensor),
        SequenceSensor::boxed("gy32"),
    ]);
    let (_sub, mut rx) = subscribe(&h.registry).await;

    let mut expected = 0;
    for _ in 0..3 {
        let report = h.aggregator.run_cycle().await;
        expected += report.readings;
        assert_eq!(report.readings, 2);
    }
    assert_eq!(h.writes.load(Ordering::SeqCst), expected);
    assert_eq!(drain(&mut rx).len(), expected);
}

#[tokio::test]
async fn stuck_sensor_times_out_then_reports_busy() {
    let mut h = harness_with(
        vec![
            Box::new(StuckSensor {
                hold: Duration::from_millis(600),
            }),
            SequenceSensor::boxed("gy32"),
        ],
        LoopTimings {
            read_timeout: Duration::from_millis(50),
            ..timings()
        },
        false,
        Duration::ZERO,
        Duration::from_secs(1),
    );

    let started = Instant::now();
    let report = h.aggregator.run_cycle().await;
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(report.readings, 1);
    assert!(matches!(
        report.failures.first().unwrap().error,
        SensorError::Timeout { timeout_ms: 50, .. }
    ));

    // The first read still holds the device.
    let report = h.aggregator.run_cycle().await;
    assert_eq!(report.readings, 1);
    assert!(matches!(
        report.failures.first().unwrap().error,
        SensorError::Busy { .. }
    ));
}

#[tokio::test]
async fn store_failure_still_broadcasts() {
    let mut h = harness_with(
        vec![SequenceSensor::boxed("dht22"), SequenceSensor::boxed("gy32")],
        timings(),
        true,
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let (_sub, mut rx) = subscribe(&h.registry).await;

    let report = h.aggregator.run_cycle().await;
    assert_eq!(report.store_failures, 2);
    assert_eq!(report.stored, 0);
    assert_eq!(drain(&mut rx).len(), 2);
}

#[tokio::test]
async fn slow_store_is_bounded_and_does_not_delay_broadcast() {
    let mut h = harness_with(
        vec![SequenceSensor::boxed("dht22")],
        timings(),
        false,
        Duration::from_secs(10),
        Duration::from_millis(50),
    );
    let (_sub, mut rx) = subscribe(&h.registry).await;

    let started = Instant::now();
    let report = h.aggregator.run_cycle().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.store_failures, 1);
    assert_eq!(drain(&mut rx).len(), 1);
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_stops_on_cancellation_after_settling_the_cycle() {
    let h = harness(vec![
        SequenceSensor::boxed("dht22"),
        Box::new(BrokenSensor),
        SequenceSensor::boxed("gy32"),
    ]);
    let phase = h.aggregator.phase();
    let token = CancellationToken::new();
    let handle = tokio::spawn(h.aggregator.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(summary.cycles >= 1);
    assert!(!summary.abandoned_cycle);
    assert_eq!(summary.readings, summary.cycles * 2);
    assert_eq!(
        h.writes.load(Ordering::SeqCst),
        usize::try_from(summary.readings).unwrap()
    );
    assert_eq!(*phase.borrow(), LoopPhase::Cancelled);
}

#[tokio::test]
async fn in_flight_cycle_is_abandoned_after_grace_period() {
    let h = harness_with(
        vec![Box::new(StuckSensor {
            hold: Duration::from_millis(800),
        })],
        LoopTimings {
            interval: Duration::from_millis(10),
            read_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(50),
        },
        false,
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let token = CancellationToken::new();
    let handle = tokio::spawn(h.aggregator.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled_at = Instant::now();
    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert!(summary.abandoned_cycle);
    assert_eq!(summary.cycles, 0);
}

#[tokio::test]
async fn cancellation_interrupts_the_sleep_between_cycles() {
    let h = harness_with(
        vec![SequenceSensor::boxed("gy32")],
        LoopTimings {
            interval: Duration::from_secs(60),
            ..timings()
        },
        false,
        Duration::ZERO,
        Duration::from_secs(1),
    );
    let token = CancellationToken::new();
    let handle = tokio::spawn(h.aggregator.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.cycles, 1);
    assert_eq!(h.writes.load(Ordering::SeqCst), 1);
}
