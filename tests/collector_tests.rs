// Orchestrator tests: failure isolation, bounded fan-out, drain before rollup, end-to-end deltas

mod common;

use common::*;
use port_loading::collector::{
    CollectorConfig, CollectorDeps, FailureStage, Schedule, run_cycle, spawn_scheduled,
};
use port_loading::models::WriteRequest;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::oneshot;

fn config() -> CollectorConfig {
    CollectorConfig {
        default_secret: "load".into(),
        window_seconds: 300,
        max_oids_per_request: 20,
        max_concurrent_devices: 8,
        write_queue_capacity: 4,
        legacy_jobs: vec![],
    }
}

fn deps(
    inventory: FakeInventory,
    connector: Arc<FakeConnector>,
    sink: Arc<RecordingSink>,
) -> CollectorDeps {
    CollectorDeps {
        inventory: Arc::new(inventory),
        sink,
        connector,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_failure_is_isolated_to_its_device() {
    let inventory = FakeInventory::default()
        .with_device("10.0.0.1", vec![iface("d1-eth0", "1")])
        .with_device("10.0.0.2", vec![iface("d2-eth0", "1")])
        .with_device("10.0.0.3", vec![iface("d3-eth0", "1")])
        .with_prior("10.0.0.1", "d1-eth0", 100, 100)
        .with_prior("10.0.0.3", "d3-eth0", 100, 100);
    let connector = Arc::new(
        FakeConnector::default()
            .with("10.0.0.1", FakeDevice::default().counters("1", 150, 160))
            .with("10.0.0.2", FakeDevice::unreachable())
            .with("10.0.0.3", FakeDevice::default().counters("1", 170, 180)),
    );
    let sink = Arc::new(RecordingSink::default());

    let report = run_cycle(&deps(inventory, connector, sink.clone()), &config()).await;

    assert_eq!(report.devices_total, 3);
    assert_eq!(report.devices_succeeded, 2);
    assert_eq!(report.failed_addresses(), vec!["10.0.0.2"]);
    assert_eq!(report.failures[0].stage, FailureStage::Connect);
    assert_eq!(report.writes_applied, 4);

    let mut names = sink.applied_names();
    names.sort();
    names.dedup();
    assert_eq!(names, vec!["d1-eth0", "d3-eth0"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn n_devices_with_k_connect_failures_yield_n_minus_k_writers() {
    for n in 0..6usize {
        for k in 0..=n {
            let mut inventory = FakeInventory::default();
            let mut connector = FakeConnector::default();
            for d in 0..n {
                let address = format!("192.0.2.{d}");
                inventory = inventory.with_device(&address, vec![iface(&format!("dev{d}"), "7")]);
                let script = if d < k {
                    FakeDevice::unreachable()
                } else {
                    FakeDevice::default().counters("7", 10, 20)
                };
                connector = connector.with(&address, script);
            }
            let sink = Arc::new(RecordingSink::default());
            let report =
                run_cycle(&deps(inventory, Arc::new(connector), sink.clone()), &config()).await;

            assert_eq!(report.failures.len(), k, "n={n} k={k}");
            let mut writers = sink.applied_names();
            writers.sort();
            writers.dedup();
            assert_eq!(writers.len(), n - k, "n={n} k={k}");
        }
    }
}

#[tokio::test]
async fn fetch_failure_discards_the_whole_device() {
    // 11 interfaces -> 22 ids -> batches of 20 and 2; the second fails
    let interfaces: Vec<_> = (1..=11)
        .map(|i| iface(&format!("eth{i}"), &i.to_string()))
        .collect();
    let mut script = FakeDevice {
        fail_on_batch: Some(2),
        ..Default::default()
    };
    for i in 1..=11 {
        script = script.counters(&i.to_string(), 1, 1);
    }
    let inventory = FakeInventory::default().with_device("10.1.0.1", interfaces);
    let connector = Arc::new(FakeConnector::default().with("10.1.0.1", script));
    let sink = Arc::new(RecordingSink::default());

    let report = run_cycle(&deps(inventory, connector.clone(), sink.clone()), &config()).await;

    assert_eq!(report.failures[0].stage, FailureStage::Fetch);
    assert!(sink.applied().is_empty());
    assert_eq!(connector.batch_sizes("10.1.0.1"), vec![20, 2]);
    assert_eq!(connector.open_sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn incomplete_interface_enqueues_nothing() {
    let [in_id, _] = port_loading::models::counter_identifiers("2");
    let inventory = FakeInventory::default()
        .with_device("10.2.0.1", vec![iface("eth1", "1"), iface("eth2", "2")])
        .with_prior("10.2.0.1", "eth1", 1000, 2000);
    let connector = Arc::new(
        FakeConnector::default().with(
            "10.2.0.1",
            FakeDevice::default()
                .counters("1", 1500, 2600)
                .value(in_id, port_loading::models::CounterValue::Unsigned(5)),
        ),
    );
    let sink = Arc::new(RecordingSink::default());

    let report = run_cycle(&deps(inventory, connector, sink.clone()), &config()).await;

    assert_eq!(report.devices_succeeded, 1);
    assert_eq!(report.deltas_emitted, 1);
    let applied = sink.applied();
    assert_eq!(applied.len(), 2);
    assert!(applied.iter().all(|r| r.interface_name() == "eth1"));
    assert_eq!(
        applied[1],
        WriteRequest::AccumulateTotals {
            interface_name: "eth1".into(),
            in_bytes: 500,
            out_bytes: 600,
            window_seconds: 300,
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_pool_bounds_concurrent_sessions() {
    let mut inventory = FakeInventory::default();
    let mut connector = FakeConnector::default();
    for d in 0..12 {
        let address = format!("198.51.100.{d}");
        inventory = inventory.with_device(&address, vec![iface(&format!("p{d}"), "1")]);
        let mut script = FakeDevice::default().counters("1", 1, 1);
        script.latency = Some(Duration::from_millis(20));
        connector = connector.with(&address, script);
    }
    let connector = Arc::new(connector);
    let sink = Arc::new(RecordingSink::default());
    let mut cfg = config();
    cfg.max_concurrent_devices = 3;

    let report = run_cycle(&deps(inventory, connector.clone(), sink.clone()), &cfg).await;

    assert_eq!(report.devices_succeeded, 12);
    assert!(connector.peak_sessions.load(Ordering::SeqCst) <= 3);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn rollup_runs_once_after_every_write_is_applied() {
    let inventory = FakeInventory::default()
        .with_device("10.3.0.1", vec![iface("a", "1"), iface("b", "2")])
        .with_device("10.3.0.2", vec![iface("c", "1")]);
    let connector = Arc::new(
        FakeConnector::default()
            .with(
                "10.3.0.1",
                FakeDevice::default().counters("1", 1, 1).counters("2", 2, 2),
            )
            .with("10.3.0.2", FakeDevice::default().counters("1", 3, 3)),
    );
    let sink = Arc::new(RecordingSink {
        apply_delay: Some(Duration::from_millis(2)),
        ..Default::default()
    });

    let report = run_cycle(&deps(inventory, connector, sink.clone()), &config()).await;

    assert_eq!(report.writes_applied, 6);
    assert_eq!(*sink.rollups.lock().unwrap(), vec![(300, 6)]);
}

#[tokio::test]
async fn empty_inventory_still_completes() {
    let sink = Arc::new(RecordingSink::default());
    let report = run_cycle(
        &deps(FakeInventory::default(), Arc::new(FakeConnector::default()), sink.clone()),
        &config(),
    )
    .await;

    assert_eq!(report.devices_total, 0);
    assert!(report.failures.is_empty());
    assert_eq!(sink.rollups.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn inventory_read_failure_skips_device() {
    let mut inventory = FakeInventory::default()
        .with_device("10.4.0.1", vec![iface("x", "1")])
        .with_device("10.4.0.2", vec![iface("y", "1")]);
    inventory.broken_devices.insert("10.4.0.1".into());
    let connector = Arc::new(
        FakeConnector::default()
            .with("10.4.0.1", FakeDevice::default().counters("1", 1, 1))
            .with("10.4.0.2", FakeDevice::default().counters("1", 1, 1)),
    );
    let sink = Arc::new(RecordingSink::default());

    let report = run_cycle(&deps(inventory, connector.clone(), sink.clone()), &config()).await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, FailureStage::Inventory);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(sink.applied_names(), vec!["y", "y"]);
}

#[tokio::test(start_paused = true)]
async fn scheduled_cycles_follow_the_period_until_shutdown() {
    let sink = Arc::new(RecordingSink::default());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = spawn_scheduled(
        deps(FakeInventory::default(), Arc::new(FakeConnector::default()), sink.clone()),
        config(),
        Schedule::Every(Duration::from_secs(300)),
        shutdown_rx,
    );

    // First cycle immediately, then at 300s and 600s.
    tokio::time::sleep(Duration::from_secs(650)).await;
    assert_eq!(sink.rollups.lock().unwrap().len(), 3);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
    assert_eq!(sink.rollups.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_running_cycle_finish() {
    let inventory = FakeInventory::default()
        .with_device("10.5.0.1", vec![iface("slow", "1")])
        .with_prior("10.5.0.1", "slow", 100, 100);
    let connector = Arc::new(
        FakeConnector::default().with("10.5.0.1", FakeDevice::default().counters("1", 150, 180)),
    );
    let sink = Arc::new(RecordingSink {
        apply_delay: Some(Duration::from_secs(10)),
        ..Default::default()
    });
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = spawn_scheduled(
        deps(inventory, connector, sink.clone()),
        config(),
        Schedule::Every(Duration::from_secs(300)),
        shutdown_rx,
    );

    // Mid-drain: the first write is still being applied.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sink.applied().is_empty());
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert_eq!(sink.applied_names(), vec!["slow", "slow"]);
    assert_eq!(*sink.rollups.lock().unwrap(), vec![(300, 2)]);
}

#[cfg(unix)]
#[tokio::test]
async fn legacy_jobs_start_after_the_cycle() {
    let dir = tempfile::TempDir::new().unwrap();
    let marker = dir.path().join("rrd-updated");
    let mut config = config();
    config.legacy_jobs = vec![
        format!("touch {}", marker.display()),
        "/nonexistent/period-rollover".into(),
    ];
    let sink = Arc::new(RecordingSink::default());

    let report = run_cycle(
        &deps(FakeInventory::default(), Arc::new(FakeConnector::default()), sink.clone()),
        &config,
    )
    .await;

    assert_eq!(report.legacy_jobs_started, 1);
    assert_eq!(sink.rollups.lock().unwrap().len(), 1);
    for _ in 0..100 {
        if marker.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("legacy job never ran");
}
