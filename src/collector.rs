// Collection orchestrator.
// One cycle: load devices, hand them to a bounded pool of device workers, join the workers,
// drain the write serializer, roll up groups, then start the legacy jobs.
// Workers only read from the store; every write goes through the serializer.

use crate::delta::{compute_deltas, prior_samples};
use crate::inventory::Inventory;
use crate::legacy;
use crate::models::{Device, WriteRequest, counter_identifiers};
use crate::poller::{BatchPoller, PollError, SessionConnector};
use crate::writer::{CounterSink, WriterStats, spawn_write_serializer, write_queue_capacity};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Store handles and protocol connector, passed explicitly to every component.
#[derive(Clone)]
pub struct CollectorDeps {
    pub inventory: Arc<dyn Inventory>,
    pub sink: Arc<dyn CounterSink>,
    pub connector: Arc<dyn SessionConnector>,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub default_secret: String,
    pub window_seconds: u64,
    pub max_oids_per_request: usize,
    pub max_concurrent_devices: usize,
    pub write_queue_capacity: usize,
    /// Commands started, in order, after each complete cycle.
    pub legacy_jobs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Loading,
    Dispatching,
    Awaiting,
    Draining,
    Done,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Loading => "loading",
            CyclePhase::Dispatching => "dispatching",
            CyclePhase::Awaiting => "awaiting",
            CyclePhase::Draining => "draining",
            CyclePhase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Where a device worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Inventory,
    Connect,
    Fetch,
    Enqueue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    pub address: String,
    pub stage: FailureStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub devices_total: usize,
    pub devices_succeeded: usize,
    pub failures: Vec<DeviceFailure>,
    pub deltas_emitted: usize,
    pub writes_applied: u64,
    pub writes_failed: u64,
    pub groups_updated: u64,
    pub legacy_jobs_started: usize,
    pub duration: Duration,
}

impl CycleReport {
    pub fn failed_addresses(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.address.as_str()).collect()
    }
}

/// Per-device work shared by all pool workers.
struct DeviceWorker {
    inventory: Arc<dyn Inventory>,
    poller: BatchPoller,
    window_seconds: u64,
}

impl DeviceWorker {
    fn failure(device: &Device, stage: FailureStage, reason: impl ToString) -> DeviceFailure {
        DeviceFailure {
            address: device.address.clone(),
            stage,
            reason: reason.to_string(),
        }
    }

    /// Connect -> FetchCounters -> ComputeDeltas -> EnqueueWrites. Returns deltas enqueued.
    async fn collect(
        &self,
        device: &Device,
        write_tx: &mpsc::Sender<WriteRequest>,
    ) -> Result<usize, DeviceFailure> {
        let interfaces = self
            .inventory
            .list_monitored_interfaces(&device.address)
            .await
            .map_err(|e| Self::failure(device, FailureStage::Inventory, e))?;
        if interfaces.is_empty() {
            debug!("no monitored interfaces");
            return Ok(0);
        }

        let identifiers: Vec<_> = interfaces
            .iter()
            .flat_map(|iface| counter_identifiers(&iface.if_index))
            .collect();
        let current = self
            .poller
            .fetch(device, &identifiers)
            .await
            .map_err(|e| match e {
                PollError::Connect { .. } => Self::failure(device, FailureStage::Connect, e),
                PollError::Fetch { .. } => Self::failure(device, FailureStage::Fetch, e),
            })?;

        let prior = self
            .inventory
            .prior_counters(&device.address)
            .await
            .map_err(|e| Self::failure(device, FailureStage::Inventory, e))?;
        let previous = prior_samples(&interfaces, &prior);
        let deltas = compute_deltas(&current, &previous, &interfaces, self.window_seconds);

        for delta in &deltas {
            for request in delta.write_requests() {
                write_tx.send(request).await.map_err(|_| {
                    Self::failure(device, FailureStage::Enqueue, "write serializer closed")
                })?;
            }
        }
        debug!(
            interfaces = interfaces.len(),
            samples = current.len(),
            deltas = deltas.len(),
            "device collected"
        );
        Ok(deltas.len())
    }
}

type DeviceOutcome = (Device, Result<usize, DeviceFailure>);

/// Runs one full cycle. Per-device failures are recorded, never propagated; the cycle always
/// reaches `Done`.
pub async fn run_cycle(deps: &CollectorDeps, config: &CollectorConfig) -> CycleReport {
    let started = Instant::now();
    let mut report = CycleReport::default();
    let mut phase = CyclePhase::Idle;
    let mut advance = |next: CyclePhase| {
        debug!(from = %phase, to = %next, "cycle phase");
        phase = next;
    };

    advance(CyclePhase::Loading);
    let devices = match deps.inventory.list_devices(&config.default_secret).await {
        Ok(devices) => devices,
        Err(e) => {
            error!(error = %e, operation = "list_devices", "device inventory unavailable");
            Vec::new()
        }
    };
    report.devices_total = devices.len();

    advance(CyclePhase::Dispatching);
    let pool_size = config.max_concurrent_devices.max(1).min(devices.len());
    let (write_tx, write_rx) = mpsc::channel(write_queue_capacity(
        config.write_queue_capacity,
        pool_size,
    ));
    let writer = spawn_write_serializer(write_rx, deps.sink.clone());

    let queue = Arc::new(Mutex::new(VecDeque::from(devices)));
    let worker = Arc::new(DeviceWorker {
        inventory: deps.inventory.clone(),
        poller: BatchPoller::new(deps.connector.clone(), config.max_oids_per_request),
        window_seconds: config.window_seconds,
    });

    let mut workers: JoinSet<Vec<DeviceOutcome>> = JoinSet::new();
    for worker_id in 0..pool_size {
        let queue = queue.clone();
        let worker = worker.clone();
        let write_tx = write_tx.clone();
        workers.spawn(async move {
            let mut outcomes = Vec::new();
            loop {
                let next = queue.lock().await.pop_front();
                let Some(device) = next else {
                    break;
                };
                let span = info_span!("device", worker_id, device = %device.address);
                let outcome = worker.collect(&device, &write_tx).instrument(span).await;
                outcomes.push((device, outcome));
            }
            outcomes
        });
    }
    drop(write_tx);

    advance(CyclePhase::Awaiting);
    while let Some(joined) = workers.join_next().await {
        let outcomes = match joined {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, "device worker aborted");
                continue;
            }
        };
        for (device, outcome) in outcomes {
            match outcome {
                Ok(deltas) => {
                    report.devices_succeeded += 1;
                    report.deltas_emitted += deltas;
                }
                Err(failure) => {
                    warn!(
                        device = %device.address,
                        stage = ?failure.stage,
                        error = %failure.reason,
                        "device skipped this cycle"
                    );
                    report.failures.push(failure);
                }
            }
        }
    }

    advance(CyclePhase::Draining);
    let stats = match writer.await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "write serializer aborted");
            WriterStats::default()
        }
    };
    report.writes_applied = stats.applied;
    report.writes_failed = stats.failed;

    match deps.sink.rollup_groups(config.window_seconds).await {
        Ok(groups) => report.groups_updated = groups,
        Err(e) => warn!(error = %e, operation = "rollup_groups", "group rollup failed"),
    }
    report.legacy_jobs_started = legacy::launch_jobs(&config.legacy_jobs);

    advance(CyclePhase::Done);
    report.duration = started.elapsed();
    info!(
        devices = report.devices_total,
        succeeded = report.devices_succeeded,
        failed = report.failures.len(),
        deltas = report.deltas_emitted,
        writes_applied = report.writes_applied,
        writes_failed = report.writes_failed,
        duration_ms = report.duration.as_millis() as u64,
        "collection cycle complete"
    );
    report
}

/// When repeated cycles start.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Every `period`, first cycle immediately.
    Every(Duration),
    /// Cron expression in local time.
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    pub fn cron(expr: &str) -> anyhow::Result<Self> {
        let schedule = cron::Schedule::from_str(expr)
            .map_err(|e| anyhow::anyhow!("invalid collector.schedule {:?}: {}", expr, e))?;
        Ok(Schedule::Cron(Box::new(schedule)))
    }

    fn ticker(self) -> Ticker {
        match self {
            Schedule::Every(period) => {
                let mut tick = tokio::time::interval(period);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                Ticker::Interval(tick)
            }
            Schedule::Cron(schedule) => Ticker::Cron(schedule),
        }
    }
}

enum Ticker {
    Interval(tokio::time::Interval),
    Cron(Box<cron::Schedule>),
}

impl Ticker {
    async fn wait(&mut self) {
        match self {
            Ticker::Interval(tick) => {
                tick.tick().await;
            }
            Ticker::Cron(schedule) => {
                let now = chrono::Local::now();
                match schedule.after(&now).next() {
                    Some(next) => {
                        let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        warn!("collector.schedule has no future firing; collector idle");
                        std::future::pending::<()>().await;
                    }
                }
            }
        }
    }
}

/// Runs cycles on `schedule` until `shutdown_rx` fires. A cycle in progress always completes.
pub fn spawn_scheduled(
    deps: CollectorDeps,
    config: CollectorConfig,
    schedule: Schedule,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = schedule.ticker();
        loop {
            tokio::select! {
                _ = ticker.wait() => {
                    let report = run_cycle(&deps, &config).await;
                    if !report.failures.is_empty() {
                        info!(failed = ?report.failed_addresses(), "devices to retry next cycle");
                    }
                }
                _ = &mut shutdown_rx => {
                    debug!("Collector shutting down");
                    break;
                }
            }
        }
    })
}
