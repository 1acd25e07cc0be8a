// Shared test doubles: in-memory inventory, scripted SNMP devices, recording sink.
#![allow(dead_code)]

use async_trait::async_trait;
use port_loading::inventory::Inventory;
use port_loading::models::*;
use port_loading::poller::{CounterSession, SessionConnector, SessionError};
use port_loading::writer::CounterSink;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn device(address: &str) -> Device {
    Device {
        address: address.into(),
        secret: "load".into(),
    }
}

pub fn iface(name: &str, if_index: &str) -> MonitoredInterface {
    MonitoredInterface {
        display_name: name.into(),
        if_index: if_index.into(),
    }
}

#[derive(Default)]
pub struct FakeInventory {
    pub devices: Vec<Device>,
    pub interfaces: HashMap<String, Vec<MonitoredInterface>>,
    pub prior: HashMap<String, HashMap<String, PriorCounters>>,
    pub broken_devices: HashSet<String>,
}

impl FakeInventory {
    pub fn with_device(mut self, address: &str, interfaces: Vec<MonitoredInterface>) -> Self {
        self.devices.push(device(address));
        self.interfaces.insert(address.into(), interfaces);
        self
    }

    pub fn with_prior(mut self, address: &str, name: &str, in_octets: u64, out_octets: u64) -> Self {
        self.prior.entry(address.into()).or_default().insert(
            name.into(),
            PriorCounters {
                in_octets: Some(in_octets),
                out_octets: Some(out_octets),
            },
        );
        self
    }
}

#[async_trait]
impl Inventory for FakeInventory {
    async fn list_devices(&self, default_secret: &str) -> anyhow::Result<Vec<Device>> {
        Ok(self
            .devices
            .iter()
            .map(|d| Device {
                address: d.address.clone(),
                secret: if d.secret.is_empty() {
                    default_secret.into()
                } else {
                    d.secret.clone()
                },
            })
            .collect())
    }

    async fn list_monitored_interfaces(
        &self,
        address: &str,
    ) -> anyhow::Result<Vec<MonitoredInterface>> {
        anyhow::ensure!(!self.broken_devices.contains(address), "inventory read failed");
        Ok(self.interfaces.get(address).cloned().unwrap_or_default())
    }

    async fn prior_counters(
        &self,
        address: &str,
    ) -> anyhow::Result<HashMap<String, PriorCounters>> {
        Ok(self.prior.get(address).cloned().unwrap_or_default())
    }
}

/// Scripted behaviour of one simulated router.
#[derive(Clone, Default)]
pub struct FakeDevice {
    pub connect_fails: bool,
    /// 1-based batch number that fails.
    pub fail_on_batch: Option<usize>,
    pub values: HashMap<CounterIdentifier, CounterValue>,
    pub latency: Option<Duration>,
}

impl FakeDevice {
    pub fn counters(mut self, if_index: &str, in_octets: u64, out_octets: u64) -> Self {
        let [i, o] = counter_identifiers(if_index);
        self.values.insert(i, CounterValue::Unsigned(in_octets));
        self.values.insert(o, CounterValue::Unsigned(out_octets));
        self
    }

    pub fn value(mut self, identifier: CounterIdentifier, value: CounterValue) -> Self {
        self.values.insert(identifier, value);
        self
    }

    pub fn unreachable() -> Self {
        Self {
            connect_fails: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub devices: HashMap<String, FakeDevice>,
    pub connects: AtomicUsize,
    pub open_sessions: Arc<AtomicUsize>,
    pub peak_sessions: Arc<AtomicUsize>,
    pub batches: Arc<Mutex<Vec<(String, usize)>>>,
}

impl FakeConnector {
    pub fn with(mut self, address: &str, device: FakeDevice) -> Self {
        self.devices.insert(address.into(), device);
        self
    }

    pub fn batch_sizes(&self, address: &str) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, n)| *n)
            .collect()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, device: &Device) -> Result<Box<dyn CounterSession>, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .devices
            .get(&device.address)
            .cloned()
            .ok_or_else(|| SessionError::new("no route to host"))?;
        if script.connect_fails {
            return Err(SessionError::new("sysName check: timed out"));
        }
        let open = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_sessions.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            address: device.address.clone(),
            script,
            batch: 0,
            open_sessions: self.open_sessions.clone(),
            batches: self.batches.clone(),
        }))
    }
}

pub struct FakeSession {
    address: String,
    script: FakeDevice,
    batch: usize,
    open_sessions: Arc<AtomicUsize>,
    batches: Arc<Mutex<Vec<(String, usize)>>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CounterSession for FakeSession {
    async fn get(
        &mut self,
        identifiers: &[CounterIdentifier],
    ) -> Result<Vec<(CounterIdentifier, CounterValue)>, SessionError> {
        self.batch += 1;
        self.batches
            .lock()
            .unwrap()
            .push((self.address.clone(), identifiers.len()));
        if let Some(latency) = self.script.latency {
            tokio::time::sleep(latency).await;
        }
        if self.script.fail_on_batch == Some(self.batch) {
            return Err(SessionError::new("request timed out (after 3 retries)"));
        }
        Ok(identifiers
            .iter()
            .map(|id| {
                let value = self
                    .script
                    .values
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| CounterValue::Other("NoSuchInstance".into()));
                (id.clone(), value)
            })
            .collect())
    }
}

/// Sink that records every applied request in order.
#[derive(Default)]
pub struct RecordingSink {
    pub applied: Mutex<Vec<WriteRequest>>,
    pub reject: HashSet<String>,
    pub rollups: Mutex<Vec<(u64, usize)>>,
    pub apply_delay: Option<Duration>,
}

impl RecordingSink {
    pub fn applied(&self) -> Vec<WriteRequest> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_names(&self) -> Vec<String> {
        self.applied()
            .iter()
            .map(|r| r.interface_name().to_string())
            .collect()
    }
}

#[async_trait]
impl CounterSink for RecordingSink {
    async fn apply(&self, request: &WriteRequest) -> anyhow::Result<()> {
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        anyhow::ensure!(
            !self.reject.contains(request.interface_name()),
            "no source named {:?}",
            request.interface_name()
        );
        self.applied.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn rollup_groups(&self, window_seconds: u64) -> anyhow::Result<u64> {
        let applied = self.applied.lock().unwrap().len();
        self.rollups.lock().unwrap().push((window_seconds, applied));
        Ok(0)
    }
}
