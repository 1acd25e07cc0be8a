// Read side of the store: which devices to poll, which interfaces, and what was seen last cycle.

use crate::models::{Device, MonitoredInterface, PriorCounters};
use async_trait::async_trait;
use std::collections::HashMap;

/// Default SNMP community when a device has none configured.
pub const DEFAULT_SECRET: &str = "load";

#[async_trait]
pub trait Inventory: Send + Sync {
    /// Every device with at least one monitored interface. Devices without their own
    /// secret get `default_secret`.
    async fn list_devices(&self, default_secret: &str) -> anyhow::Result<Vec<Device>>;

    async fn list_monitored_interfaces(
        &self,
        address: &str,
    ) -> anyhow::Result<Vec<MonitoredInterface>>;

    /// Raw counters stored by the previous cycle, keyed by interface display name.
    async fn prior_counters(&self, address: &str)
    -> anyhow::Result<HashMap<String, PriorCounters>>;
}
