// Inventory models: routers and the interfaces monitored on them

/// A polled router. Identity is the address; loaded fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Device {
    pub address: String,
    /// SNMP community.
    pub secret: String,
}

/// An interface on a [`Device`]. `display_name` is the store's join key for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredInterface {
    pub display_name: String,
    /// Device-local ifIndex, kept as text as it is appended to an OID.
    pub if_index: String,
}

/// Counters persisted by the previous cycle. `None` means no baseline yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorCounters {
    pub in_octets: Option<u64>,
    pub out_octets: Option<u64>,
}
