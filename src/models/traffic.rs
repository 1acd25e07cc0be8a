// Per-window traffic and the typed persistence requests derived from it

use super::CounterPair;

/// Bytes accrued on one interface during one sampling window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficDelta {
    pub interface_name: String,
    pub in_bytes: u64,
    pub out_bytes: u64,
    pub window_seconds: u64,
    /// Raw readings the delta was computed from.
    pub counters: CounterPair,
}

/// One persistence operation, keyed by interface name. Applied by the write serializer only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Shift the current snapshot to previous and store the new raw counters.
    RecordCounters {
        interface_name: String,
        counters: CounterPair,
        window_seconds: u64,
    },
    /// Add the window's delta to the day and period accumulators.
    AccumulateTotals {
        interface_name: String,
        in_bytes: u64,
        out_bytes: u64,
        window_seconds: u64,
    },
}

impl WriteRequest {
    pub fn interface_name(&self) -> &str {
        match self {
            WriteRequest::RecordCounters { interface_name, .. }
            | WriteRequest::AccumulateTotals { interface_name, .. } => interface_name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WriteRequest::RecordCounters { .. } => "record_counters",
            WriteRequest::AccumulateTotals { .. } => "accumulate_totals",
        }
    }
}

impl TrafficDelta {
    /// Writes for this interface, in the order they must be applied.
    pub fn write_requests(&self) -> [WriteRequest; 2] {
        [
            WriteRequest::RecordCounters {
                interface_name: self.interface_name.clone(),
                counters: self.counters,
                window_seconds: self.window_seconds,
            },
            WriteRequest::AccumulateTotals {
                interface_name: self.interface_name.clone(),
                in_bytes: self.in_bytes,
                out_bytes: self.out_bytes,
                window_seconds: self.window_seconds,
            },
        ]
    }
}
