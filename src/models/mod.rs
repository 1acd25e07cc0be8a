// Domain models for one collection cycle

mod counter;
mod device;
mod traffic;

pub use counter::{
    CounterIdentifier, CounterPair, CounterSample, CounterValue, Direction, OID_IF_HC_IN_OCTETS,
    OID_IF_HC_OUT_OCTETS, OID_SYS_NAME, counter_identifiers,
};
pub use device::{Device, MonitoredInterface, PriorCounters};
pub use traffic::{TrafficDelta, WriteRequest};
