// Counter identifiers and the typed values a GET can return

use std::fmt;

/// sysName.0, read when a session is opened.
pub const OID_SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
/// ifHCInOctets column; the ifIndex is appended.
pub const OID_IF_HC_IN_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.6";
/// ifHCOutOctets column; the ifIndex is appended.
pub const OID_IF_HC_OUT_OCTETS: &str = "1.3.6.1.2.1.31.1.1.1.10";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn column(self) -> &'static str {
        match self {
            Direction::In => OID_IF_HC_IN_OCTETS,
            Direction::Out => OID_IF_HC_OUT_OCTETS,
        }
    }
}

/// Numeric OID of one interface's in or out octet counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CounterIdentifier(String);

impl CounterIdentifier {
    pub fn new(direction: Direction, if_index: &str) -> Self {
        Self(format!("{}.{}", direction.column(), if_index.trim_matches('.')))
    }

    /// Wraps an arbitrary dotted OID (leading dot tolerated).
    pub fn from_oid(oid: &str) -> Self {
        Self(oid.trim_start_matches('.').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric arcs, or `None` if any component is not a number.
    pub fn arcs(&self) -> Option<Vec<u64>> {
        self.0.split('.').map(|part| part.parse().ok()).collect()
    }
}

impl fmt::Display for CounterIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Both identifiers for an interface, always (in, out).
pub fn counter_identifiers(if_index: &str) -> [CounterIdentifier; 2] {
    [
        CounterIdentifier::new(Direction::In, if_index),
        CounterIdentifier::new(Direction::Out, if_index),
    ]
}

/// Response value of a single varbind. Only `Unsigned` is a usable counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterValue {
    Unsigned(u64),
    Text(String),
    /// Any other type (including noSuchObject / noSuchInstance), by name.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub identifier: CounterIdentifier,
    pub value: u64,
}

/// Raw in/out octet counters of one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterPair {
    pub in_octets: u64,
    pub out_octets: u64,
}
