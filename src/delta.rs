// Delta calculator: raw counters of this cycle vs. the previous cycle -> per-window traffic.

use crate::models::{
    CounterIdentifier, CounterPair, CounterSample, Direction, MonitoredInterface, PriorCounters,
    TrafficDelta,
};
use std::collections::HashMap;
use tracing::debug;

/// Default sampling window (seconds).
pub const DEFAULT_WINDOW_SECS: u64 = 300;

/// Bytes accrued between two readings. A lower current reading is a counter reset, so the
/// current value is the best estimate; with no previous reading there is no baseline.
pub fn counter_delta(current: u64, previous: Option<u64>) -> u64 {
    match previous {
        Some(previous) if current >= previous => current - previous,
        Some(_) => current,
        None => 0,
    }
}

/// Identifier-keyed view of the counters the store holds from the previous cycle.
pub fn prior_samples(
    interfaces: &[MonitoredInterface],
    prior: &HashMap<String, PriorCounters>,
) -> HashMap<CounterIdentifier, CounterSample> {
    let mut out = HashMap::with_capacity(interfaces.len() * 2);
    for iface in interfaces {
        let Some(counters) = prior.get(&iface.display_name) else {
            continue;
        };
        for (direction, value) in [
            (Direction::In, counters.in_octets),
            (Direction::Out, counters.out_octets),
        ] {
            if let Some(value) = value {
                let identifier = CounterIdentifier::new(direction, &iface.if_index);
                out.insert(identifier.clone(), CounterSample { identifier, value });
            }
        }
    }
    out
}

/// One delta per interface whose in and out counters both arrived this cycle.
pub fn compute_deltas(
    current: &HashMap<CounterIdentifier, CounterSample>,
    previous: &HashMap<CounterIdentifier, CounterSample>,
    interfaces: &[MonitoredInterface],
    window_seconds: u64,
) -> Vec<TrafficDelta> {
    let mut deltas = Vec::with_capacity(interfaces.len());
    for iface in interfaces {
        let in_id = CounterIdentifier::new(Direction::In, &iface.if_index);
        let out_id = CounterIdentifier::new(Direction::Out, &iface.if_index);

        let (Some(cur_in), Some(cur_out)) = (current.get(&in_id), current.get(&out_id)) else {
            debug!(
                interface = %iface.display_name,
                if_index = %iface.if_index,
                has_in = current.contains_key(&in_id),
                has_out = current.contains_key(&out_id),
                "incomplete counters; interface skipped this cycle"
            );
            continue;
        };

        let prev_in = previous.get(&in_id).map(|s| s.value);
        let prev_out = previous.get(&out_id).map(|s| s.value);
        if prev_in.is_some_and(|p| cur_in.value < p) || prev_out.is_some_and(|p| cur_out.value < p)
        {
            debug!(interface = %iface.display_name, "counter reset detected");
        }

        deltas.push(TrafficDelta {
            interface_name: iface.display_name.clone(),
            in_bytes: counter_delta(cur_in.value, prev_in),
            out_bytes: counter_delta(cur_out.value, prev_out),
            window_seconds,
            counters: CounterPair {
                in_octets: cur_in.value,
                out_octets: cur_out.value,
            },
        });
    }
    deltas
}
