// Batch poller: one session per device, bounded GET batches, typed value filtering.
// The wire protocol lives behind `SessionConnector` / `CounterSession`; see `snmp` for SNMP v2c.

mod session;
pub mod snmp;

pub use session::{CounterSession, SessionConnector, SessionError};

use crate::models::{CounterIdentifier, CounterSample, CounterValue, Device};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default maximum identifiers per GET round-trip.
pub const DEFAULT_MAX_BATCH: usize = 20;

/// Device-scoped poll failures. Either one means no samples for the device this cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("connect to {address} failed: {source}")]
    Connect {
        address: String,
        #[source]
        source: SessionError,
    },
    #[error("batch {batch}/{batches} from {address} failed: {source}")]
    Fetch {
        address: String,
        batch: usize,
        batches: usize,
        #[source]
        source: SessionError,
    },
}

/// Order-preserving batches of at most `max_batch` identifiers (a zero size is treated as 1).
pub fn batches(
    identifiers: &[CounterIdentifier],
    max_batch: usize,
) -> std::slice::Chunks<'_, CounterIdentifier> {
    identifiers.chunks(max_batch.max(1))
}

pub struct BatchPoller {
    connector: Arc<dyn SessionConnector>,
    max_batch: usize,
}

impl BatchPoller {
    pub fn new(connector: Arc<dyn SessionConnector>, max_batch: usize) -> Self {
        Self {
            connector,
            max_batch: max_batch.max(1),
        }
    }

    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Fetch every identifier from `device`. Identifiers whose value is not an unsigned
    /// counter are left out of the map. Any batch failure fails the whole device.
    #[instrument(skip_all, fields(device = %device.address, identifiers = identifiers.len()))]
    pub async fn fetch(
        &self,
        device: &Device,
        identifiers: &[CounterIdentifier],
    ) -> Result<HashMap<CounterIdentifier, CounterSample>, PollError> {
        let mut session =
            self.connector
                .connect(device)
                .await
                .map_err(|source| PollError::Connect {
                    address: device.address.clone(),
                    source,
                })?;

        let total = identifiers.len().div_ceil(self.max_batch);
        let mut samples = HashMap::with_capacity(identifiers.len());

        for (n, batch) in batches(identifiers, self.max_batch).enumerate() {
            let values = session
                .get(batch)
                .await
                .map_err(|source| PollError::Fetch {
                    address: device.address.clone(),
                    batch: n + 1,
                    batches: total,
                    source,
                })?;

            for (identifier, value) in values {
                if !batch.contains(&identifier) {
                    warn!(oid = %identifier, "response carried an identifier that was not requested");
                    continue;
                }
                match value {
                    CounterValue::Unsigned(value) => {
                        samples.insert(identifier.clone(), CounterSample { identifier, value });
                    }
                    CounterValue::Text(text) => {
                        warn!(oid = %identifier, value = %text, "string response where a counter was expected");
                    }
                    CounterValue::Other(kind) => {
                        warn!(oid = %identifier, kind = %kind, "unexpected value type for counter");
                    }
                }
            }
            debug!(batch = n + 1, batches = total, size = batch.len(), "batch fetched");
        }

        Ok(samples)
    }
}
