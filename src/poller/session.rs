// Protocol seam. One `CounterSession` per device per cycle; dropping it closes the session.

use crate::models::{CounterIdentifier, CounterValue, Device};
use async_trait::async_trait;

/// Failure reported by a protocol session (after its own retries).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct SessionError(pub String);

impl SessionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open and validate a session. Errors here mean the device is unreachable or
    /// rejected the secret.
    async fn connect(&self, device: &Device) -> Result<Box<dyn CounterSession>, SessionError>;
}

#[async_trait]
pub trait CounterSession: Send {
    /// One GET round-trip. Values come back paired with the identifier they answer.
    async fn get(
        &mut self,
        identifiers: &[CounterIdentifier],
    ) -> Result<Vec<(CounterIdentifier, CounterValue)>, SessionError>;
}
