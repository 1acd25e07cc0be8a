// SNMP v2c sessions over the snmp2 client.
// Each round-trip gets `retries` extra attempts; the per-attempt timeout doubles every retry.
// A failed attempt abandons its UDP socket: replies that arrive after the timeout are never
// read as the answer to a later request.

use super::session::{CounterSession, SessionConnector, SessionError};
use crate::models::{CounterIdentifier, CounterValue, Device, OID_SYS_NAME};
use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_PORT: u16 = 161;

/// Timeout and retry budget for one round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Per-attempt timeouts: `timeout, 2*timeout, 4*timeout, ...`, `retries + 1` entries.
    pub fn attempt_timeouts(&self) -> impl Iterator<Item = Duration> + use<> {
        let first = self.timeout.max(Duration::from_millis(1));
        std::iter::successors(Some(first), |t| Some(t.saturating_mul(2)))
            .take(self.retries as usize + 1)
    }

    /// Worst-case time spent on one round-trip before it is reported as failed.
    pub fn budget(&self) -> Duration {
        self.attempt_timeouts().sum()
    }
}

pub struct SnmpConnector {
    port: u16,
    policy: RetryPolicy,
}

impl SnmpConnector {
    pub fn new(port: u16, policy: RetryPolicy) -> Self {
        Self { port, policy }
    }
}

#[async_trait]
impl SessionConnector for SnmpConnector {
    async fn connect(&self, device: &Device) -> Result<Box<dyn CounterSession>, SessionError> {
        let mut session = SnmpSession {
            session: None,
            target: format!("{}:{}", device.address, self.port),
            community: device.secret.as_bytes().to_vec(),
            policy: self.policy,
            next_req_id: 1,
        };
        if let Err(e) = session.socket().await {
            return Err(SessionError::new(format!("open {}: {e}", session.target)));
        }

        // v2c has no handshake; an unanswered sysName GET is how a bad community shows up.
        let sys_name = oid_for(&CounterIdentifier::from_oid(OID_SYS_NAME))
            .ok_or_else(|| SessionError::new("malformed sysName oid"))?;
        session
            .round_trip(&[sys_name])
            .await
            .map_err(|e| SessionError::new(format!("sysName check: {e}")))?;
        debug!(target = %session.target, "snmp session open");

        Ok(Box::new(session))
    }
}

/// Request ids handed to consecutive sockets of one session start this far apart.
const REQ_ID_STRIDE: i32 = 1 << 16;

/// Outcome of one request/response exchange.
enum Exchange {
    Values(Vec<CounterValue>),
    /// The agent answered with a non-zero error-status.
    Refused { status: u32, index: u32 },
    /// A reply to an earlier, abandoned request.
    Stale,
    Failed(String),
}

struct SnmpSession {
    /// Dropped after a failed attempt, so a late reply lands on a closed socket.
    session: Option<AsyncSession>,
    target: String,
    community: Vec<u8>,
    policy: RetryPolicy,
    next_req_id: i32,
}

impl SnmpSession {
    async fn socket(&mut self) -> std::io::Result<&mut AsyncSession> {
        let session = match self.session.take() {
            Some(session) => session,
            None => {
                let req_id = self.next_req_id;
                self.next_req_id = self.next_req_id.wrapping_add(REQ_ID_STRIDE);
                AsyncSession::new_v2c(self.target.as_str(), &self.community, req_id).await?
            }
        };
        Ok(self.session.insert(session))
    }

    async fn exchange(&mut self, oids: &[&Oid<'static>]) -> Exchange {
        let session = match self.socket().await {
            Ok(session) => session,
            Err(e) => return Exchange::Failed(format!("open socket: {e}")),
        };
        match session.get_many(oids).await {
            Ok(pdu) if pdu.error_status != 0 => Exchange::Refused {
                status: pdu.error_status,
                index: pdu.error_index,
            },
            Ok(pdu) => {
                Exchange::Values(pdu.varbinds.map(|(_, value)| counter_value(&value)).collect())
            }
            Err(snmp2::Error::RequestIdMismatch) => Exchange::Stale,
            Err(e) => Exchange::Failed(format!("{e:?}")),
        }
    }

    async fn round_trip(&mut self, oids: &[Oid<'static>]) -> Result<Vec<CounterValue>, SessionError> {
        let refs: Vec<&Oid<'static>> = oids.iter().collect();
        let mut last_error = String::from("no attempt made");

        for (attempt, wait) in self.policy.attempt_timeouts().enumerate() {
            let deadline = Instant::now() + wait;
            loop {
                match tokio::time::timeout_at(deadline, self.exchange(&refs)).await {
                    Ok(Exchange::Values(values)) => return Ok(values),
                    Ok(Exchange::Refused { status, index }) => {
                        return Err(SessionError::new(format!(
                            "{}: error-status {} at index {}",
                            self.target, status, index
                        )));
                    }
                    Ok(Exchange::Stale) => {
                        // Re-send on a fresh socket; the attempt keeps its deadline.
                        debug!(target = %self.target, attempt, "stale reply discarded");
                        self.session = None;
                    }
                    Ok(Exchange::Failed(e)) => {
                        last_error = e;
                        break;
                    }
                    Err(_) => {
                        last_error = format!("timed out after {wait:?}");
                        break;
                    }
                }
            }
            self.session = None;
            debug!(target = %self.target, attempt, error = %last_error, "snmp request attempt failed");
        }

        Err(SessionError::new(format!(
            "{}: {} (after {} retries)",
            self.target, last_error, self.policy.retries
        )))
    }
}

#[async_trait]
impl CounterSession for SnmpSession {
    async fn get(
        &mut self,
        identifiers: &[CounterIdentifier],
    ) -> Result<Vec<(CounterIdentifier, CounterValue)>, SessionError> {
        let mut out = Vec::with_capacity(identifiers.len());
        let mut requested = Vec::with_capacity(identifiers.len());
        let mut oids = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            match oid_for(identifier) {
                Some(oid) => {
                    requested.push(identifier.clone());
                    oids.push(oid);
                }
                None => out.push((
                    identifier.clone(),
                    CounterValue::Other("malformed identifier".into()),
                )),
            }
        }
        if oids.is_empty() {
            return Ok(out);
        }

        // GET answers in request order.
        let values = self.round_trip(&oids).await?;
        out.extend(requested.into_iter().zip(values));
        Ok(out)
    }
}

fn oid_for(identifier: &CounterIdentifier) -> Option<Oid<'static>> {
    let arcs = identifier.arcs()?;
    Oid::from(&arcs).ok()
}

fn counter_value(value: &Value<'_>) -> CounterValue {
    match value {
        Value::Counter64(v) => CounterValue::Unsigned(*v),
        Value::Counter32(v) | Value::Unsigned32(v) => CounterValue::Unsigned(u64::from(*v)),
        Value::OctetString(bytes) => CounterValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        other => CounterValue::Other(format!("{other:?}")),
    }
}
