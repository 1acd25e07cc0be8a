// SQLite store: inventory (devices, interfaces, sources), per-source counters and accumulators.
// Uses sqlx for async + connection pooling. Counters are u64 on the wire and stored as
// INTEGER (i64); the cast is bit-preserving both ways. Byte deltas and totals saturate instead.

pub mod rollup;

use crate::inventory::Inventory;
use crate::models::{CounterPair, Device, MonitoredInterface, PriorCounters, WriteRequest};
use crate::writer::CounterSink;
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::instrument;

/// How a source is matched to a device interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRef {
    IfName,
    IfIp,
}

impl SourceRef {
    fn as_str(self) -> &'static str {
        match self {
            SourceRef::IfName => "ifname",
            SourceRef::IfIp => "ifip",
        }
    }
}

/// A billed traffic source: one named interface on one router.
#[derive(Debug, Clone)]
pub struct NewSource<'a> {
    pub name: &'a str,
    pub device_address: &'a str,
    pub reference: SourceRef,
    pub if_name: Option<&'a str>,
    pub if_ip: Option<&'a str>,
    pub group_id: Option<i64>,
}

/// Stored counters and accumulators of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTotals {
    pub current: Option<CounterPair>,
    pub previous: Option<CounterPair>,
    pub sampled_at: Option<i64>,
    pub in_day: u64,
    pub out_day: u64,
    pub in_period: u64,
    pub out_period: u64,
    pub last_in_delta: u64,
    pub last_out_delta: u64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

fn unix_now() -> anyhow::Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

/// Start of the sampling window containing `now`.
pub fn window_bucket(now: i64, window_seconds: u64) -> i64 {
    let window = window_seconds.max(1) as i64;
    now.div_euclid(window) * window
}

/// Byte counts (deltas, totals) are not bit-cast; they saturate at i64::MAX.
pub(crate) fn clamp_bytes(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

fn pair(input: Option<i64>, output: Option<i64>) -> Option<CounterPair> {
    Some(CounterPair {
        in_octets: input? as u64,
        out_octets: output? as u64,
    })
}

impl SqliteStore {
    /// Connect to SQLite at `path`, create parent dir and DB if missing, enable WAL.
    pub async fn connect(path: &str, max_pool_size: u32) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size.max(1))
            .connect_with(opts)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS devices (address TEXT PRIMARY KEY, community TEXT)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interfaces (
                device_address TEXT NOT NULL,
                if_index TEXT NOT NULL,
                if_name TEXT,
                if_ip TEXT,
                PRIMARY KEY (device_address, if_index)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                name TEXT PRIMARY KEY,
                device_address TEXT NOT NULL,
                ref_mode TEXT NOT NULL CHECK (ref_mode IN ('ifname', 'ifip')),
                if_name TEXT,
                if_ip TEXT,
                group_id INTEGER,
                input INTEGER,
                output INTEGER,
                input_p INTEGER,
                output_p INTEGER,
                sampled_at INTEGER,
                sampled_at_p INTEGER,
                input_day INTEGER NOT NULL DEFAULT 0,
                output_day INTEGER NOT NULL DEFAULT 0,
                input_period INTEGER NOT NULL DEFAULT 0,
                output_period INTEGER NOT NULL DEFAULT 0,
                last_in_delta INTEGER NOT NULL DEFAULT 0,
                last_out_delta INTEGER NOT NULL DEFAULT 0,
                changed INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sources_device ON sources(device_address)",
        )
        .execute(&self.pool)
        .await?;

        rollup::init_group_table(&self.pool).await?;

        Ok(())
    }

    /// Insert or update a device. `community = None` falls back to the default at read time.
    pub async fn upsert_device(&self, address: &str, community: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO devices (address, community) VALUES ($1, $2)
             ON CONFLICT(address) DO UPDATE SET community = excluded.community",
        )
        .bind(address)
        .bind(community)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_interface(
        &self,
        device_address: &str,
        if_index: &str,
        if_name: Option<&str>,
        if_ip: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO interfaces (device_address, if_index, if_name, if_ip) VALUES ($1, $2, $3, $4)
             ON CONFLICT(device_address, if_index) DO UPDATE SET if_name = excluded.if_name, if_ip = excluded.if_ip",
        )
        .bind(device_address)
        .bind(if_index)
        .bind(if_name)
        .bind(if_ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_source(&self, source: &NewSource<'_>) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO sources (name, device_address, ref_mode, if_name, if_ip, group_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(source.name)
        .bind(source.device_address)
        .bind(source.reference.as_str())
        .bind(source.if_name)
        .bind(source.if_ip)
        .bind(source.group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_group(&self, id: i64, name: &str) -> anyhow::Result<()> {
        rollup::add_group(&self.pool, id, name).await
    }

    pub async fn group_last_speed(&self, id: i64) -> anyhow::Result<Option<u64>> {
        rollup::group_last_speed(&self.pool, id).await
    }

    pub async fn source_totals(&self, name: &str) -> anyhow::Result<Option<SourceTotals>> {
        let row = sqlx::query(
            "SELECT input, output, input_p, output_p, sampled_at, input_day, output_day,
                    input_period, output_period, last_in_delta, last_out_delta
             FROM sources WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SourceTotals {
            current: pair(row.try_get("input")?, row.try_get("output")?),
            previous: pair(row.try_get("input_p")?, row.try_get("output_p")?),
            sampled_at: row.try_get("sampled_at")?,
            in_day: row.try_get::<i64, _>("input_day")? as u64,
            out_day: row.try_get::<i64, _>("output_day")? as u64,
            in_period: row.try_get::<i64, _>("input_period")? as u64,
            out_period: row.try_get::<i64, _>("output_period")? as u64,
            last_in_delta: row.try_get::<i64, _>("last_in_delta")? as u64,
            last_out_delta: row.try_get::<i64, _>("last_out_delta")? as u64,
        }))
    }

    #[instrument(skip(self, counters), fields(repo = "store", operation = "record_counters"))]
    async fn record_counters(
        &self,
        interface_name: &str,
        counters: CounterPair,
        window_seconds: u64,
    ) -> anyhow::Result<()> {
        let now = unix_now()?;
        let result = sqlx::query(
            "UPDATE sources SET input_p = input, output_p = output, sampled_at_p = sampled_at,
                    input = $1, output = $2, sampled_at = $3, changed = $4
             WHERE name = $5",
        )
        .bind(counters.in_octets as i64)
        .bind(counters.out_octets as i64)
        .bind(window_bucket(now, window_seconds))
        .bind(now)
        .bind(interface_name)
        .execute(&self.pool)
        .await?;
        anyhow::ensure!(
            result.rows_affected() > 0,
            "no source named {:?}",
            interface_name
        );
        Ok(())
    }

    #[instrument(skip(self), fields(repo = "store", operation = "accumulate_totals"))]
    async fn accumulate_totals(
        &self,
        interface_name: &str,
        in_bytes: u64,
        out_bytes: u64,
    ) -> anyhow::Result<()> {
        // Byte totals saturate at i64::MAX instead of wrapping or turning REAL.
        let result = sqlx::query(
            "UPDATE sources SET
                input_day = MIN(input_day, 9223372036854775807 - $1) + $1,
                output_day = MIN(output_day, 9223372036854775807 - $2) + $2,
                input_period = MIN(input_period, 9223372036854775807 - $1) + $1,
                output_period = MIN(output_period, 9223372036854775807 - $2) + $2,
                last_in_delta = $1, last_out_delta = $2, changed = $3
             WHERE name = $4",
        )
        .bind(clamp_bytes(in_bytes))
        .bind(clamp_bytes(out_bytes))
        .bind(unix_now()?)
        .bind(interface_name)
        .execute(&self.pool)
        .await?;
        anyhow::ensure!(
            result.rows_affected() > 0,
            "no source named {:?}",
            interface_name
        );
        Ok(())
    }
}

#[async_trait]
impl Inventory for SqliteStore {
    #[instrument(skip(self, default_secret), fields(repo = "store", operation = "list_devices"))]
    async fn list_devices(&self, default_secret: &str) -> anyhow::Result<Vec<Device>> {
        let rows = sqlx::query(
            "SELECT DISTINCT s.device_address AS address, COALESCE(d.community, $1) AS community
             FROM sources s LEFT JOIN devices d ON d.address = s.device_address
             ORDER BY s.device_address",
        )
        .bind(default_secret)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Device {
                address: row.try_get("address")?,
                secret: row.try_get("community")?,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "store", operation = "list_monitored_interfaces"))]
    async fn list_monitored_interfaces(
        &self,
        address: &str,
    ) -> anyhow::Result<Vec<MonitoredInterface>> {
        let rows = sqlx::query(
            r#"
            SELECT s.name AS name, i.if_index AS if_index
            FROM sources s JOIN interfaces i
              ON i.device_address = s.device_address AND s.if_name = i.if_name
            WHERE s.device_address = $1 AND s.ref_mode = 'ifname'
            UNION
            SELECT s.name AS name, i.if_index AS if_index
            FROM sources s JOIN interfaces i
              ON i.device_address = s.device_address AND s.if_ip = i.if_ip
            WHERE s.device_address = $1 AND s.ref_mode = 'ifip'
            ORDER BY name
            "#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(MonitoredInterface {
                display_name: row.try_get("name")?,
                if_index: row.try_get("if_index")?,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(repo = "store", operation = "prior_counters"))]
    async fn prior_counters(
        &self,
        address: &str,
    ) -> anyhow::Result<HashMap<String, PriorCounters>> {
        let rows = sqlx::query("SELECT name, input, output FROM sources WHERE device_address = $1")
            .bind(address)
            .fetch_all(&self.pool)
            .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let input: Option<i64> = row.try_get("input")?;
            let output: Option<i64> = row.try_get("output")?;
            out.insert(
                name,
                PriorCounters {
                    in_octets: input.map(|v| v as u64),
                    out_octets: output.map(|v| v as u64),
                },
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl CounterSink for SqliteStore {
    async fn apply(&self, request: &WriteRequest) -> anyhow::Result<()> {
        match request {
            WriteRequest::RecordCounters {
                interface_name,
                counters,
                window_seconds,
            } => {
                self.record_counters(interface_name, *counters, *window_seconds)
                    .await
            }
            WriteRequest::AccumulateTotals {
                interface_name,
                in_bytes,
                out_bytes,
                ..
            } => {
                self.accumulate_totals(interface_name, *in_bytes, *out_bytes)
                    .await
            }
        }
    }

    async fn rollup_groups(&self, window_seconds: u64) -> anyhow::Result<u64> {
        rollup::rollup_groups(&self.pool, window_seconds, unix_now()?).await
    }
}
