// Group rollup: per contract group, the last window's speed in bits/s.
// Speed = max(sum of member in-deltas, sum of member out-deltas) * 8 / window.

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Creates the source_groups table if not present.
pub async fn init_group_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_groups (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            last_speed INTEGER NOT NULL DEFAULT 0,
            last_update INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn add_group(pool: &SqlitePool, id: i64, name: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO source_groups (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bits per second for a window, from the larger of the two directions.
pub fn group_speed(sum_in: u64, sum_out: u64, window_seconds: u64) -> u64 {
    sum_in.max(sum_out).saturating_mul(8) / window_seconds.max(1)
}

/// Recomputes `last_speed` for every group (id > 0) that has member sources.
pub async fn rollup_groups(
    pool: &SqlitePool,
    window_seconds: u64,
    now: i64,
) -> anyhow::Result<u64> {
    // Summed here rather than with SQL SUM, which errors on i64 overflow.
    let rows = sqlx::query(
        r#"
        SELECT g.id AS id, s.last_in_delta AS last_in, s.last_out_delta AS last_out
        FROM source_groups g JOIN sources s ON s.group_id = g.id
        WHERE g.id > 0
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut sums: BTreeMap<i64, (u64, u64)> = BTreeMap::new();
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let last_in = row.try_get::<i64, _>("last_in")?.max(0) as u64;
        let last_out = row.try_get::<i64, _>("last_out")?.max(0) as u64;
        let (sum_in, sum_out) = sums.entry(id).or_default();
        *sum_in = sum_in.saturating_add(last_in);
        *sum_out = sum_out.saturating_add(last_out);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0;
    for (id, (sum_in, sum_out)) in sums {
        let speed = group_speed(sum_in, sum_out, window_seconds);
        sqlx::query("UPDATE source_groups SET last_speed = $1, last_update = $2 WHERE id = $3")
            .bind(super::clamp_bytes(speed))
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        updated += 1;
    }
    tx.commit().await?;
    Ok(updated)
}

pub async fn group_last_speed(pool: &SqlitePool, id: i64) -> anyhow::Result<Option<u64>> {
    let row = sqlx::query("SELECT last_speed FROM source_groups WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(row.try_get::<i64, _>("last_speed")? as u64)),
        None => Ok(None),
    }
}
