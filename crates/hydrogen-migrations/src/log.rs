//! The `migrations_log` table: append-only record of applied migrations,
//! plus the `migrations status` supplemental query.

use chrono::{DateTime, Utc};

use hydrogen_connectors::{ConnectionHandle, EngineAdapter, ParamBindings, Value};
use hydrogen_errors::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: u32,
    pub file: String,
    pub applied_at: DateTime<Utc>,
    pub direction: Direction,
}

const DDL: &str = "CREATE TABLE IF NOT EXISTS migrations_log (\
    id INTEGER PRIMARY KEY, \
    file VARCHAR(255) NOT NULL, \
    applied_at VARCHAR(64) NOT NULL, \
    direction VARCHAR(16) NOT NULL)";

pub async fn ensure_table(adapter: &dyn EngineAdapter, handle: &mut ConnectionHandle) -> Result<(), Error> {
    adapter.execute(handle, DDL, &ParamBindings::new()).await?;
    Ok(())
}

/// Ids already recorded with `direction = 'forward'`, used to skip
/// migrations that were applied in a previous run. Ids form a dense
/// prefix, so this doubles as "highest applied id" + 1.
pub async fn forward_ids(adapter: &dyn EngineAdapter, handle: &mut ConnectionHandle) -> Result<Vec<u32>, Error> {
    let outcome = adapter
        .execute(handle, "SELECT id FROM migrations_log WHERE direction = 'forward'", &ParamBindings::new())
        .await?;

    let mut ids = Vec::with_capacity(outcome.rows.len());
    for row in &outcome.rows {
        if let Some(Value::Integer(n)) = row.first() {
            ids.push(*n as u32);
        }
    }
    Ok(ids)
}

pub async fn append(
    adapter: &dyn EngineAdapter,
    handle: &mut ConnectionHandle,
    id: u32,
    file: &str,
    direction: Direction,
    applied_at: DateTime<Utc>,
) -> Result<(), Error> {
    let sql = format!(
        "INSERT INTO migrations_log (id, file, applied_at, direction) VALUES ({id}, '{}', '{}', '{}')",
        adapter.escape_string(file),
        applied_at.to_rfc3339(),
        direction.as_str(),
    );
    adapter.execute(handle, &sql, &ParamBindings::new()).await?;
    Ok(())
}

/// Full history, newest first, for the `migrations status` supplemental
/// query.
pub async fn status(adapter: &dyn EngineAdapter, handle: &mut ConnectionHandle) -> Result<Vec<LogEntry>, Error> {
    let outcome = adapter
        .execute(handle, "SELECT id, file, applied_at, direction FROM migrations_log", &ParamBindings::new())
        .await?;

    let mut entries = Vec::with_capacity(outcome.rows.len());
    for row in &outcome.rows {
        let (Some(Value::Integer(id)), Some(Value::String(file)), Some(Value::String(applied_at)), Some(Value::String(direction))) =
            (row.first(), row.get(1), row.get(2), row.get(3))
        else {
            continue;
        };
        let direction = if direction == "forward" { Direction::Forward } else { Direction::Reverse };
        let applied_at = DateTime::parse_from_rfc3339(applied_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        entries.push(LogEntry { id: *id as u32, file: file.clone(), applied_at, direction });
    }
    entries.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(entries)
}
