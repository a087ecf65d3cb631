//! Generic, table-agnostic sync plumbing shared by every entity table.
//!
//! Every one of the eleven tables in spec §3/§6 carries the same five
//! sync columns. Rather than hand-writing a push/pull adapter per
//! entity, the Store exposes one generic path keyed on table name: a
//! row's non-sync columns become the wire `payload` object, and a
//! pulled delta's payload is upserted back the same way. This mirrors
//! the direct-SQL, no-ORM style the rest of `db` already uses.

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Row};
use serde_json::{Map, Value};

use super::{Store, StoreError};

/// The eleven entity tables, in the order the Sync Coordinator pushes
/// them (spec §4.7 "grouped by entity kind").
pub const ENTITY_TABLES: &[&str] = &[
    "daily_entries",
    "weekly_briefs",
    "problems",
    "portfolio_health",
    "portfolio_versions",
    "board_members",
    "governance_sessions",
    "bets",
    "evidence_items",
    "resetup_triggers",
    "user_preferences",
];

/// One row's sync-relevant projection: its five sync columns plus
/// every other column folded into a JSON object (the wire `payload`).
#[derive(Debug, Clone)]
pub struct SyncRow {
    pub id: String,
    pub server_version: i64,
    pub updated_at_utc: DateTime<Utc>,
    pub deleted_at_utc: Option<DateTime<Utc>>,
    pub payload: Option<Value>,
}

const SYNC_COLUMNS: &[&str] = &["id", "sync_status", "server_version", "updated_at_utc", "deleted_at_utc"];

fn sql_value_to_json(value: ValueRef) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64_lite(b)),
    }
}

/// Minimal base64 so a stray BLOB column never panics the row mapper.
/// None of the eleven tables currently define one.
fn base64_lite(bytes: &[u8]) -> String {
    const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b = [chunk[0], *chunk.get(1).unwrap_or(&0), *chunk.get(2).unwrap_or(&0)];
        let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32);
        out.push(ALPHABET[(n >> 18 & 0x3f) as usize] as char);
        out.push(ALPHABET[(n >> 12 & 0x3f) as usize] as char);
        out.push(if chunk.len() > 1 { ALPHABET[(n >> 6 & 0x3f) as usize] as char } else { '=' });
        out.push(if chunk.len() > 2 { ALPHABET[(n & 0x3f) as usize] as char } else { '=' });
    }
    out
}

fn map_sync_row(row: &Row) -> rusqlite::Result<SyncRow> {
    let deleted_at_utc: Option<DateTime<Utc>> = row.get("deleted_at_utc")?;
    let mut payload = Map::new();
    if deleted_at_utc.is_none() {
        for (idx, name) in row.as_ref().column_names().into_iter().enumerate() {
            if SYNC_COLUMNS.contains(&name) {
                continue;
            }
            payload.insert(name.to_string(), sql_value_to_json(row.get_ref(idx)?));
        }
    }
    Ok(SyncRow {
        id: row.get("id")?,
        server_version: row.get("server_version")?,
        updated_at_utc: row.get("updated_at_utc")?,
        deleted_at_utc,
        payload: if deleted_at_utc.is_some() { None } else { Some(Value::Object(payload)) },
    })
}

impl Store {
    /// Every `sync_status = 'pending'` row in `table`, as the generic
    /// wire projection (spec §4.7 "Push").
    pub fn list_pending_sync_rows(&self, table: &str) -> Result<Vec<SyncRow>, StoreError> {
        if !ENTITY_TABLES.contains(&table) {
            return Err(StoreError::ConstraintViolation(format!("unknown sync table {table}")));
        }
        let sql = format!("SELECT * FROM {table} WHERE sync_status = 'pending'");
        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map([], map_sync_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The current row for `id` in `table`, for conflict comparison.
    pub fn get_sync_row(&self, table: &str, id: &str) -> Result<Option<SyncRow>, StoreError> {
        if !ENTITY_TABLES.contains(&table) {
            return Err(StoreError::ConstraintViolation(format!("unknown sync table {table}")));
        }
        let sql = format!("SELECT * FROM {table} WHERE id = ?1");
        match self.conn_ref().query_row(&sql, params![id], map_sync_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Mark a successfully pushed row `synced` at the server-assigned
    /// version (spec §4.7 push acknowledgement).
    pub fn mark_row_synced(&self, table: &str, id: &str, new_server_version: i64) -> Result<(), StoreError> {
        if !ENTITY_TABLES.contains(&table) {
            return Err(StoreError::ConstraintViolation(format!("unknown sync table {table}")));
        }
        let sql = format!("UPDATE {table} SET sync_status = 'synced', server_version = ?1 WHERE id = ?2");
        self.with_transaction(|conn| {
            conn.execute(&sql, params![new_server_version, id])?;
            Ok(())
        })
    }

    /// Mark a row `conflict` without changing its payload — the
    /// coordinator resolves it and then either re-pushes or overwrites.
    pub fn mark_row_conflict(&self, table: &str, id: &str) -> Result<(), StoreError> {
        if !ENTITY_TABLES.contains(&table) {
            return Err(StoreError::ConstraintViolation(format!("unknown sync table {table}")));
        }
        let sql = format!("UPDATE {table} SET sync_status = 'conflict' WHERE id = ?1");
        self.with_transaction(|conn| {
            conn.execute(&sql, params![id])?;
            Ok(())
        })
    }

    /// Overwrite the local row's non-sync columns with a remote payload
    /// and stamp it `synced` at the remote's version/timestamp (spec
    /// §4.7 pull application / last-write-wins loser path). Columns
    /// absent from `payload` keep their current value.
    pub fn overwrite_row_from_remote(
        &self,
        table: &str,
        id: &str,
        server_version: i64,
        updated_at_utc: DateTime<Utc>,
        deleted_at_utc: Option<DateTime<Utc>>,
        payload: Option<&Value>,
    ) -> Result<(), StoreError> {
        if !ENTITY_TABLES.contains(&table) {
            return Err(StoreError::ConstraintViolation(format!("unknown sync table {table}")));
        }
        self.with_transaction(|conn| {
            if let Some(Value::Object(fields)) = payload {
                if !fields.is_empty() {
                    let assignments: Vec<String> = fields.keys().enumerate().map(|(i, k)| format!("{k} = ?{}", i + 1)).collect();
                    let sql = format!(
                        "UPDATE {table} SET {}, sync_status = 'synced', server_version = ?{a}, \
                         updated_at_utc = ?{b}, deleted_at_utc = ?{c} WHERE id = ?{d}",
                        assignments.join(", "),
                        a = fields.len() + 1,
                        b = fields.len() + 2,
                        c = fields.len() + 3,
                        d = fields.len() + 4,
                    );
                    let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                    for v in fields.values() {
                        bound.push(json_value_to_sql(v));
                    }
                    bound.push(Box::new(server_version));
                    bound.push(Box::new(updated_at_utc));
                    bound.push(Box::new(deleted_at_utc));
                    bound.push(Box::new(id.to_string()));
                    let refs: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
                    conn.execute(&sql, refs.as_slice())?;
                    return Ok(());
                }
            }
            let sql = format!(
                "UPDATE {table} SET sync_status = 'synced', server_version = ?1, \
                 updated_at_utc = ?2, deleted_at_utc = ?3 WHERE id = ?4"
            );
            conn.execute(&sql, params![server_version, updated_at_utc, deleted_at_utc, id])?;
            Ok(())
        })
    }
}

fn json_value_to_sql(value: &Value) -> Box<dyn rusqlite::ToSql> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Bool(b) => Box::new(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else {
                Box::new(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn pending_rows_round_trip_through_generic_projection() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .create_daily_entry("e1".into(), "raw".into(), "edited".into(), crate::types::EntryType::Text, None, now, "UTC".into(), now)
            .unwrap();

        let pending = store.list_pending_sync_rows("daily_entries").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "e1");
        let payload = pending[0].payload.as_ref().unwrap();
        assert_eq!(payload.get("raw_transcript").unwrap(), "raw");

        store.mark_row_synced("daily_entries", "e1", 7).unwrap();
        let row = store.get_sync_row("daily_entries", "e1").unwrap().unwrap();
        assert_eq!(row.server_version, 7);
        assert!(store.list_pending_sync_rows("daily_entries").unwrap().is_empty());
    }

    #[test]
    fn overwrite_from_remote_applies_payload_fields() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .create_daily_entry("e1".into(), "raw".into(), "edited".into(), crate::types::EntryType::Text, None, now, "UTC".into(), now)
            .unwrap();

        let remote_payload = serde_json::json!({"raw_transcript": "remote wins"});
        store
            .overwrite_row_from_remote("daily_entries", "e1", 3, now, None, Some(&remote_payload))
            .unwrap();

        let entry = store.get_daily_entry("e1").unwrap();
        assert_eq!(entry.raw_transcript, "remote wins");
        assert_eq!(entry.sync.server_version, 3);
    }
}
