//! Append-only conflict-loser log (spec §4.7, §6, GLOSSARY "Overwrite log").

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverwriteLogEntry {
    pub log_id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub losing_payload: Value,
    pub losing_updated_at_utc: DateTime<Utc>,
    pub winning_updated_at_utc: DateTime<Utc>,
    pub recorded_at_utc: DateTime<Utc>,
}

fn map_row(row: &Row) -> rusqlite::Result<OverwriteLogEntry> {
    let payload_json: String = row.get("losing_payload_json")?;
    Ok(OverwriteLogEntry {
        log_id: row.get("log_id")?,
        entity_kind: row.get("entity_kind")?,
        entity_id: row.get("entity_id")?,
        losing_payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
        losing_updated_at_utc: row.get("losing_updated_at_utc")?,
        winning_updated_at_utc: row.get("winning_updated_at_utc")?,
        recorded_at_utc: row.get("recorded_at_utc")?,
    })
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub fn record_overwrite(
        &self,
        log_id: String,
        entity_kind: &str,
        entity_id: &str,
        losing_payload: &Value,
        losing_updated_at_utc: DateTime<Utc>,
        winning_updated_at_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(losing_payload).unwrap();
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO overwrite_log
                 (log_id, entity_kind, entity_id, losing_payload_json, losing_updated_at_utc,
                  winning_updated_at_utc, recorded_at_utc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![log_id, entity_kind, entity_id, payload_json, losing_updated_at_utc, winning_updated_at_utc, now],
            )?;
            Ok(())
        })
    }

    pub fn list_overwrites_for_entity(&self, entity_id: &str) -> Result<Vec<OverwriteLogEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM overwrite_log WHERE entity_id = ?1 ORDER BY recorded_at_utc ASC")?;
        let rows = stmt.query_map(params![entity_id], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
