use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{EntryType, SyncColumns};

/// Seven typed extraction buckets (spec §3, §4.5.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSignals {
    #[serde(default)]
    pub wins: Vec<String>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub avoided_decision: Vec<String>,
    #[serde(default)]
    pub comfort_work: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEntry {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub raw_transcript: String,
    pub edited_transcript: String,
    pub signals: ExtractedSignals,
    pub entry_type: EntryType,
    pub word_count: i64,
    pub duration_s: Option<i64>,
    pub created_at_utc: DateTime<Utc>,
    pub timezone: String,
}

pub const MAX_WORD_COUNT: i64 = 7_500;
pub const MAX_VOICE_DURATION_S: i64 = 900;

fn map_row(row: &Row) -> rusqlite::Result<DailyEntry> {
    let signals_json: String = row.get("signals_json")?;
    let entry_type: String = row.get("entry_type")?;
    let sync_status: String = row.get("sync_status")?;
    Ok(DailyEntry {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        raw_transcript: row.get("raw_transcript")?,
        edited_transcript: row.get("edited_transcript")?,
        signals: serde_json::from_str(&signals_json).unwrap_or_default(),
        entry_type: if entry_type == "voice" {
            EntryType::Voice
        } else {
            EntryType::Text
        },
        word_count: row.get("word_count")?,
        duration_s: row.get("duration_s")?,
        created_at_utc: row.get("created_at_utc")?,
        timezone: row.get("timezone")?,
    })
}

impl Store {
    pub fn create_daily_entry(
        &self,
        id: String,
        raw_transcript: String,
        edited_transcript: String,
        entry_type: EntryType,
        duration_s: Option<i64>,
        created_at_utc: DateTime<Utc>,
        timezone: String,
        now: DateTime<Utc>,
    ) -> Result<DailyEntry, StoreError> {
        let word_count = edited_transcript.split_whitespace().count() as i64;
        if let EntryType::Voice = entry_type {
            if let Some(d) = duration_s {
                if d > MAX_VOICE_DURATION_S {
                    return Err(StoreError::ConstraintViolation(format!(
                        "voice duration {d}s exceeds {MAX_VOICE_DURATION_S}s"
                    )));
                }
            }
        }

        let entry_type_str = match entry_type {
            EntryType::Voice => "voice",
            EntryType::Text => "text",
        };
        let signals_json = serde_json::to_string(&ExtractedSignals::default()).unwrap();

        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO daily_entries
                 (id, sync_status, server_version, updated_at_utc, raw_transcript,
                  edited_transcript, signals_json, entry_type, word_count, duration_s,
                  created_at_utc, timezone)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    now,
                    raw_transcript,
                    edited_transcript,
                    signals_json,
                    entry_type_str,
                    word_count,
                    duration_s,
                    created_at_utc,
                    timezone,
                ],
            )?;
            Ok(())
        })?;

        self.get_daily_entry(&id)
    }

    pub fn get_daily_entry(&self, id: &str) -> Result<DailyEntry, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM daily_entries WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    /// Update the extracted signals. The Daily Extraction pipeline calls
    /// this only after confirming no user edits would be overwritten
    /// (spec §4.5.1 `ReextractWouldOverwrite`).
    pub fn set_daily_entry_signals(
        &self,
        id: &str,
        signals: &ExtractedSignals,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let signals_json = serde_json::to_string(signals).unwrap();
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE daily_entries SET signals_json = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![signals_json, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    pub fn list_daily_entries_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DailyEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM daily_entries WHERE deleted_at_utc IS NULL
             AND created_at_utc >= ?1 AND created_at_utc <= ?2
             ORDER BY created_at_utc ASC",
        )?;
        let rows = stmt.query_map(params![start, end], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn soft_delete_daily_entry(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE daily_entries SET deleted_at_utc = ?1, sync_status = 'pending',
                 updated_at_utc = ?1 WHERE id = ?2 AND deleted_at_utc IS NULL",
                params![now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn word_count_boundary_7500_saves_7501_still_saves() {
        let store = Store::open_in_memory().unwrap();
        let words_7500 = "word ".repeat(7500);
        let entry = store
            .create_daily_entry(
                "e1".into(),
                words_7500.clone(),
                words_7500,
                EntryType::Text,
                None,
                now(),
                "UTC".into(),
                now(),
            )
            .unwrap();
        assert_eq!(entry.word_count, 7500);

        let words_7501 = "word ".repeat(7501);
        let entry2 = store
            .create_daily_entry(
                "e2".into(),
                words_7501.clone(),
                words_7501,
                EntryType::Text,
                None,
                now(),
                "UTC".into(),
                now(),
            )
            .unwrap();
        assert_eq!(entry2.word_count, 7501);
    }

    #[test]
    fn voice_duration_over_900s_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let result = store.create_daily_entry(
            "e1".into(),
            "hi".into(),
            "hi".into(),
            EntryType::Voice,
            Some(901),
            now(),
            "UTC".into(),
            now(),
        );
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }
}
