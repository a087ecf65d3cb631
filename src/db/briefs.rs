use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::SyncColumns;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenModifier {
    Shorter,
    Actionable,
    Strategic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyBrief {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub week_timezone: String,
    pub brief_markdown: String,
    pub micro_review_markdown: Option<String>,
    pub entry_count: i64,
    pub regen_count: i64,
    pub regen_options: Vec<RegenModifier>,
}

pub const MAX_REGENERATIONS: i64 = 5;

fn map_row(row: &Row) -> rusqlite::Result<WeeklyBrief> {
    let sync_status: String = row.get("sync_status")?;
    let options_json: String = row.get("regen_options_json")?;
    Ok(WeeklyBrief {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        week_start: row.get("week_start")?,
        week_end: row.get("week_end")?,
        week_timezone: row.get("week_timezone")?,
        brief_markdown: row.get("brief_markdown")?,
        micro_review_markdown: row.get("micro_review_markdown")?,
        entry_count: row.get("entry_count")?,
        regen_count: row.get("regen_count")?,
        regen_options: serde_json::from_str(&options_json).unwrap_or_default(),
    })
}

impl Store {
    /// Create the single brief for a (week_start, week_timezone) pair.
    /// The `UNIQUE` constraint on the table enforces spec §3's
    /// at-most-one-brief-per-week invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn create_weekly_brief(
        &self,
        id: String,
        week_start: DateTime<Utc>,
        week_end: DateTime<Utc>,
        week_timezone: String,
        brief_markdown: String,
        micro_review_markdown: Option<String>,
        entry_count: i64,
        now: DateTime<Utc>,
    ) -> Result<WeeklyBrief, StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO weekly_briefs
                 (id, sync_status, server_version, updated_at_utc, week_start, week_end,
                  week_timezone, brief_markdown, micro_review_markdown, entry_count)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![id, now, week_start, week_end, week_timezone, brief_markdown, micro_review_markdown, entry_count],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                    StoreError::ConstraintViolation(format!(
                        "a brief already exists for week {week_start} in {week_timezone}"
                    ))
                }
                other => StoreError::Sqlite(other),
            })?;
            Ok(())
        })?;
        self.get_weekly_brief(&id)
    }

    pub fn get_weekly_brief(&self, id: &str) -> Result<WeeklyBrief, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM weekly_briefs WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    /// Regenerate a brief's body. Rejects at `regen_count == MAX_REGENERATIONS`
    /// (spec §4.5.2, §8 boundary). Direct markdown edits bypass this path
    /// entirely and are not counted.
    pub fn regenerate_weekly_brief(
        &self,
        id: &str,
        brief_markdown: String,
        now: DateTime<Utc>,
    ) -> Result<WeeklyBrief, StoreError> {
        self.with_transaction(|conn| {
            let regen_count: i64 = conn
                .query_row("SELECT regen_count FROM weekly_briefs WHERE id = ?1", params![id], |r| r.get(0))
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                    other => StoreError::Sqlite(other),
                })?;
            if regen_count >= MAX_REGENERATIONS {
                return Err(StoreError::ConstraintViolation(format!(
                    "brief already regenerated {regen_count} times (max {MAX_REGENERATIONS})"
                )));
            }
            conn.execute(
                "UPDATE weekly_briefs SET brief_markdown = ?1, regen_count = regen_count + 1,
                 sync_status = 'pending', updated_at_utc = ?2 WHERE id = ?3",
                params![brief_markdown, now, id],
            )?;
            Ok(())
        })?;
        self.get_weekly_brief(id)
    }

    /// Direct markdown edit. Does not touch `regen_count`.
    pub fn edit_weekly_brief_markdown(&self, id: &str, brief_markdown: String, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE weekly_briefs SET brief_markdown = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![brief_markdown, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    pub fn get_weekly_brief_for_week(&self, week_start: DateTime<Utc>, week_timezone: &str) -> Result<Option<WeeklyBrief>, StoreError> {
        match self.conn.query_row(
            "SELECT * FROM weekly_briefs WHERE week_start = ?1 AND week_timezone = ?2 AND deleted_at_utc IS NULL",
            params![week_start, week_timezone],
            map_row,
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regeneration_at_cap_is_refused() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let brief = store
            .create_weekly_brief(
                "b1".into(),
                now,
                now,
                "UTC".into(),
                "initial".into(),
                None,
                3,
                now,
            )
            .unwrap();
        let mut id = brief.sync.id.clone();
        for _ in 0..MAX_REGENERATIONS {
            store.regenerate_weekly_brief(&id, "regen".into(), now).unwrap();
        }
        let result = store.regenerate_weekly_brief(&mut id, "regen".into(), now);
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }

    #[test]
    fn only_one_brief_per_week_and_timezone() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .create_weekly_brief("b1".into(), now, now, "UTC".into(), "x".into(), None, 0, now)
            .unwrap();
        let result = store.create_weekly_brief("b2".into(), now, now, "UTC".into(), "y".into(), None, 0, now);
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }
}
