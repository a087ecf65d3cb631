use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{BetStatus, SyncColumns};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub prediction: String,
    pub wrong_if: String,
    pub status: BetStatus,
    pub source_session_id: String,
    pub evaluation_session_id: Option<String>,
    pub created_at_utc: DateTime<Utc>,
    pub due_at_utc: DateTime<Utc>,
    pub evaluated_at_utc: Option<DateTime<Utc>>,
}

/// Bets are due exactly 90 days after creation (spec §3, §8).
pub const BET_DURATION_DAYS: i64 = 90;

fn status_str(s: BetStatus) -> &'static str {
    match s {
        BetStatus::Open => "open",
        BetStatus::Correct => "correct",
        BetStatus::Wrong => "wrong",
        BetStatus::Expired => "expired",
    }
}

fn parse_status(s: &str) -> BetStatus {
    match s {
        "correct" => BetStatus::Correct,
        "wrong" => BetStatus::Wrong,
        "expired" => BetStatus::Expired,
        _ => BetStatus::Open,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<Bet> {
    let status: String = row.get("status")?;
    let sync_status: String = row.get("sync_status")?;
    Ok(Bet {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        prediction: row.get("prediction")?,
        wrong_if: row.get("wrong_if")?,
        status: parse_status(&status),
        source_session_id: row.get("source_session_id")?,
        evaluation_session_id: row.get("evaluation_session_id")?,
        created_at_utc: row.get("created_at_utc")?,
        due_at_utc: row.get("due_at_utc")?,
        evaluated_at_utc: row.get("evaluated_at_utc")?,
    })
}

impl Store {
    pub fn create_bet(
        &self,
        id: String,
        prediction: String,
        wrong_if: String,
        source_session_id: String,
        created_at_utc: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Bet, StoreError> {
        if wrong_if.trim().is_empty() {
            return Err(StoreError::ConstraintViolation("wrong_if must not be empty".into()));
        }
        let due_at_utc = created_at_utc + Duration::days(BET_DURATION_DAYS);
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO bets
                 (id, sync_status, server_version, updated_at_utc, prediction, wrong_if, status,
                  source_session_id, created_at_utc, due_at_utc)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, 'open', ?5, ?6, ?7)",
                params![id, now, prediction, wrong_if, source_session_id, created_at_utc, due_at_utc],
            )?;
            Ok(())
        })?;
        self.get_bet(&id)
    }

    pub fn get_bet(&self, id: &str) -> Result<Bet, StoreError> {
        self.conn
            .query_row("SELECT * FROM bets WHERE id = ?1 AND deleted_at_utc IS NULL", params![id], map_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_open_bets_due_before(&self, now: DateTime<Utc>) -> Result<Vec<Bet>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM bets WHERE status = 'open' AND due_at_utc <= ?1 AND deleted_at_utc IS NULL",
        )?;
        let rows = stmt.query_map(params![now], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn most_recent_bet(&self) -> Result<Option<Bet>, StoreError> {
        match self.conn.query_row(
            "SELECT * FROM bets WHERE deleted_at_utc IS NULL ORDER BY created_at_utc DESC LIMIT 1",
            [],
            map_row,
        ) {
            Ok(b) => Ok(Some(b)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Apply the status transition from the domain validator. Idempotent:
    /// re-applying an `open -> expired` transition on an already-expired
    /// bet (same target) is a no-op success (spec §8).
    pub fn set_bet_status(
        &self,
        id: &str,
        new_status: BetStatus,
        evaluation_session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Bet, StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE bets SET status = ?1, evaluation_session_id = COALESCE(?2, evaluation_session_id),
                 evaluated_at_utc = ?3, sync_status = 'pending', updated_at_utc = ?3
                 WHERE id = ?4 AND deleted_at_utc IS NULL",
                params![status_str(new_status), evaluation_session_id, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })?;
        self.get_bet(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_date_is_exactly_90_days_after_creation() {
        let store = Store::open_in_memory().unwrap();
        let created = "2026-01-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let bet = store
            .create_bet("b1".into(), "pred".into(), "wrong if nothing ships".into(), "s1".into(), created, created)
            .unwrap();
        assert_eq!(bet.due_at_utc, "2026-04-15T12:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn empty_wrong_if_rejected() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let result = store.create_bet("b1".into(), "pred".into(), "   ".into(), "s1".into(), now, now);
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }
}
