use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
pub(crate) use super::parse_sync_status;
use crate::types::{SessionType, SyncColumns};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceSession {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub session_type: SessionType,
    pub current_state: String,
    pub is_completed: bool,
    pub abstraction_mode: bool,
    pub vagueness_skip_count: i64,
    pub transcript_log: Vec<QaPair>,
    pub session_data: serde_json::Value,
    pub output_markdown: Option<String>,
    pub created_portfolio_version_id: Option<String>,
    pub evaluated_bet_id: Option<String>,
    pub created_bet_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_s: Option<i64>,
    /// Monotonic token bumped on every committed transition; rejects a
    /// duplicate `submit` replayed against the same pre-submission state
    /// (spec §8 idempotent submission).
    pub epoch: i64,
}

pub const MAX_VAGUENESS_SKIPS: i64 = 2;

fn session_type_str(t: SessionType) -> &'static str {
    match t {
        SessionType::Quick => "quick",
        SessionType::Setup => "setup",
        SessionType::Quarterly => "quarterly",
    }
}

fn parse_session_type(s: &str) -> SessionType {
    match s {
        "setup" => SessionType::Setup,
        "quarterly" => SessionType::Quarterly,
        _ => SessionType::Quick,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<GovernanceSession> {
    let session_type: String = row.get("session_type")?;
    let sync_status: String = row.get("sync_status")?;
    let transcript_json: String = row.get("transcript_log_json")?;
    let session_data_json: String = row.get("session_data_json")?;
    Ok(GovernanceSession {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        session_type: parse_session_type(&session_type),
        current_state: row.get("current_state")?,
        is_completed: row.get::<_, i64>("is_completed")? != 0,
        abstraction_mode: row.get::<_, i64>("abstraction_mode")? != 0,
        vagueness_skip_count: row.get("vagueness_skip_count")?,
        transcript_log: serde_json::from_str(&transcript_json).unwrap_or_default(),
        session_data: serde_json::from_str(&session_data_json).unwrap_or(serde_json::json!({})),
        output_markdown: row.get("output_markdown")?,
        created_portfolio_version_id: row.get("created_portfolio_version_id")?,
        evaluated_bet_id: row.get("evaluated_bet_id")?,
        created_bet_id: row.get("created_bet_id")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        duration_s: row.get("duration_s")?,
        epoch: row.get("epoch")?,
    })
}

impl Store {
    /// Start a new session. Fails with `ConstraintViolation` if another
    /// session is already in progress (spec §4.4: at most one
    /// `is_completed=false` session at a time).
    pub fn start_session(
        &self,
        id: String,
        session_type: SessionType,
        initial_state: &str,
        now: DateTime<Utc>,
    ) -> Result<GovernanceSession, StoreError> {
        self.with_transaction(|conn| {
            let in_progress: i64 = conn.query_row(
                "SELECT COUNT(*) FROM governance_sessions WHERE is_completed = 0 AND deleted_at_utc IS NULL",
                [],
                |r| r.get(0),
            )?;
            if in_progress > 0 {
                return Err(StoreError::ConstraintViolation(
                    "a governance session is already in progress".into(),
                ));
            }
            conn.execute(
                "INSERT INTO governance_sessions
                 (id, sync_status, server_version, updated_at_utc, session_type, current_state,
                  started_at)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?2)",
                params![id, now, session_type_str(session_type), initial_state],
            )?;
            Ok(())
        })?;
        self.get_session(&id)
    }

    pub fn get_session(&self, id: &str) -> Result<GovernanceSession, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM governance_sessions WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    /// Resume the sole in-progress session after a crash (spec §4.4).
    pub fn get_in_progress_session(&self) -> Result<Option<GovernanceSession>, StoreError> {
        match self.conn.query_row(
            "SELECT * FROM governance_sessions WHERE is_completed = 0 AND deleted_at_utc IS NULL",
            [],
            map_row,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Commit one FSM transition: new state, appended transcript entry,
    /// updated session data, and epoch bump, all in one transaction
    /// (spec §4.4 persistence discipline).
    #[allow(clippy::too_many_arguments)]
    pub fn commit_transition(
        &self,
        id: &str,
        expected_epoch: i64,
        new_state: &str,
        appended_qa: Option<&QaPair>,
        session_data: &serde_json::Value,
        vagueness_skip_count: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<GovernanceSession, StoreError> {
        self.with_transaction(|conn| {
            let current_epoch: i64 = conn
                .query_row(
                    "SELECT epoch FROM governance_sessions WHERE id = ?1 AND deleted_at_utc IS NULL",
                    params![id],
                    |r| r.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                    other => StoreError::Sqlite(other),
                })?;
            if current_epoch != expected_epoch {
                return Err(StoreError::ConflictingVersion {
                    expected: expected_epoch,
                    found: current_epoch,
                });
            }

            let transcript_json: String = conn.query_row(
                "SELECT transcript_log_json FROM governance_sessions WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )?;
            let mut transcript: Vec<QaPair> = serde_json::from_str(&transcript_json).unwrap_or_default();
            if let Some(qa) = appended_qa {
                transcript.push(qa.clone());
            }
            let transcript_json = serde_json::to_string(&transcript).unwrap();
            let data_json = serde_json::to_string(session_data).unwrap();

            conn.execute(
                "UPDATE governance_sessions SET current_state = ?1, transcript_log_json = ?2,
                 session_data_json = ?3, vagueness_skip_count = COALESCE(?4, vagueness_skip_count),
                 epoch = epoch + 1, sync_status = 'pending', updated_at_utc = ?5
                 WHERE id = ?6",
                params![new_state, transcript_json, data_json, vagueness_skip_count, now, id],
            )?;
            Ok(())
        })?;
        self.get_session(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn complete_session(
        &self,
        id: &str,
        output_markdown: Option<&str>,
        created_portfolio_version_id: Option<&str>,
        evaluated_bet_id: Option<&str>,
        created_bet_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<GovernanceSession, StoreError> {
        self.with_transaction(|conn| {
            let started_at: DateTime<Utc> = conn.query_row(
                "SELECT started_at FROM governance_sessions WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )?;
            let duration_s = (now - started_at).num_seconds();
            let affected = conn.execute(
                "UPDATE governance_sessions SET is_completed = 1, completed_at = ?1,
                 duration_s = ?2, output_markdown = ?3, created_portfolio_version_id = ?4,
                 evaluated_bet_id = ?5, created_bet_id = ?6, sync_status = 'pending',
                 updated_at_utc = ?1 WHERE id = ?7 AND deleted_at_utc IS NULL",
                params![
                    now,
                    duration_s,
                    output_markdown,
                    created_portfolio_version_id,
                    evaluated_bet_id,
                    created_bet_id,
                    id,
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })?;
        self.get_session(id)
    }

    pub fn abandon_session(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE governance_sessions SET deleted_at_utc = ?1, sync_status = 'pending',
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

    #[test]
    fn only_one_in_progress_session_allowed() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store
            .start_session("s1".into(), SessionType::Quick, "Q1", now)
            .unwrap();
        let err = store.start_session("s2".into(), SessionType::Quick, "Q1", now);
        assert!(matches!(err, Err(StoreError::ConstraintViolation(_))));
    }

    #[test]
    fn duplicate_submission_rejected_by_epoch_mismatch() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let session = store
            .start_session("s1".into(), SessionType::Quick, "Q1", now)
            .unwrap();
        let qa = QaPair {
            question: "Q1".into(),
            answer: "a1".into(),
        };
        store
            .commit_transition(&session.sync.id, session.epoch, "Q2", Some(&qa), &serde_json::json!({}), None, now)
            .unwrap();

        // Replaying the same stale epoch is rejected, not double-applied.
        let result = store.commit_transition(
            &session.sync.id,
            session.epoch,
            "Q2",
            Some(&qa),
            &serde_json::json!({}),
            None,
            now,
        );
        assert!(matches!(result, Err(StoreError::ConflictingVersion { .. })));

        let reloaded = store.get_session(&session.sync.id).unwrap();
        assert_eq!(reloaded.transcript_log.len(), 1);
    }
}
