use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{Direction, SyncColumns};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub name: String,
    pub what_breaks: String,
    pub scarcity_signals: Vec<String>,
    pub direction: Direction,
    pub direction_rationale: String,
    pub evidence_quotes: [String; 3],
    pub time_allocation_pct: i64,
    pub display_order: i64,
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "appreciating" => Direction::Appreciating,
        "depreciating" => Direction::Depreciating,
        _ => Direction::Stable,
    }
}

pub fn direction_str(d: Direction) -> &'static str {
    match d {
        Direction::Appreciating => "appreciating",
        Direction::Depreciating => "depreciating",
        Direction::Stable => "stable",
    }
}

fn map_row(row: &Row) -> rusqlite::Result<Problem> {
    let scarcity_json: String = row.get("scarcity_signals_json")?;
    let quotes_json: String = row.get("evidence_quotes_json")?;
    let quotes: Vec<String> = serde_json::from_str(&quotes_json).unwrap_or_default();
    let direction: String = row.get("direction")?;
    let sync_status: String = row.get("sync_status")?;
    Ok(Problem {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        name: row.get("name")?,
        what_breaks: row.get("what_breaks")?,
        scarcity_signals: serde_json::from_str(&scarcity_json).unwrap_or_default(),
        direction: parse_direction(&direction),
        direction_rationale: row.get("direction_rationale")?,
        evidence_quotes: [
            quotes.first().cloned().unwrap_or_default(),
            quotes.get(1).cloned().unwrap_or_default(),
            quotes.get(2).cloned().unwrap_or_default(),
        ],
        time_allocation_pct: row.get("time_allocation_pct")?,
        display_order: row.get("display_order")?,
    })
}

#[derive(Debug, Clone)]
pub struct NewProblem {
    pub id: String,
    pub name: String,
    pub what_breaks: String,
    pub scarcity_signals: Vec<String>,
    pub direction: Direction,
    pub direction_rationale: String,
    pub evidence_quotes: [String; 3],
    pub time_allocation_pct: i64,
    pub display_order: i64,
}

impl Store {
    pub fn insert_problem(&self, p: &NewProblem, now: DateTime<Utc>) -> Result<(), StoreError> {
        let scarcity_json = serde_json::to_string(&p.scarcity_signals).unwrap();
        let quotes_json = serde_json::to_string(&p.evidence_quotes).unwrap();
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO problems
                 (id, sync_status, server_version, updated_at_utc, name, what_breaks,
                  scarcity_signals_json, direction, direction_rationale, evidence_quotes_json,
                  time_allocation_pct, display_order)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    p.id,
                    now,
                    p.name,
                    p.what_breaks,
                    scarcity_json,
                    direction_str(p.direction),
                    p.direction_rationale,
                    quotes_json,
                    p.time_allocation_pct,
                    p.display_order,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_active_problems(&self) -> Result<Vec<Problem>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM problems WHERE deleted_at_utc IS NULL ORDER BY display_order ASC",
        )?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_problem(&self, id: &str) -> Result<Problem, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM problems WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn update_problem_allocation(
        &self,
        id: &str,
        time_allocation_pct: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE problems SET time_allocation_pct = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![time_allocation_pct, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    pub fn update_problem_description(
        &self,
        id: &str,
        what_breaks: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE problems SET what_breaks = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![what_breaks, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    pub fn soft_delete_problem(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE problems SET deleted_at_utc = ?1, sync_status = 'pending',
                 updated_at_utc = ?1 WHERE id = ?2 AND deleted_at_utc IS NULL",
                params![now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Soft-deletes every currently active problem. Re-setup (spec
    /// §4.6 "direction change and problem addition require full
    /// re-setup") replaces the whole portfolio rather than appending
    /// to it.
    pub fn soft_delete_all_active_problems(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "UPDATE problems SET deleted_at_utc = ?1, sync_status = 'pending',
                 updated_at_utc = ?1 WHERE deleted_at_utc IS NULL",
                params![now],
            )?;
            Ok(())
        })
    }
}
