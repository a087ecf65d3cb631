use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::SyncColumns;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioHealth {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub appreciating_pct: i64,
    pub depreciating_pct: i64,
    pub stable_pct: i64,
    pub risk_stmt: Option<String>,
    pub opportunity_stmt: Option<String>,
    pub portfolio_version: i64,
}

const SINGLETON_ID: &str = "portfolio-health-singleton";

fn map_health_row(row: &Row) -> rusqlite::Result<PortfolioHealth> {
    let sync_status: String = row.get("sync_status")?;
    Ok(PortfolioHealth {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        appreciating_pct: row.get("appreciating_pct")?,
        depreciating_pct: row.get("depreciating_pct")?,
        stable_pct: row.get("stable_pct")?,
        risk_stmt: row.get("risk_stmt")?,
        opportunity_stmt: row.get("opportunity_stmt")?,
        portfolio_version: row.get("portfolio_version")?,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioVersion {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub version_number: i64,
    pub snapshot_json: String,
    pub trigger_reason: String,
}

fn map_version_row(row: &Row) -> rusqlite::Result<PortfolioVersion> {
    let sync_status: String = row.get("sync_status")?;
    Ok(PortfolioVersion {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        version_number: row.get("version_number")?,
        snapshot_json: row.get("snapshot_json")?,
        trigger_reason: row.get("trigger_reason")?,
    })
}

impl Store {
    /// Upsert the singleton `PortfolioHealth` row.
    pub fn upsert_portfolio_health(
        &self,
        appreciating_pct: i64,
        depreciating_pct: i64,
        stable_pct: i64,
        risk_stmt: Option<&str>,
        opportunity_stmt: Option<&str>,
        portfolio_version: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO portfolio_health
                 (id, sync_status, server_version, updated_at_utc, appreciating_pct,
                  depreciating_pct, stable_pct, risk_stmt, opportunity_stmt, portfolio_version)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   sync_status = 'pending', updated_at_utc = ?2, appreciating_pct = ?3,
                   depreciating_pct = ?4, stable_pct = ?5, risk_stmt = ?6,
                   opportunity_stmt = ?7, portfolio_version = ?8",
                params![
                    SINGLETON_ID,
                    now,
                    appreciating_pct,
                    depreciating_pct,
                    stable_pct,
                    risk_stmt,
                    opportunity_stmt,
                    portfolio_version,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_portfolio_health(&self) -> Result<Option<PortfolioHealth>, StoreError> {
        match self.conn.query_row(
            "SELECT * FROM portfolio_health WHERE id = ?1",
            params![SINGLETON_ID],
            map_health_row,
        ) {
            Ok(h) => Ok(Some(h)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Append a new, strictly-increasing `PortfolioVersion` snapshot
    /// (spec §3, append-only).
    pub fn append_portfolio_version(
        &self,
        id: String,
        snapshot_json: String,
        trigger_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<PortfolioVersion, StoreError> {
        self.with_transaction(|conn| {
            let next_version: i64 = conn.query_row(
                "SELECT COALESCE(MAX(version_number), 0) + 1 FROM portfolio_versions",
                [],
                |r| r.get(0),
            )?;
            conn.execute(
                "INSERT INTO portfolio_versions
                 (id, sync_status, server_version, updated_at_utc, version_number,
                  snapshot_json, trigger_reason)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5)",
                params![id, now, next_version, snapshot_json, trigger_reason],
            )?;
            Ok(())
        })?;
        self.get_portfolio_version_by_number(self.latest_portfolio_version_number()?.unwrap_or(1))
    }

    pub fn latest_portfolio_version_number(&self) -> Result<Option<i64>, StoreError> {
        let version: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(version_number), 0) FROM portfolio_versions",
            [],
            |r| r.get(0),
        )?;
        Ok(if version == 0 { None } else { Some(version) })
    }

    pub fn get_portfolio_version_by_number(
        &self,
        version_number: i64,
    ) -> Result<PortfolioVersion, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM portfolio_versions WHERE version_number = ?1",
                params![version_number],
                map_version_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("portfolio version {version_number}"))
                }
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_portfolio_versions(&self) -> Result<Vec<PortfolioVersion>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM portfolio_versions ORDER BY version_number ASC")?;
        let rows = stmt.query_map([], map_version_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The composite snapshot a `PortfolioVersion` carries: problems,
    /// health, board anchoring, and trigger definitions (spec "snapshot
    /// of the portfolio plus board anchoring, health, and trigger
    /// definitions").
    pub fn build_portfolio_snapshot(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({
            "problems": self.list_active_problems()?,
            "health": self.get_portfolio_health()?,
            "board_anchoring": self.list_board_members()?,
            "triggers": self.list_triggers()?,
        }))
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Appending N snapshots, in any order of trigger reasons, always
        /// yields version numbers `1..=N` with no gaps or repeats (spec
        /// §3 append-only, strictly-increasing `version_number`).
        #[test]
        fn version_numbers_are_monotonic_and_gapless(reasons in prop::collection::vec("[a-z_]{1,12}", 1..12)) {
            let store = Store::open_in_memory().unwrap();
            let now = Utc::now();
            for (i, reason) in reasons.iter().enumerate() {
                let v = store.append_portfolio_version(format!("v{i}"), "{}".into(), reason, now).unwrap();
                prop_assert_eq!(v.version_number, (i + 1) as i64);
            }
            let all = store.list_portfolio_versions().unwrap();
            let numbers: Vec<i64> = all.iter().map(|v| v.version_number).collect();
            let expected: Vec<i64> = (1..=reasons.len() as i64).collect();
            prop_assert_eq!(numbers, expected);
        }
    }
}
