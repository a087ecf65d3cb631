use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{SyncColumns, TriggerType};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReSetupTrigger {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub trigger_type: TriggerType,
    pub description: String,
    pub condition: String,
    pub recommended_action: String,
    pub is_met: bool,
    pub met_at_utc: Option<DateTime<Utc>>,
    pub due_at_utc: Option<DateTime<Utc>>,
}

pub const ANNUAL_TRIGGER_DAYS: i64 = 365;
/// Approaching-state window (spec §4.6).
pub const APPROACHING_WINDOW_DAYS: i64 = 30;

fn trigger_type_str(t: TriggerType) -> &'static str {
    match t {
        TriggerType::RoleChange => "role_change",
        TriggerType::ScopeChange => "scope_change",
        TriggerType::DirectionShift => "direction_shift",
        TriggerType::TimeDrift => "time_drift",
        TriggerType::Annual => "annual",
    }
}

fn parse_trigger_type(s: &str) -> TriggerType {
    match s {
        "scope_change" => TriggerType::ScopeChange,
        "direction_shift" => TriggerType::DirectionShift,
        "time_drift" => TriggerType::TimeDrift,
        "annual" => TriggerType::Annual,
        _ => TriggerType::RoleChange,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ReSetupTrigger> {
    let trigger_type: String = row.get("trigger_type")?;
    let sync_status: String = row.get("sync_status")?;
    Ok(ReSetupTrigger {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        trigger_type: parse_trigger_type(&trigger_type),
        description: row.get("description")?,
        condition: row.get("condition_text")?,
        recommended_action: row.get("recommended_action")?,
        is_met: row.get::<_, i64>("is_met")? != 0,
        met_at_utc: row.get("met_at_utc")?,
        due_at_utc: row.get("due_at_utc")?,
    })
}

impl Store {
    #[allow(clippy::too_many_arguments)]
    pub fn insert_trigger(
        &self,
        id: String,
        trigger_type: TriggerType,
        description: String,
        condition: String,
        recommended_action: String,
        due_at_utc: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<ReSetupTrigger, StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO resetup_triggers
                 (id, sync_status, server_version, updated_at_utc, trigger_type, description,
                  condition_text, recommended_action, due_at_utc)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![id, now, trigger_type_str(trigger_type), description, condition, recommended_action, due_at_utc],
            )?;
            Ok(())
        })?;
        self.get_trigger(&id)
    }

    /// Create the annual trigger at setup time with `due = setup + 365d`
    /// (spec §3, §4.6).
    pub fn create_annual_trigger(&self, id: String, setup_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<ReSetupTrigger, StoreError> {
        self.insert_trigger(
            id,
            TriggerType::Annual,
            "Annual portfolio refresh".into(),
            "now >= due_at_utc".into(),
            "Run a full re-setup".into(),
            Some(setup_at + Duration::days(ANNUAL_TRIGGER_DAYS)),
            now,
        )
    }

    pub fn get_trigger(&self, id: &str) -> Result<ReSetupTrigger, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM resetup_triggers WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_triggers(&self) -> Result<Vec<ReSetupTrigger>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM resetup_triggers WHERE deleted_at_utc IS NULL")?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_trigger_met(&self, id: &str, is_met: bool, met_at_utc: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE resetup_triggers SET is_met = ?1, met_at_utc = ?2, sync_status = 'pending',
                 updated_at_utc = ?3 WHERE id = ?4 AND deleted_at_utc IS NULL",
                params![is_met as i64, met_at_utc, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}
