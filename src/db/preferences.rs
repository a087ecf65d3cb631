use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::config::AbstractionDefaults;
use crate::types::SyncColumns;

/// The one `UserPreferences` row per device (spec §3, §5 singleton).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub abstraction_defaults: AbstractionDefaults,
    pub remember_choice: bool,
    pub analytics_opt_in: bool,
    pub onboarding_completed: bool,
    pub total_entry_count: i64,
    pub setup_prompt_dismissed: bool,
    pub setup_prompt_last_shown: Option<DateTime<Utc>>,
}

const SINGLETON_ID: &str = "user-preferences-singleton";

fn map_row(row: &Row) -> rusqlite::Result<UserPreferences> {
    let sync_status: String = row.get("sync_status")?;
    let defaults_json: String = row.get("abstraction_defaults_json")?;
    Ok(UserPreferences {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        abstraction_defaults: serde_json::from_str(&defaults_json).unwrap_or_default(),
        remember_choice: row.get::<_, i64>("remember_choice")? != 0,
        analytics_opt_in: row.get::<_, i64>("analytics_opt_in")? != 0,
        onboarding_completed: row.get::<_, i64>("onboarding_completed")? != 0,
        total_entry_count: row.get("total_entry_count")?,
        setup_prompt_dismissed: row.get::<_, i64>("setup_prompt_dismissed")? != 0,
        setup_prompt_last_shown: row.get("setup_prompt_last_shown")?,
    })
}

impl Store {
    pub fn get_or_create_user_preferences(&self, now: DateTime<Utc>) -> Result<UserPreferences, StoreError> {
        if let Some(existing) = self.try_get_user_preferences()? {
            return Ok(existing);
        }
        let defaults_json = serde_json::to_string(&AbstractionDefaults::default()).unwrap();
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO user_preferences
                 (id, sync_status, server_version, updated_at_utc, abstraction_defaults_json)
                 VALUES (?1, 'pending', 0, ?2, ?3)",
                params![SINGLETON_ID, now, defaults_json],
            )?;
            Ok(())
        })?;
        self.try_get_user_preferences()?
            .ok_or_else(|| StoreError::NotFound(SINGLETON_ID.to_string()))
    }

    fn try_get_user_preferences(&self) -> Result<Option<UserPreferences>, StoreError> {
        match self.conn.query_row(
            "SELECT * FROM user_preferences WHERE id = ?1",
            params![SINGLETON_ID],
            map_row,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn increment_total_entry_count(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.get_or_create_user_preferences(now)?;
        self.with_transaction(|conn| {
            conn.execute(
                "UPDATE user_preferences SET total_entry_count = total_entry_count + 1,
                 sync_status = 'pending', updated_at_utc = ?1 WHERE id = ?2",
                params![now, SINGLETON_ID],
            )?;
            Ok(())
        })
    }

    pub fn set_setup_prompt_dismissed(&self, dismissed: bool, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.get_or_create_user_preferences(now)?;
        self.with_transaction(|conn| {
            conn.execute(
                "UPDATE user_preferences SET setup_prompt_dismissed = ?1, setup_prompt_last_shown = ?2,
                 sync_status = 'pending', updated_at_utc = ?2 WHERE id = ?3",
                params![dismissed as i64, now, SINGLETON_ID],
            )?;
            Ok(())
        })
    }
}
