use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{RoleType, SyncColumns};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub background: String,
    pub communication_style: String,
    #[serde(default)]
    pub signature_phrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMember {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub role_type: RoleType,
    pub is_growth_role: bool,
    pub is_active: bool,
    pub anchored_problem_id: Option<String>,
    pub anchored_demand: Option<String>,
    pub persona: Persona,
    pub original_persona: Persona,
}

fn role_str(r: RoleType) -> &'static str {
    match r {
        RoleType::Accountability => "accountability",
        RoleType::MarketReality => "market_reality",
        RoleType::Avoidance => "avoidance",
        RoleType::LongTermPositioning => "long_term_positioning",
        RoleType::DevilsAdvocate => "devils_advocate",
        RoleType::PortfolioDefender => "portfolio_defender",
        RoleType::OpportunityScout => "opportunity_scout",
    }
}

fn parse_role(s: &str) -> RoleType {
    match s {
        "accountability" => RoleType::Accountability,
        "market_reality" => RoleType::MarketReality,
        "avoidance" => RoleType::Avoidance,
        "long_term_positioning" => RoleType::LongTermPositioning,
        "devils_advocate" => RoleType::DevilsAdvocate,
        "portfolio_defender" => RoleType::PortfolioDefender,
        _ => RoleType::OpportunityScout,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<BoardMember> {
    let role_type: String = row.get("role_type")?;
    let sync_status: String = row.get("sync_status")?;
    let original_json: String = row.get("original_persona_json")?;
    Ok(BoardMember {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        role_type: parse_role(&role_type),
        is_growth_role: row.get::<_, i64>("is_growth_role")? != 0,
        is_active: row.get::<_, i64>("is_active")? != 0,
        anchored_problem_id: row.get("anchored_problem_id")?,
        anchored_demand: row.get("anchored_demand")?,
        persona: Persona {
            name: row.get("persona_name")?,
            background: row.get("persona_background")?,
            communication_style: row.get("persona_communication_style")?,
            signature_phrase: row.get("persona_signature_phrase")?,
        },
        original_persona: serde_json::from_str(&original_json).unwrap_or(Persona {
            name: String::new(),
            background: String::new(),
            communication_style: String::new(),
            signature_phrase: String::new(),
        }),
    })
}

#[derive(Debug, Clone)]
pub struct NewBoardMember {
    pub id: String,
    pub role_type: RoleType,
    pub is_growth_role: bool,
    pub is_active: bool,
    pub anchored_problem_id: Option<String>,
    pub anchored_demand: Option<String>,
    pub persona: Persona,
}

impl Store {
    pub fn insert_board_member(&self, m: &NewBoardMember, now: DateTime<Utc>) -> Result<(), StoreError> {
        let original_json = serde_json::to_string(&m.persona).unwrap();
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO board_members
                 (id, sync_status, server_version, updated_at_utc, role_type, is_growth_role,
                  is_active, anchored_problem_id, anchored_demand, persona_name,
                  persona_background, persona_communication_style, persona_signature_phrase,
                  original_persona_json)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    m.id,
                    now,
                    role_str(m.role_type),
                    m.is_growth_role as i64,
                    m.is_active as i64,
                    m.anchored_problem_id,
                    m.anchored_demand,
                    m.persona.name,
                    m.persona.background,
                    m.persona.communication_style,
                    m.persona.signature_phrase,
                    original_json,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_board_members(&self) -> Result<Vec<BoardMember>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM board_members WHERE deleted_at_utc IS NULL ORDER BY role_type ASC")?;
        let rows = stmt.query_map([], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_board_members_anchored_to(&self, problem_id: &str) -> Result<Vec<BoardMember>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM board_members WHERE deleted_at_utc IS NULL AND anchored_problem_id = ?1",
        )?;
        let rows = stmt.query_map(params![problem_id], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_board_member_anchor(
        &self,
        id: &str,
        anchored_problem_id: Option<&str>,
        anchored_demand: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE board_members SET anchored_problem_id = ?1, anchored_demand = ?2,
                 sync_status = 'pending', updated_at_utc = ?3 WHERE id = ?4 AND deleted_at_utc IS NULL",
                params![anchored_problem_id, anchored_demand, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    pub fn set_board_member_active(&self, id: &str, is_active: bool, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE board_members SET is_active = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![is_active as i64, now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }

    /// Soft-deletes every currently active board member, so re-setup
    /// (spec §4.6) rebuilds the board from scratch instead of
    /// accumulating a second copy alongside the first.
    pub fn soft_delete_all_board_members(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "UPDATE board_members SET deleted_at_utc = ?1, sync_status = 'pending',
                 updated_at_utc = ?1 WHERE deleted_at_utc IS NULL",
                params![now],
            )?;
            Ok(())
        })
    }
}
