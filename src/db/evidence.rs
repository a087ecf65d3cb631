use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{Store, StoreError};
use crate::types::{EvidenceStrength, EvidenceType, SyncColumns};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    #[serde(flatten)]
    pub sync: SyncColumns,
    pub session_id: String,
    pub problem_id: Option<String>,
    pub evidence_type: EvidenceType,
    pub statement_text: String,
    pub strength: EvidenceStrength,
    pub context: Option<String>,
}

fn evidence_type_str(t: EvidenceType) -> &'static str {
    match t {
        EvidenceType::Decision => "decision",
        EvidenceType::Artifact => "artifact",
        EvidenceType::Calendar => "calendar",
        EvidenceType::Proxy => "proxy",
        EvidenceType::None => "none",
    }
}

fn parse_evidence_type(s: &str) -> EvidenceType {
    match s {
        "decision" => EvidenceType::Decision,
        "artifact" => EvidenceType::Artifact,
        "calendar" => EvidenceType::Calendar,
        "proxy" => EvidenceType::Proxy,
        _ => EvidenceType::None,
    }
}

fn strength_str(s: EvidenceStrength) -> &'static str {
    match s {
        EvidenceStrength::Strong => "strong",
        EvidenceStrength::Medium => "medium",
        EvidenceStrength::Weak => "weak",
        EvidenceStrength::None => "none",
    }
}

fn parse_strength(s: &str) -> EvidenceStrength {
    match s {
        "strong" => EvidenceStrength::Strong,
        "medium" => EvidenceStrength::Medium,
        "weak" => EvidenceStrength::Weak,
        _ => EvidenceStrength::None,
    }
}

/// Ordinal rank, strongest first, so weakening can be checked as a
/// simple comparison.
fn strength_rank(s: EvidenceStrength) -> u8 {
    match s {
        EvidenceStrength::Strong => 3,
        EvidenceStrength::Medium => 2,
        EvidenceStrength::Weak => 1,
        EvidenceStrength::None => 0,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<EvidenceItem> {
    let evidence_type: String = row.get("evidence_type")?;
    let strength: String = row.get("strength")?;
    let sync_status: String = row.get("sync_status")?;
    Ok(EvidenceItem {
        sync: SyncColumns {
            id: row.get("id")?,
            sync_status: super::parse_sync_status(&sync_status),
            server_version: row.get("server_version")?,
            updated_at_utc: row.get("updated_at_utc")?,
            deleted_at_utc: row.get("deleted_at_utc")?,
        },
        session_id: row.get("session_id")?,
        problem_id: row.get("problem_id")?,
        evidence_type: parse_evidence_type(&evidence_type),
        statement_text: row.get("statement_text")?,
        strength: parse_strength(&strength),
        context: row.get("context")?,
    })
}

impl Store {
    /// Insert an evidence item. If `strength` is `None`, the type default
    /// from spec §4.2 is used.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_evidence_item(
        &self,
        id: String,
        session_id: String,
        problem_id: Option<String>,
        evidence_type: EvidenceType,
        statement_text: String,
        strength: Option<EvidenceStrength>,
        context: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<EvidenceItem, StoreError> {
        let strength = strength.unwrap_or_else(|| evidence_type.default_strength());
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO evidence_items
                 (id, sync_status, server_version, updated_at_utc, session_id, problem_id,
                  evidence_type, statement_text, strength, context)
                 VALUES (?1, 'pending', 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    now,
                    session_id,
                    problem_id,
                    evidence_type_str(evidence_type),
                    statement_text,
                    strength_str(strength),
                    context,
                ],
            )?;
            Ok(())
        })?;
        self.get_evidence_item(&id)
    }

    pub fn get_evidence_item(&self, id: &str) -> Result<EvidenceItem, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM evidence_items WHERE id = ?1 AND deleted_at_utc IS NULL",
                params![id],
                map_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn list_evidence_for_session(&self, session_id: &str) -> Result<Vec<EvidenceItem>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM evidence_items WHERE session_id = ?1 AND deleted_at_utc IS NULL",
        )?;
        let rows = stmt.query_map(params![session_id], map_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Weaken (never strengthen) a strength label, as the validator is
    /// allowed to do (spec §4.5.5). Rejects any `new_strength` that
    /// outranks the item's current strength.
    pub fn weaken_evidence_strength(
        &self,
        id: &str,
        new_strength: EvidenceStrength,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let current = self.get_evidence_item(id)?;
        if strength_rank(new_strength) > strength_rank(current.strength) {
            return Err(StoreError::ConstraintViolation(format!(
                "evidence item {id} cannot be strengthened from {:?} to {:?}",
                current.strength, new_strength
            )));
        }
        self.with_transaction(|conn| {
            let affected = conn.execute(
                "UPDATE evidence_items SET strength = ?1, sync_status = 'pending',
                 updated_at_utc = ?2 WHERE id = ?3 AND deleted_at_utc IS NULL",
                params![strength_str(new_strength), now, id],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}
