//! Shared entity types (spec §3). Every entity carries the five sync
//! columns; component modules add the entity-specific fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `sync_status` as defined in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
    Conflict,
}

/// The five sync columns shared by every entity in the data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncColumns {
    pub id: String,
    pub sync_status: SyncStatus,
    pub server_version: i64,
    pub updated_at_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at_utc: Option<DateTime<Utc>>,
}

impl SyncColumns {
    pub fn new(id: String, now: DateTime<Utc>) -> Self {
        SyncColumns {
            id,
            sync_status: SyncStatus::Pending,
            server_version: 0,
            updated_at_utc: now,
            deleted_at_utc: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at_utc.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Appreciating,
    Depreciating,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Voice,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Open,
    Correct,
    Wrong,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Decision,
    Artifact,
    Calendar,
    Proxy,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrength {
    Strong,
    Medium,
    Weak,
    None,
}

impl EvidenceType {
    /// Default strength by type (spec §3 `EvidenceItem`), before any
    /// validator adjustment.
    pub fn default_strength(self) -> EvidenceStrength {
        match self {
            EvidenceType::Decision => EvidenceStrength::Strong,
            EvidenceType::Artifact => EvidenceStrength::Strong,
            EvidenceType::Calendar => EvidenceStrength::Weak,
            EvidenceType::Proxy => EvidenceStrength::Medium,
            EvidenceType::None => EvidenceStrength::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    RoleChange,
    ScopeChange,
    DirectionShift,
    TimeDrift,
    Annual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Quick,
    Setup,
    Quarterly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    Accountability,
    MarketReality,
    Avoidance,
    LongTermPositioning,
    DevilsAdvocate,
    PortfolioDefender,
    OpportunityScout,
}

impl RoleType {
    pub const CORE: [RoleType; 5] = [
        RoleType::Accountability,
        RoleType::MarketReality,
        RoleType::Avoidance,
        RoleType::LongTermPositioning,
        RoleType::DevilsAdvocate,
    ];

    pub const GROWTH: [RoleType; 2] = [RoleType::PortfolioDefender, RoleType::OpportunityScout];

    pub fn is_growth(self) -> bool {
        matches!(self, RoleType::PortfolioDefender | RoleType::OpportunityScout)
    }
}
