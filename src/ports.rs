//! External collaborator contracts (spec §6).
//!
//! The core makes no assumptions about these beyond the trait contracts
//! below; platform UI, audio capture, transcription vendors, OAuth
//! handshakes, push delivery, key storage, and HTTP transport all live
//! on the other side of these seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::CoreError;

/// Wall-clock access, injected so FSM/bet/trigger logic is deterministic
/// under test (spec §14 `FakeClock`).
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_in_zone(&self, tz: &str) -> DateTime<chrono_tz::Tz> {
        let zone: chrono_tz::Tz = tz.parse().unwrap_or(chrono_tz::UTC);
        self.now_utc().with_timezone(&zone)
    }
}

/// Source of v4-quality random bytes for ids and opaque tokens.
pub trait RandomSource: Send + Sync {
    fn new_id(&self) -> uuid::Uuid;
    fn token_bytes(&self, len: usize) -> Vec<u8>;
}

/// Model tier selects a constant policy; provider identity is opaque
/// to the core (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Daily,
    Governance,
}

/// One message in a prompt, already laid out in the six sections of
/// spec §4.3.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
}

#[async_trait]
pub trait LLMPort: Send + Sync {
    /// Request a schema-validated JSON completion. `deadline` bounds the
    /// call; cancellation must never commit partial output.
    async fn complete(
        &self,
        tier: ModelTier,
        messages: &[Message],
        schema: &Value,
        deadline: Duration,
    ) -> Result<Value, CoreError>;
}

#[async_trait]
pub trait TranscriptionPort: Send + Sync {
    async fn transcribe(&self, audio_bytes: &[u8], deadline: Duration) -> Result<String, CoreError>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
}

/// One wire delta as defined in spec §4.7/§6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    pub id: String,
    pub kind: String,
    pub server_version: i64,
    pub updated_at_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub entries: Vec<Delta>,
}

/// Per-row push result: either the server assigned a new version, or a
/// conflict was detected against `current_server_version`.
#[derive(Debug, Clone)]
pub enum PushResult {
    Accepted { id: String, new_server_version: i64 },
    Conflict { id: String, current_server_version: i64, current_payload: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingResult {
    Ok,
    UpgradeRequired,
}

#[async_trait]
pub trait RemoteSyncPort: Send + Sync {
    async fn pull(&self, since: Option<&str>) -> Result<Batch, CoreError>;
    async fn push(&self, batch: &[Delta]) -> Result<Vec<PushResult>, CoreError>;
    async fn ping(&self) -> Result<PingResult, CoreError>;
}
