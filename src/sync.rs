//! Sync Coordinator: offline queue, delta push/pull, conflict
//! detection, at-most-once application of remote deltas (spec §4.7).
//!
//! Single-threaded cooperative model (spec §5): the coordinator never
//! holds the Store's writer across an `await`. Every suspension point
//! is a `RemoteSyncPort` call or a backoff sleep.

use std::cmp::Ordering as CmpOrdering;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::db::sync_rows::ENTITY_TABLES;
use crate::db::Store;
use crate::error::CoreError;
use crate::ports::{Clock, Delta, PingResult, PushResult, RandomSource, RemoteSyncPort};

/// Highest-first queue priorities (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueuePriority {
    AuthRefresh = 0,
    Transcription = 1,
    Extraction = 2,
    LocalPush = 3,
    RemotePull = 4,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub priority: QueuePriority,
    pub idempotency_key: String,
    pub description: String,
}

/// Persisted (in-memory mirror of `sync_idempotency`) queue: entries
/// are ordered by priority, highest first, FIFO within a priority.
#[derive(Default)]
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        OfflineQueue::default()
    }

    pub fn enqueue(&self, entry: QueueEntry) {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries.iter().position(|e| e.priority > entry.priority).unwrap_or(entries.len());
        entries.insert(pos, entry);
    }

    pub fn pop_next(&self) -> Option<QueueEntry> {
        self.entries.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An idempotency key derived from `(entity_id, operation, server_version_at_enqueue)`
/// (spec §4.7). Processing an entry the Store has already recorded is a
/// no-op, giving at-most-once application.
pub fn idempotency_key(entity_id: &str, operation: &str, server_version_at_enqueue: i64) -> String {
    format!("{entity_id}:{operation}:{server_version_at_enqueue}")
}

impl Store {
    /// True if `key` has already been applied — the at-most-once guard
    /// a queue consumer checks before doing any work.
    pub fn is_idempotency_key_applied(&self, key: &str) -> Result<bool, crate::db::StoreError> {
        let found: Option<String> = self
            .conn_ref()
            .query_row(
                "SELECT idempotency_key FROM sync_idempotency WHERE idempotency_key = ?1",
                rusqlite::params![key],
                |r| r.get(0),
            )
            .ok();
        Ok(found.is_some())
    }

    pub fn record_idempotency_key(&self, key: &str, now: DateTime<Utc>) -> Result<(), crate::db::StoreError> {
        self.with_transaction(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sync_idempotency (idempotency_key, applied_at_utc) VALUES (?1, ?2)",
                rusqlite::params![key, now],
            )?;
            Ok(())
        })
    }
}

/// Exponential backoff for 429/soft-limit backpressure: 5s, capped at
/// 5 minutes, with jitter (spec §4.7).
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Backoff { floor: Duration::from_secs(5), cap: Duration::from_secs(300), attempt: 0 }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next delay, jittered by up to 20%, and advances internal state.
    pub fn next_delay(&mut self, random: &dyn RandomSource) -> Duration {
        let exp = self.floor.as_secs_f64() * 2f64.powi(self.attempt as i32);
        let base = exp.min(self.cap.as_secs_f64());
        self.attempt += 1;
        let jitter_byte = random.token_bytes(1).first().copied().unwrap_or(0);
        let jitter_frac = (jitter_byte as f64 / 255.0) * 0.2;
        Duration::from_secs_f64(base * (1.0 + jitter_frac))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One conflict resolution outcome, for callers that want to surface a
/// "this was also edited on your other device" notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    LocalWins,
    RemoteWins,
}

/// Compares local vs remote timestamps under the last-write-wins policy
/// (spec §4.7): later timestamp wins; a tie favors remote.
pub fn resolve_conflict(local_updated_at: DateTime<Utc>, remote_updated_at: DateTime<Utc>) -> ConflictResolution {
    match local_updated_at.cmp(&remote_updated_at) {
        CmpOrdering::Greater => ConflictResolution::LocalWins,
        CmpOrdering::Less | CmpOrdering::Equal => ConflictResolution::RemoteWins,
    }
}

/// Orchestrates exchange with a `RemoteSyncPort` (spec §4.7). Holds no
/// long-lived connection of its own — each `push`/`pull` call opens a
/// fresh batch against the Store's current state.
pub struct SyncCoordinator<'a> {
    store: &'a Store,
    remote: &'a dyn RemoteSyncPort,
    clock: &'a dyn Clock,
    random: &'a dyn RandomSource,
    queue: OfflineQueue,
    backoff: Mutex<Backoff>,
    cursor: Mutex<Option<String>>,
}

/// One push/pull cycle's outcome, useful for tests and for a caller
/// that wants to log/display what happened.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pushed: usize,
    pub conflicts: usize,
    pub pulled: usize,
    pub skipped_duplicate: usize,
}

impl<'a> SyncCoordinator<'a> {
    pub fn new(store: &'a Store, remote: &'a dyn RemoteSyncPort, clock: &'a dyn Clock, random: &'a dyn RandomSource) -> Self {
        SyncCoordinator {
            store,
            remote,
            clock,
            random,
            queue: OfflineQueue::new(),
            backoff: Mutex::new(Backoff::new()),
            cursor: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    /// `ping()` first, refusing further sync if the remote demands an
    /// upgrade (spec §6 `minimum_client_version`).
    pub async fn check_upgrade_required(&self) -> Result<bool, CoreError> {
        match self.remote.ping().await? {
            PingResult::Ok => Ok(false),
            PingResult::UpgradeRequired => {
                warn!(target: "sync", "remote requires a client upgrade; sync suspended");
                Ok(true)
            }
        }
    }

    /// Push every `pending` row, grouped by entity kind, batched (spec
    /// §4.7). Accepted rows are marked `synced`; conflicts are resolved
    /// by last-write-wins and recorded in the overwrite log when local
    /// loses.
    pub async fn push(&self) -> Result<SyncReport, CoreError> {
        let mut report = SyncReport::default();
        for &table in ENTITY_TABLES {
            let pending = self.store.list_pending_sync_rows(table)?;
            if pending.is_empty() {
                continue;
            }

            let batch: Vec<Delta> = pending
                .iter()
                .map(|row| Delta {
                    id: row.id.clone(),
                    kind: table.to_string(),
                    server_version: row.server_version,
                    updated_at_utc: row.updated_at_utc,
                    deleted_at_utc: row.deleted_at_utc,
                    payload: row.payload.clone(),
                })
                .collect();

            let results = match self.push_with_backoff(&batch).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(target: "sync", table, error = %e, "push failed, leaving rows pending for retry");
                    continue;
                }
            };

            for result in results {
                match result {
                    PushResult::Accepted { id, new_server_version } => {
                        self.store.mark_row_synced(table, &id, new_server_version)?;
                        report.pushed += 1;
                    }
                    PushResult::Conflict { id, current_server_version, current_payload } => {
                        report.conflicts += 1;
                        self.resolve_and_apply_conflict(table, &id, current_server_version, current_payload).await?;
                    }
                }
            }
        }
        Ok(report)
    }

    async fn push_with_backoff(&self, batch: &[Delta]) -> Result<Vec<PushResult>, CoreError> {
        loop {
            match self.remote.push(batch).await {
                Ok(results) => {
                    self.backoff.lock().unwrap().reset();
                    return Ok(results);
                }
                Err(CoreError::RateLimited(_)) => {
                    let delay = self.backoff.lock().unwrap().next_delay(self.random);
                    debug!(target: "sync", delay_ms = delay.as_millis() as u64, "backing off after rate limit");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Applies the last-write-wins policy for one conflicting row,
    /// writing an overwrite-log entry when the local copy loses (spec
    /// §4.7 conflict policy).
    async fn resolve_and_apply_conflict(
        &self,
        table: &str,
        id: &str,
        current_server_version: i64,
        current_payload: serde_json::Value,
    ) -> Result<(), CoreError> {
        let local = self.store.get_sync_row(table, id)?;
        let Some(local) = local else {
            return Ok(());
        };

        let remote_updated_at = current_payload
            .get("updatedAtUtc")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| self.clock.now_utc());

        match resolve_conflict(local.updated_at_utc, remote_updated_at) {
            ConflictResolution::LocalWins => {
                // Remote will catch up on the next pull once we re-push at
                // the server's version; mark conflict so the retry carries
                // the corrected `server_version` instead of fighting forever.
                self.store.mark_row_conflict(table, id)?;
                info!(target: "sync", table, id, "conflict resolved local-wins, will re-push at server version");
            }
            ConflictResolution::RemoteWins => {
                let now = self.clock.now_utc();
                if let Some(local_payload) = &local.payload {
                    self.store.record_overwrite(
                        self.random.new_id().to_string(),
                        table,
                        id,
                        local_payload,
                        local.updated_at_utc,
                        remote_updated_at,
                        now,
                    )?;
                }
                self.store.overwrite_row_from_remote(
                    table,
                    id,
                    current_server_version,
                    remote_updated_at,
                    None,
                    current_payload.get("payload"),
                )?;
                info!(target: "sync", table, id, "conflict resolved remote-wins, local payload recorded in overwrite log");
            }
        }
        Ok(())
    }

    /// Pulls everything since the last cursor and applies it in one
    /// transaction per batch, ordered by `updated_at_utc` (spec §4.7
    /// "Pull"). Idempotency keys guard against re-applying a delta this
    /// device has already seen.
    pub async fn pull(&self) -> Result<SyncReport, CoreError> {
        let since = self.cursor.lock().unwrap().clone();
        let mut batch = self.remote.pull(since.as_deref()).await?;
        batch.entries.sort_by_key(|d| d.updated_at_utc);

        let mut report = SyncReport::default();
        let now = self.clock.now_utc();
        for delta in &batch.entries {
            let key = idempotency_key(&delta.id, "pull_apply", delta.server_version);
            if self.store.is_idempotency_key_applied(&key)? {
                report.skipped_duplicate += 1;
                continue;
            }
            if !ENTITY_TABLES.contains(&delta.kind.as_str()) {
                warn!(target: "sync", kind = %delta.kind, "ignoring delta for unknown entity kind");
                continue;
            }

            self.store.overwrite_row_from_remote(
                &delta.kind,
                &delta.id,
                delta.server_version,
                delta.updated_at_utc,
                delta.deleted_at_utc,
                delta.payload.as_ref(),
            )?;
            self.store.record_idempotency_key(&key, now)?;
            report.pulled += 1;
        }

        if let Some(cursor) = batch.cursor {
            *self.cursor.lock().unwrap() = Some(cursor);
        }
        Ok(report)
    }

    /// One full cycle: push, then pull (spec §4.7 trigger list — app
    /// launch, connectivity restored, pull-to-refresh, debounced local
    /// mutation, and the foreground timer).
    pub async fn sync_once(&self) -> Result<SyncReport, CoreError> {
        if self.check_upgrade_required().await? {
            return Err(CoreError::RemoteRejected("minimum_client_version".into()));
        }
        let push_report = self.push().await?;
        let pull_report = self.pull().await?;
        Ok(SyncReport {
            pushed: push_report.pushed,
            conflicts: push_report.conflicts,
            pulled: pull_report.pulled,
            skipped_duplicate: pull_report.skipped_duplicate,
        })
    }
}

/// Debounce window after a local mutation before sync fires (spec
/// §4.7).
pub const LOCAL_MUTATION_DEBOUNCE: Duration = Duration::from_secs(2);

/// Foreground poll interval while sync has nothing else prompting it
/// (spec §4.7, §6 "sync timers").
pub const FOREGROUND_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A random jitter fraction in `[0, max_frac]`, used wherever a timer
/// shouldn't fire in perfect lockstep across devices.
pub fn jitter_fraction(max_frac: f64) -> f64 {
    rand::thread_rng().gen_range(0.0..max_frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeClock, FakeRandomSource, FakeRemoteSync};
    use crate::types::EntryType;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn push_marks_pending_row_synced_on_acceptance() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_daily_entry("e1".into(), "raw".into(), "edited".into(), EntryType::Text, None, now(), "UTC".into(), now())
            .unwrap();

        let remote = FakeRemoteSync::default();
        let clock = FakeClock::new(now());
        let random = FakeRandomSource::default();
        let coordinator = SyncCoordinator::new(&store, &remote, &clock, &random);

        let report = coordinator.push().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert_eq!(report.conflicts, 0);
        assert!(store.list_pending_sync_rows("daily_entries").unwrap().is_empty());
    }

    #[test]
    fn last_write_wins_favors_later_timestamp_and_ties_go_remote() {
        let t1 = now();
        let t2 = t1 + chrono::Duration::seconds(1);
        assert_eq!(resolve_conflict(t2, t1), ConflictResolution::LocalWins);
        assert_eq!(resolve_conflict(t1, t2), ConflictResolution::RemoteWins);
        assert_eq!(resolve_conflict(t1, t1), ConflictResolution::RemoteWins);
    }

    #[test]
    fn offline_queue_orders_by_priority_then_fifo() {
        let queue = OfflineQueue::new();
        queue.enqueue(QueueEntry { priority: QueuePriority::RemotePull, idempotency_key: "a".into(), description: "pull".into() });
        queue.enqueue(QueueEntry { priority: QueuePriority::AuthRefresh, idempotency_key: "b".into(), description: "auth".into() });
        queue.enqueue(QueueEntry { priority: QueuePriority::LocalPush, idempotency_key: "c".into(), description: "push".into() });

        assert_eq!(queue.pop_next().unwrap().idempotency_key, "b");
        assert_eq!(queue.pop_next().unwrap().idempotency_key, "c");
        assert_eq!(queue.pop_next().unwrap().idempotency_key, "a");
    }

    #[test]
    fn idempotency_key_is_stable_for_same_inputs() {
        assert_eq!(idempotency_key("e1", "pull_apply", 3), idempotency_key("e1", "pull_apply", 3));
        assert_ne!(idempotency_key("e1", "pull_apply", 3), idempotency_key("e1", "pull_apply", 4));
    }

    #[test]
    fn idempotency_key_applied_guard_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let key = idempotency_key("e1", "pull_apply", 1);
        assert!(!store.is_idempotency_key_applied(&key).unwrap());
        store.record_idempotency_key(&key, now()).unwrap();
        assert!(store.is_idempotency_key_applied(&key).unwrap());
    }

    #[tokio::test]
    async fn pull_applies_deltas_in_updated_at_order_and_skips_duplicates() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_daily_entry("e1".into(), "raw".into(), "edited".into(), EntryType::Text, None, now(), "UTC".into(), now())
            .unwrap();

        let remote = FakeRemoteSync::default();
        let delta = Delta {
            id: "e1".into(),
            kind: "daily_entries".into(),
            server_version: 5,
            updated_at_utc: now() + chrono::Duration::seconds(10),
            deleted_at_utc: None,
            payload: Some(serde_json::json!({"raw_transcript": "from remote"})),
        };
        *remote.pulled.lock().unwrap() = crate::ports::Batch { cursor: Some("c1".into()), entries: vec![delta.clone()] };

        let clock = FakeClock::new(now());
        let random = FakeRandomSource::default();
        let coordinator = SyncCoordinator::new(&store, &remote, &clock, &random);

        let report = coordinator.pull().await.unwrap();
        assert_eq!(report.pulled, 1);
        assert_eq!(store.get_daily_entry("e1").unwrap().raw_transcript, "from remote");

        *remote.pulled.lock().unwrap() = crate::ports::Batch { cursor: Some("c2".into()), entries: vec![delta] };
        let report2 = coordinator.pull().await.unwrap();
        assert_eq!(report2.pulled, 0);
        assert_eq!(report2.skipped_duplicate, 1);
    }
}
