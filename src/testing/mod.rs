//! Fakes for `Clock`, `RandomSource`, and the AI/sync ports, used across
//! this crate's own unit and integration tests (spec §14). Not compiled
//! into release builds of dependent crates — this module exists purely
//! to give tests a deterministic harness instead of hand-rolling one
//! per test file.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::ai::adapter::AiAdapter;
use crate::error::CoreError;
use crate::ports::{Batch, Clock, Delta, LLMPort, Message, ModelTier, PingResult, PushResult, RandomSource, RemoteSyncPort, TranscriptionPort};

/// A clock pinned to a fixed instant, advanceable on demand so FSM and
/// trigger tests can control elapsed time exactly.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FakeClock { now: Mutex::new(now) }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// A counter-seeded id source: deterministic, distinct ids across a
/// test run without depending on OS randomness.
pub struct FakeRandomSource {
    counter: AtomicU64,
}

impl Default for FakeRandomSource {
    fn default() -> Self {
        FakeRandomSource { counter: AtomicU64::new(1) }
    }
}

impl RandomSource for FakeRandomSource {
    fn new_id(&self) -> Uuid {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Uuid::from_u128(n as u128)
    }

    fn token_bytes(&self, len: usize) -> Vec<u8> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        (0..len).map(|i| ((n + i as u64) % 256) as u8).collect()
    }
}

/// Scriptable `LLMPort`: returns `responses` in order, repeating the
/// last one once exhausted. Lets a test assert on the exact prompt it
/// was given.
pub struct ScriptedLlm {
    responses: Mutex<Vec<Value>>,
    seen_messages: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Value>) -> Self {
        ScriptedLlm { responses: Mutex::new(responses), seen_messages: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.seen_messages.lock().unwrap().len()
    }
}

#[async_trait]
impl LLMPort for ScriptedLlm {
    async fn complete(&self, _tier: ModelTier, messages: &[Message], _schema: &Value, _deadline: Duration) -> Result<Value, CoreError> {
        self.seen_messages.lock().unwrap().push(messages.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses.first().cloned().unwrap_or(Value::Null))
        }
    }
}

pub struct FakeTranscription {
    pub text: String,
}

#[async_trait]
impl TranscriptionPort for FakeTranscription {
    async fn transcribe(&self, _audio_bytes: &[u8], _deadline: Duration) -> Result<String, CoreError> {
        Ok(self.text.clone())
    }
}

/// A `RemoteSyncPort` fake that accepts every push and returns an empty
/// pull, for sync-coordinator tests that don't exercise conflicts.
#[derive(Default)]
pub struct FakeRemoteSync {
    pub pulled: Mutex<Batch>,
}

#[async_trait]
impl RemoteSyncPort for FakeRemoteSync {
    async fn pull(&self, _since: Option<&str>) -> Result<Batch, CoreError> {
        Ok(self.pulled.lock().unwrap().clone())
    }

    async fn push(&self, batch: &[Delta]) -> Result<Vec<PushResult>, CoreError> {
        Ok(batch
            .iter()
            .map(|d| PushResult::Accepted { id: d.id.clone(), new_server_version: d.server_version + 1 })
            .collect())
    }

    async fn ping(&self) -> Result<PingResult, CoreError> {
        Ok(PingResult::Ok)
    }
}

/// A ready-to-use `AiAdapter` wired to an `Ok(null)`-returning LLM and
/// transcription port, for tests that need an adapter but don't care
/// about its output.
pub fn fake_adapter() -> AiAdapter {
    AiAdapter::new(
        Arc::new(ScriptedLlm::new(vec![Value::Null])),
        Arc::new(FakeTranscription { text: String::new() }),
        None,
        Arc::new(FakeClock::new(Utc::now())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(Utc::now());
        let before = clock.now_utc();
        clock.advance(chrono::Duration::days(1));
        assert_eq!(clock.now_utc(), before + chrono::Duration::days(1));
    }

    #[test]
    fn fake_random_source_yields_distinct_ids() {
        let source = FakeRandomSource::default();
        assert_ne!(source.new_id(), source.new_id());
    }
}
