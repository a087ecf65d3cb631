//! Bridges the core to `LLMPort` and `TranscriptionPort` (spec §4.3).
//!
//! Owns prompt assembly, schema-validated extraction with bounded
//! auto-regeneration, transient-failure retry with backoff, the
//! transcription provider-fallback path, and the cost/limit guardrails.
//! None of this mutates `Store` state, so every retry here is safe to
//! replay (spec §5 cancellation-safety).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::ports::{Clock, LLMPort, Message, ModelTier, TranscriptionPort};

use super::prompts::corrective_prefix;
use super::schema::{to_wire_schema, validate, Schema};

/// Operations the adapter is asked to perform. Model-tier selection is
/// a constant map keyed on this (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    DailyExtraction,
    BriefGeneration,
    MicroReview,
    VaguenessConfirmation,
    QuickOutput,
    AnchoredDemandGeneration,
    Setup,
    Quarterly,
}

impl OperationKind {
    pub fn tier(self) -> ModelTier {
        match self {
            OperationKind::DailyExtraction
            | OperationKind::BriefGeneration
            | OperationKind::MicroReview
            | OperationKind::VaguenessConfirmation
            | OperationKind::QuickOutput => ModelTier::Daily,
            OperationKind::AnchoredDemandGeneration
            | OperationKind::Setup
            | OperationKind::Quarterly => ModelTier::Governance,
        }
    }
}

/// Exponential backoff schedule for transient failures (spec §4.3).
const BACKOFF_SCHEDULE: [Duration; 3] = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Up to 2 auto-regenerations after the first schema-validation failure
/// (3 attempts total) before the adapter gives up (spec §4.3).
const MAX_SCHEMA_REGENERATIONS: u32 = 2;

const TRANSCRIPTION_PRIMARY_MAX_FAILURES: u32 = 3;

/// Relative per-call cost charged against the circuit breaker. Governance
/// tier runs the larger model, so it is weighted heavier than Daily.
fn tier_cost(tier: ModelTier) -> f64 {
    match tier {
        ModelTier::Daily => 1.0,
        ModelTier::Governance => 4.0,
    }
}

/// Transcription has no tier of its own; cost it at the Daily rate.
const TRANSCRIPTION_COST: f64 = 1.0;

#[derive(Debug, Clone, Copy)]
pub struct SoftCapThresholds {
    pub entries_per_day: u32,
    pub regenerations_per_day: u32,
    pub session_starts_per_day: u32,
}

impl Default for SoftCapThresholds {
    fn default() -> Self {
        SoftCapThresholds {
            entries_per_day: 10,
            regenerations_per_day: 15,
            session_starts_per_day: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftCapKind {
    Entries,
    Regenerations,
    SessionStarts,
}

/// Per-day counters backing the soft caps. Exceeding a threshold never
/// blocks — it only yields an informational warning (spec §4.3).
#[derive(Debug, Default)]
struct DailyCounters {
    day: Option<DateTime<Utc>>,
    entries: u32,
    regenerations: u32,
    session_starts: u32,
}

impl DailyCounters {
    fn roll_if_new_day(&mut self, now: DateTime<Utc>) {
        let is_new_day = match self.day {
            Some(d) => d.date_naive() != now.date_naive(),
            None => true,
        };
        if is_new_day {
            self.day = Some(now);
            self.entries = 0;
            self.regenerations = 0;
            self.session_starts = 0;
        }
    }
}

/// Tracks request cost over a rolling 1-hour window and trips when the
/// hour's total exceeds `threshold_multiplier * baseline` (spec §4.3,
/// §9 open question — the multiplier itself is left configurable).
pub struct CircuitBreaker {
    window: Mutex<VecDeque<(DateTime<Utc>, f64)>>,
    baseline_hourly_cost: f64,
    threshold_multiplier: f64,
}

impl CircuitBreaker {
    pub fn new(baseline_hourly_cost: f64, threshold_multiplier: f64) -> Self {
        CircuitBreaker {
            window: Mutex::new(VecDeque::new()),
            baseline_hourly_cost,
            threshold_multiplier,
        }
    }

    pub fn record_cost(&self, now: DateTime<Utc>, cost: f64) {
        let mut window = self.window.lock().unwrap();
        window.push_back((now, cost));
        Self::prune(&mut window, now);
    }

    fn prune(window: &mut VecDeque<(DateTime<Utc>, f64)>, now: DateTime<Utc>) {
        while let Some((t, _)) = window.front() {
            if now.signed_duration_since(*t) > chrono::Duration::hours(1) {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn is_tripped(&self, now: DateTime<Utc>) -> bool {
        let mut window = self.window.lock().unwrap();
        Self::prune(&mut window, now);
        let hourly_total: f64 = window.iter().map(|(_, c)| c).sum();
        hourly_total > self.baseline_hourly_cost * self.threshold_multiplier
    }
}

pub struct AiAdapter {
    llm: Arc<dyn LLMPort>,
    transcription_primary: Arc<dyn TranscriptionPort>,
    transcription_secondary: Option<Arc<dyn TranscriptionPort>>,
    clock: Arc<dyn Clock>,
    counters: Mutex<DailyCounters>,
    thresholds: SoftCapThresholds,
    pub circuit_breaker: CircuitBreaker,
}

impl AiAdapter {
    pub fn new(
        llm: Arc<dyn LLMPort>,
        transcription_primary: Arc<dyn TranscriptionPort>,
        transcription_secondary: Option<Arc<dyn TranscriptionPort>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AiAdapter {
            llm,
            transcription_primary,
            transcription_secondary,
            clock,
            counters: Mutex::new(DailyCounters::default()),
            thresholds: SoftCapThresholds::default(),
            // Baseline sized so a single Setup/Quarterly session (which can
            // burst a dozen-plus Governance-tier calls building board
            // personas) does not itself look like a cost runaway. The exact
            // multiplier is left configurable per spec's open question.
            circuit_breaker: CircuitBreaker::new(100.0, 3.0),
        }
    }

    /// Request a schema-validated completion. Retries transient
    /// failures with backoff, then schema-validates; on failure,
    /// regenerates up to `MAX_SCHEMA_REGENERATIONS` times with a
    /// corrective prefix before surfacing `SchemaFailure`.
    pub async fn complete(
        &self,
        op: OperationKind,
        mut messages: Vec<Message>,
        schema: &Schema,
        deadline: Duration,
    ) -> Result<Value, CoreError> {
        let tier = op.tier();
        let mut attempts: u32 = 0;
        let schema_json = to_wire_schema(schema);
        let now = self.clock.now_utc();

        if self.circuit_breaker.is_tripped(now) {
            // Tripped state forces cached outputs and queued processing
            // (spec §4.3). There is no output cache port to consult here,
            // so the call is queued by surfacing a retryable error instead
            // of spending further cost against an already-overloaded hour.
            warn!(target: "ai_adapter", ?op, "circuit breaker tripped, queuing request");
            return Err(CoreError::RateLimited(60));
        }

        loop {
            attempts += 1;
            let result = self.complete_with_transient_retry(tier, &messages, &schema_json, deadline).await;

            let value = match result {
                Ok(v) => v,
                Err(e) => return Err(e),
            };
            self.circuit_breaker.record_cost(self.clock.now_utc(), tier_cost(tier));

            let violations = validate(schema, &value);
            if violations.is_empty() {
                return Ok(value);
            }

            warn!(target: "ai_adapter", attempts, ?op, "schema validation failed");
            if attempts > MAX_SCHEMA_REGENERATIONS {
                return Err(CoreError::SchemaFailure {
                    layer: format!("{op:?}"),
                    attempts,
                });
            }

            let reasons: Vec<String> = violations.iter().map(|v| format!("{}: {}", v.field, v.reason)).collect();
            messages.push(Message {
                role: crate::ports::MessageRole::System,
                content: corrective_prefix(&reasons),
            });
        }
    }

    async fn complete_with_transient_retry(
        &self,
        tier: ModelTier,
        messages: &[Message],
        schema: &Value,
        deadline: Duration,
    ) -> Result<Value, CoreError> {
        let mut attempt = 0usize;
        loop {
            match self.llm.complete(tier, messages, schema, deadline).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < BACKOFF_SCHEDULE.len() => {
                    debug!(target: "ai_adapter", attempt, "transient LLM failure, backing off");
                    tokio::time::sleep(BACKOFF_SCHEDULE[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Transcribe with provider fallback: the primary gets up to
    /// `TRANSCRIPTION_PRIMARY_MAX_FAILURES` attempts (backed off), then
    /// the secondary is tried once (spec §4.3).
    pub async fn transcribe(&self, audio_bytes: &[u8], deadline: Duration) -> Result<String, CoreError> {
        let now = self.clock.now_utc();
        if self.circuit_breaker.is_tripped(now) {
            warn!(target: "ai_adapter", "circuit breaker tripped, queuing transcription");
            return Err(CoreError::RateLimited(60));
        }

        let mut attempt = 0u32;
        loop {
            match self.transcription_primary.transcribe(audio_bytes, deadline).await {
                Ok(text) => {
                    self.circuit_breaker.record_cost(self.clock.now_utc(), TRANSCRIPTION_COST);
                    return Ok(text);
                }
                Err(e) if attempt + 1 < TRANSCRIPTION_PRIMARY_MAX_FAILURES => {
                    let idx = (attempt as usize).min(BACKOFF_SCHEDULE.len() - 1);
                    debug!(target: "ai_adapter", attempt, "primary transcription failed, retrying");
                    tokio::time::sleep(BACKOFF_SCHEDULE[idx]).await;
                    attempt += 1;
                    let _ = &e;
                }
                Err(e) => {
                    warn!(target: "ai_adapter", "primary transcription exhausted, falling back to secondary");
                    let Some(secondary) = &self.transcription_secondary else {
                        return Err(e);
                    };
                    let text = secondary.transcribe(audio_bytes, deadline).await?;
                    self.circuit_breaker.record_cost(self.clock.now_utc(), TRANSCRIPTION_COST);
                    return Ok(text);
                }
            }
        }
    }

    /// Records one occurrence against the relevant soft cap and returns
    /// `Some(kind)` if the day's threshold has just been exceeded — an
    /// informational warning the caller may surface, never a block.
    pub fn record_entry(&self) -> Option<SoftCapKind> {
        let now = self.clock.now_utc();
        let mut counters = self.counters.lock().unwrap();
        counters.roll_if_new_day(now);
        counters.entries += 1;
        (counters.entries == self.thresholds.entries_per_day + 1).then_some(SoftCapKind::Entries)
    }

    pub fn record_regeneration(&self) -> Option<SoftCapKind> {
        let now = self.clock.now_utc();
        let mut counters = self.counters.lock().unwrap();
        counters.roll_if_new_day(now);
        counters.regenerations += 1;
        (counters.regenerations == self.thresholds.regenerations_per_day + 1).then_some(SoftCapKind::Regenerations)
    }

    pub fn record_session_start(&self) -> Option<SoftCapKind> {
        let now = self.clock.now_utc();
        let mut counters = self.counters.lock().unwrap();
        counters.roll_if_new_day(now);
        counters.session_starts += 1;
        (counters.session_starts == self.thresholds.session_starts_per_day + 1).then_some(SoftCapKind::SessionStarts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_tiers_match_spec_map() {
        assert_eq!(OperationKind::DailyExtraction.tier(), ModelTier::Daily);
        assert_eq!(OperationKind::BriefGeneration.tier(), ModelTier::Daily);
        assert_eq!(OperationKind::MicroReview.tier(), ModelTier::Daily);
        assert_eq!(OperationKind::VaguenessConfirmation.tier(), ModelTier::Daily);
        assert_eq!(OperationKind::Setup.tier(), ModelTier::Governance);
        assert_eq!(OperationKind::Quarterly.tier(), ModelTier::Governance);
    }

    #[test]
    fn circuit_breaker_trips_over_threshold() {
        let breaker = CircuitBreaker::new(1.0, 2.0);
        let now = Utc::now();
        breaker.record_cost(now, 1.5);
        assert!(!breaker.is_tripped(now));
        breaker.record_cost(now, 1.0);
        assert!(breaker.is_tripped(now));
    }

    #[test]
    fn circuit_breaker_window_expires_after_an_hour() {
        let breaker = CircuitBreaker::new(1.0, 1.0);
        let t0 = Utc::now();
        breaker.record_cost(t0, 10.0);
        assert!(breaker.is_tripped(t0));
        let later = t0 + chrono::Duration::hours(2);
        assert!(!breaker.is_tripped(later));
    }
}
