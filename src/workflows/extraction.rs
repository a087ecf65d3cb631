//! Daily Extraction: a single-pass pipeline, not an interactive FSM
//! (spec §4.5.1).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ai::adapter::{AiAdapter, OperationKind};
use crate::ai::prompts::{assemble_prompt, PromptContext};
use crate::ai::schema::{validate, Field, FieldType, Schema};
use crate::db::daily_entries::ExtractedSignals;
use crate::db::Store;
use crate::error::CoreError;

fn extraction_schema() -> Schema {
    let bucket = |name: &'static str| Field {
        name,
        required: true,
        kind: FieldType::StringArray { min_items: 0, max_items: 20 },
    };
    Schema {
        fields: vec![
            bucket("wins"),
            bucket("blockers"),
            bucket("risks"),
            bucket("avoidedDecision"),
            bucket("comfortWork"),
            bucket("actions"),
            bucket("learnings"),
        ],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalDiff {
    pub bucket: &'static str,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Applied(ExtractedSignals),
    ReextractWouldOverwrite(Vec<SignalDiff>),
}

fn buckets(s: &ExtractedSignals) -> [(&'static str, &Vec<String>); 7] {
    [
        ("wins", &s.wins),
        ("blockers", &s.blockers),
        ("risks", &s.risks),
        ("avoidedDecision", &s.avoided_decision),
        ("comfortWork", &s.comfort_work),
        ("actions", &s.actions),
        ("learnings", &s.learnings),
    ]
}

fn is_empty(s: &ExtractedSignals) -> bool {
    buckets(s).iter().all(|(_, v)| v.is_empty())
}

fn diff(before: &ExtractedSignals, after: &ExtractedSignals) -> Vec<SignalDiff> {
    buckets(before)
        .into_iter()
        .zip(buckets(after))
        .filter_map(|((name, b), (_, a))| {
            if b != a {
                Some(SignalDiff { bucket: name, before: b.clone(), after: a.clone() })
            } else {
                None
            }
        })
        .collect()
}

/// Calls the adapter to extract the seven signal buckets from a
/// transcript. Pure I/O boundary call — no `Store` access.
pub async fn extract_signals(adapter: &AiAdapter, edited_transcript: &str, deadline: Duration) -> Result<ExtractedSignals, CoreError> {
    let ctx = PromptContext {
        workflow_excerpt: "Daily Extraction: extract wins, blockers, risks, avoided decision, comfort work, actions, and learnings from the entry below. Quote the user's own words where possible.".into(),
        latest_answer: Some(edited_transcript.to_string()),
        ..Default::default()
    };
    let messages = assemble_prompt(&ctx);
    let schema = extraction_schema();
    let value = adapter.complete(OperationKind::DailyExtraction, messages, &schema, deadline).await?;
    parse_signals(&value)
}

fn parse_signals(value: &Value) -> Result<ExtractedSignals, CoreError> {
    let schema = extraction_schema();
    let violations = validate(&schema, value);
    if !violations.is_empty() {
        return Err(CoreError::SchemaFailure { layer: "daily_extraction".into(), attempts: 1 });
    }
    serde_json::from_value(value.clone()).map_err(|e| CoreError::ValidationFailure(e.to_string()))
}

/// Runs extraction for `entry_id`. If the entry already carries
/// non-empty, user-diverging signals, surfaces a warning with a diff
/// instead of silently overwriting them (spec §4.5.1). `force` bypasses
/// the guard for an explicit user-confirmed re-extraction.
pub async fn run_daily_extraction(
    store: &Store,
    adapter: &AiAdapter,
    entry_id: &str,
    deadline: Duration,
    now: DateTime<Utc>,
    force: bool,
) -> Result<ExtractionOutcome, CoreError> {
    let entry = store.get_daily_entry(entry_id)?;
    let fresh = extract_signals(adapter, &entry.edited_transcript, deadline).await?;

    if !force && !is_empty(&entry.signals) {
        let diffs = diff(&entry.signals, &fresh);
        if !diffs.is_empty() {
            return Ok(ExtractionOutcome::ReextractWouldOverwrite(diffs));
        }
    }

    store.set_daily_entry_signals(entry_id, &fresh, now)?;
    Ok(ExtractionOutcome::Applied(fresh))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_re_extraction_produces_no_diff() {
        let mut signals = ExtractedSignals::default();
        signals.wins = vec!["shipped the migration".into()];
        let diffs = diff(&signals, &signals.clone());
        assert!(diffs.is_empty());
    }

    #[test]
    fn diverging_bucket_is_reported() {
        let before = ExtractedSignals { wins: vec!["a".into()], ..Default::default() };
        let after = ExtractedSignals { wins: vec!["b".into()], ..Default::default() };
        let diffs = diff(&before, &after);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].bucket, "wins");
    }
}
