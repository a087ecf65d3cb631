//! Quick Version: the 15-minute audit FSM (spec §4.5.3).

use std::time::Duration;

use serde_json::{json, Value};

use crate::ai::adapter::{AiAdapter, OperationKind};
use crate::ai::prompts::{assemble_prompt, PromptContext};
use crate::ai::schema::{validate, Field, FieldType, Schema};
use crate::db::Store;
use crate::error::CoreError;
use crate::fsm::{session_data_get, session_data_set, FsmRuntime, Prompt, StepOutcome, SubmitAction, TransitionResult, WorkflowSpec};
use crate::types::Direction;

pub struct QuickSpec;

impl WorkflowSpec for QuickSpec {
    fn initial_state(&self) -> &'static str {
        "SensitivityGate"
    }

    fn prompt_for(&self, state: &str, session_data: &Value) -> Prompt {
        let text = match state {
            "SensitivityGate" => "This audit covers work you may be avoiding or uncomfortable with. Continue?".into(),
            "Q1_Role" => "In one sentence, what is your current role?".into(),
            "Q2_ThreeProblems" => "Name the three (to five) problems that actually occupy your time.".into(),
            "Q3_DirectionLoop" => {
                let idx = current_problem_index(session_data);
                let name = problem_name(session_data, idx);
                format!(
                    "For problem #{} ({name}): quote yourself verbatim on (1) is AI making this cheaper, (2) the cost of being wrong, (3) how much trust is required. Then give direction (appreciating/depreciating/stable) and a one-sentence justification tied to the quotes. Format: ai_cheaper quote|error_cost quote|trust_required quote|direction|justification",
                    idx + 1
                )
            }
            "Q4_AvoidedDecision" => "What decision have you been avoiding? Be specific.".into(),
            "Q5_ComfortWork" => "What work are you doing because it's comfortable, not because it matters?".into(),
            "GenerateOutput" => "Generating your assessment.".into(),
            other => other.to_string(),
        };
        Prompt { state: state.to_string(), text }
    }

    fn requires_vagueness_gate(&self, state: &str) -> bool {
        matches!(state, "Q3_DirectionLoop" | "Q4_AvoidedDecision" | "Q5_ComfortWork")
    }

    fn apply(&self, state: &str, session_data: &Value, answer: &str) -> StepOutcome {
        match state {
            "SensitivityGate" => StepOutcome::Advance { next_state: "Q1_Role".into(), session_data: session_data.clone() },
            "Q1_Role" => StepOutcome::Advance {
                next_state: "Q2_ThreeProblems".into(),
                session_data: session_data_set(session_data.clone(), "role", json!(answer)),
            },
            "Q2_ThreeProblems" => {
                let problems: Vec<&str> = answer.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
                let data = session_data_set(session_data.clone(), "problems", json!(problems));
                let data = session_data_set(data, "problem_cursor", json!(0));
                StepOutcome::Advance { next_state: "Q3_DirectionLoop".into(), session_data: data }
            }
            "Q3_DirectionLoop" => {
                let idx = current_problem_index(session_data);
                let Some(row) = parse_direction_row(answer, &problem_name(session_data, idx)) else {
                    return StepOutcome::Advance { next_state: "Q3_DirectionLoop".into(), session_data: session_data.clone() };
                };
                let mut rows = session_data.get("direction_rows").and_then(Value::as_array).cloned().unwrap_or_default();
                rows.push(row);
                let data = session_data_set(session_data.clone(), "direction_rows", json!(rows));
                let total = session_data.get("problems").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
                if idx + 1 < total {
                    let data = session_data_set(data, "problem_cursor", json!(idx + 1));
                    StepOutcome::Advance { next_state: "Q3_DirectionLoop".into(), session_data: data }
                } else {
                    StepOutcome::Advance { next_state: "Q4_AvoidedDecision".into(), session_data: data }
                }
            }
            "Q4_AvoidedDecision" => StepOutcome::Advance {
                next_state: "Q5_ComfortWork".into(),
                session_data: session_data_set(session_data.clone(), "avoided_decision", json!(answer)),
            },
            "Q5_ComfortWork" => StepOutcome::Advance {
                next_state: "GenerateOutput".into(),
                session_data: session_data_set(session_data.clone(), "comfort_work", json!(answer)),
            },
            "GenerateOutput" => StepOutcome::Complete { output_markdown: answer.to_string(), session_data: session_data.clone() },
            other => StepOutcome::Advance { next_state: other.to_string(), session_data: session_data.clone() },
        }
    }
}

fn current_problem_index(session_data: &Value) -> usize {
    session_data_get(session_data, "problem_cursor").and_then(Value::as_u64).unwrap_or(0) as usize
}

fn problem_name(session_data: &Value, idx: usize) -> String {
    session_data
        .get("problems")
        .and_then(Value::as_array)
        .and_then(|a| a.get(idx))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Parses one Q3_DirectionLoop answer into a Q3 row: the four quote-bearing
/// cells (`problem`, `ai_cheaper`, `error_cost`, `trust_required`) plus a
/// direction and one-sentence justification tied to the quotes (spec §4.5.3).
fn parse_direction_row(answer: &str, problem: &str) -> Option<Value> {
    let parts: Vec<&str> = answer.splitn(5, '|').map(str::trim).collect();
    if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(json!({
        "problem": problem,
        "ai_cheaper": parts[0],
        "error_cost": parts[1],
        "trust_required": parts[2],
        "direction": parts[3],
        "direction_rationale": parts[4],
    }))
}

fn output_schema() -> Schema {
    Schema {
        fields: vec![
            Field { name: "assessment", required: true, kind: FieldType::String { min_len: 10, max_len: 400 } },
            Field { name: "avoidedDecision", required: true, kind: FieldType::String { min_len: 5, max_len: 300 } },
            Field { name: "avoidedDecisionCost", required: true, kind: FieldType::String { min_len: 5, max_len: 300 } },
            Field { name: "betPrediction", required: true, kind: FieldType::String { min_len: 5, max_len: 300 } },
            Field { name: "betWrongIf", required: true, kind: FieldType::String { min_len: 1, max_len: 300 } },
        ],
    }
}

/// One Q3_DirectionLoop row: the four quote-bearing cells plus the
/// direction and justification the user gave for that problem.
pub struct DirectionRow {
    pub problem: String,
    pub ai_cheaper: String,
    pub error_cost: String,
    pub trust_required: String,
    pub direction: Direction,
    pub direction_rationale: String,
}

/// The result of the closing step: the rendered markdown, the per-problem
/// direction rows collected during Q3, and the bet fields the caller must
/// persist via `portfolio::bets`/`db::bets` after the session completes.
pub struct QuickOutput {
    pub markdown: String,
    pub bet_prediction: String,
    pub bet_wrong_if: String,
    pub direction_rows: Vec<DirectionRow>,
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "appreciating" => Direction::Appreciating,
        "depreciating" => Direction::Depreciating,
        _ => Direction::Stable,
    }
}

fn direction_rows_from_session(session_data: &Value) -> Vec<DirectionRow> {
    session_data
        .get("direction_rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .map(|r| {
                    let get = |k: &str| r.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
                    DirectionRow {
                        problem: get("problem"),
                        ai_cheaper: get("ai_cheaper"),
                        error_cost: get("error_cost"),
                        trust_required: get("trust_required"),
                        direction: parse_direction(&get("direction")),
                        direction_rationale: get("direction_rationale"),
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Calls the adapter to produce the closing assessment from everything
/// collected in `session_data`, then submits it as the `GenerateOutput`
/// answer to finalize the session (spec §4.5.3). This is the async
/// boundary the synchronous FSM transitions never cross themselves.
pub async fn generate_and_finalize(
    store: &Store,
    runtime: &FsmRuntime<'_>,
    adapter: &AiAdapter,
    session: &crate::db::sessions::GovernanceSession,
    deadline: Duration,
) -> Result<(TransitionResult, QuickOutput), CoreError> {
    let direction_rows = direction_rows_from_session(&session.session_data);
    let excerpt = format!(
        "Quick Version closing step. Role: {}. Problems: {}. Avoided decision: {}. Comfort work: {}. Produce a 2-sentence honest assessment, name the avoided decision and its cost, and a single 90-day bet with a non-empty wrong_if.",
        session_data_get(&session.session_data, "role").and_then(Value::as_str).unwrap_or(""),
        session.session_data.get("problems").cloned().unwrap_or(json!([])),
        session_data_get(&session.session_data, "avoided_decision").and_then(Value::as_str).unwrap_or(""),
        session_data_get(&session.session_data, "comfort_work").and_then(Value::as_str).unwrap_or(""),
    );
    let ctx = PromptContext { workflow_excerpt: excerpt, ..Default::default() };
    let messages = assemble_prompt(&ctx);
    let schema = output_schema();
    let value = adapter.complete(OperationKind::QuickOutput, messages, &schema, deadline).await?;
    if !validate(&schema, &value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "quick_output".into(), attempts: 1 });
    }

    let get = |k: &str| value.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let rows_markdown: String = direction_rows
        .iter()
        .map(|r| {
            format!(
                "| {} | {} | {} | {} | {:?} — {} |\n",
                r.problem, r.ai_cheaper, r.error_cost, r.trust_required, r.direction, r.direction_rationale
            )
        })
        .collect();
    let markdown = format!(
        "## Quick Version\n\n{}\n\n| problem | ai_cheaper | error_cost | trust_required | direction |\n|---|---|---|---|---|\n{}\n**Avoided decision:** {} — {}\n\n**90-day bet:** {}\n**Wrong if:** {}\n",
        get("assessment"),
        rows_markdown,
        get("avoidedDecision"),
        get("avoidedDecisionCost"),
        get("betPrediction"),
        get("betWrongIf"),
    );
    let output = QuickOutput {
        markdown: markdown.clone(),
        bet_prediction: get("betPrediction"),
        bet_wrong_if: get("betWrongIf"),
        direction_rows,
    };

    let spec = QuickSpec;
    let result = runtime.submit(session, &spec, SubmitAction::Answer(markdown))?;
    let _ = store;
    Ok((result, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{OsRandomSource, SystemClock};
    use crate::types::SessionType;

    #[test]
    fn walks_through_problem_loop_for_each_named_problem() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let random = OsRandomSource;
        let runtime = FsmRuntime::new(&store, &clock, &random);
        let spec = QuickSpec;

        let session = runtime.start(SessionType::Quick, &spec).unwrap();
        runtime.submit(&session, &spec, SubmitAction::Answer("yes".into())).unwrap();
        let session = store.get_session(&session.sync.id).unwrap();
        runtime.submit(&session, &spec, SubmitAction::Answer("staff engineer".into())).unwrap();
        let session = store.get_session(&session.sync.id).unwrap();
        let r = runtime
            .submit(&session, &spec, SubmitAction::Answer("on-call, roadmap, hiring".into()))
            .unwrap();
        let TransitionResult::AwaitingInput(prompt) = r else { panic!("expected prompt") };
        assert_eq!(prompt.state, "Q3_DirectionLoop");

        let mut session = store.get_session(&session.sync.id).unwrap();
        for i in 0..3 {
            let r = runtime
                .submit(
                    &session,
                    &spec,
                    SubmitAction::Answer(format!(
                        "\"AI shipped the {i} migration Tuesday\"|\"a bad rollback costs a full day\"|\"the team trusts it fully\"|stable|quotes show steady-state confidence"
                    )),
                )
                .unwrap();
            session = store.get_session(&session.sync.id).unwrap();
            if i < 2 {
                assert!(matches!(r, TransitionResult::AwaitingInput(_)));
            } else {
                let TransitionResult::AwaitingInput(prompt) = r else { panic!("expected prompt") };
                assert_eq!(prompt.state, "Q4_AvoidedDecision");
            }
        }
    }
}
