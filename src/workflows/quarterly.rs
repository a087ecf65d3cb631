//! Quarterly Report: the full board-interrogation cycle (spec §4.5.5).
//!
//! `GatePortfolioPresent` is resolved by the caller before the session
//! is even started — the FSM itself never reaches back into the store
//! mid-transition, so `start_quarterly` checks for a published
//! portfolio and refuses to start a session at all if one is missing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::ai::adapter::{AiAdapter, OperationKind};
use crate::ai::prompts::{assemble_prompt, PromptContext, UserContext};
use crate::ai::schema::{validate, Field, FieldType, Schema};
use crate::db::Store;
use crate::domain::validators::{validate_bet_transition, BetTransitionCheck};
use crate::domain::vagueness::has_outcome_marker;
use crate::error::CoreError;
use crate::fsm::{session_data_get, session_data_set, FsmRuntime, Prompt, StepOutcome, SubmitAction, TransitionResult, WorkflowSpec};
use crate::ports::RandomSource;
use crate::types::{BetStatus, EvidenceStrength, EvidenceType};

pub struct QuarterlySpec {
    pub has_growth_roles: bool,
    pub core_roles: Vec<String>,
    pub growth_roles: Vec<String>,
}

fn board_cursor(session_data: &Value, key: &str) -> usize {
    session_data_get(session_data, key).and_then(Value::as_u64).unwrap_or(0) as usize
}

impl WorkflowSpec for QuarterlySpec {
    fn initial_state(&self) -> &'static str {
        "SensitivityGate"
    }

    fn prompt_for(&self, state: &str, session_data: &Value) -> Prompt {
        let text = match state {
            "SensitivityGate" => "This review covers bets, avoided decisions, and comfort work from the last quarter. Continue?".into(),
            "GatePortfolioPresent" => "Checking for a published portfolio.".into(),
            "Q1_LastBet" => "Your last bet: did it resolve correct or wrong? Give the evidence.".into(),
            "Q2_Commitments" => "What did you commit to last quarter, and did you follow through?".into(),
            "Q3_Avoided" => "What decision have you been avoiding this quarter?".into(),
            "Q4_Comfort" => "What work are you doing because it's comfortable, not because it matters?".into(),
            "Q5_PortfolioCheck" => "Any allocation changes? List as problemId:pct pairs, comma-separated, or \"none\".".into(),
            "Q6_HealthUpdate" => "Portfolio health recomputed.".into(),
            "Q7_Protection" => "What's the biggest risk to your highest-growth problem right now?".into(),
            "Q8_Opportunity" => "What opportunity around that problem haven't you pursued yet?".into(),
            "Q9_TriggerCheck" => "Has your role or scope changed this quarter? Answer as role_change:yes/no,scope_change:yes/no.".into(),
            "Q10_NextBet" => "Name your next 90-day bet as prediction|wrong_if.".into(),
            "CoreBoardInterrogation" => {
                let idx = board_cursor(session_data, "core_cursor");
                let role = self.core_roles.get(idx).cloned().unwrap_or_default();
                format!("{role}'s question: respond with a concrete, specific answer.")
            }
            "GrowthBoardInterrogation" => {
                let idx = board_cursor(session_data, "growth_cursor");
                let role = self.growth_roles.get(idx).cloned().unwrap_or_default();
                format!("{role}'s question: respond with a concrete, specific answer.")
            }
            "GenerateReport" => "Generating your quarterly report.".into(),
            other => other.to_string(),
        };
        Prompt { state: state.to_string(), text }
    }

    fn requires_vagueness_gate(&self, state: &str) -> bool {
        matches!(
            state,
            "Q1_LastBet"
                | "Q2_Commitments"
                | "Q3_Avoided"
                | "Q4_Comfort"
                | "Q7_Protection"
                | "Q8_Opportunity"
                | "CoreBoardInterrogation"
                | "GrowthBoardInterrogation"
        )
    }

    fn apply(&self, state: &str, session_data: &Value, answer: &str) -> StepOutcome {
        match state {
            "SensitivityGate" => StepOutcome::Advance { next_state: "GatePortfolioPresent".into(), session_data: session_data.clone() },
            "GatePortfolioPresent" => {
                if answer == "absent" {
                    StepOutcome::Abort
                } else {
                    StepOutcome::Advance { next_state: "Q1_LastBet".into(), session_data: session_data.clone() }
                }
            }
            "Q1_LastBet" => StepOutcome::Advance {
                next_state: "Q2_Commitments".into(),
                session_data: session_data_set(session_data.clone(), "last_bet_resolution", json!(answer)),
            },
            "Q2_Commitments" => StepOutcome::Advance {
                next_state: "Q3_Avoided".into(),
                session_data: session_data_set(session_data.clone(), "commitments", json!(answer)),
            },
            "Q3_Avoided" => StepOutcome::Advance {
                next_state: "Q4_Comfort".into(),
                session_data: session_data_set(session_data.clone(), "avoided_decision", json!(answer)),
            },
            "Q4_Comfort" => StepOutcome::Advance {
                next_state: "Q5_PortfolioCheck".into(),
                session_data: session_data_set(session_data.clone(), "comfort_work", json!(answer)),
            },
            "Q5_PortfolioCheck" => StepOutcome::Advance {
                next_state: "Q6_HealthUpdate".into(),
                session_data: session_data_set(session_data.clone(), "allocation_changes", json!(answer)),
            },
            "Q6_HealthUpdate" => {
                let next = if self.has_growth_roles { "Q7_Protection" } else { "Q9_TriggerCheck" };
                StepOutcome::Advance { next_state: next.into(), session_data: session_data.clone() }
            }
            "Q7_Protection" => StepOutcome::Advance {
                next_state: "Q8_Opportunity".into(),
                session_data: session_data_set(session_data.clone(), "protection_answer", json!(answer)),
            },
            "Q8_Opportunity" => StepOutcome::Advance {
                next_state: "Q9_TriggerCheck".into(),
                session_data: session_data_set(session_data.clone(), "opportunity_answer", json!(answer)),
            },
            "Q9_TriggerCheck" => StepOutcome::Advance {
                next_state: "Q10_NextBet".into(),
                session_data: session_data_set(session_data.clone(), "trigger_signals", json!(answer)),
            },
            "Q10_NextBet" => {
                let data = session_data_set(session_data.clone(), "next_bet", json!(answer));
                let data = session_data_set(data, "core_cursor", json!(0));
                StepOutcome::Advance { next_state: "CoreBoardInterrogation".into(), session_data: data }
            }
            "CoreBoardInterrogation" => {
                let idx = board_cursor(session_data, "core_cursor");
                let key = format!("core_answer_{idx}");
                let data = session_data_set(session_data.clone(), &key, json!(answer));
                if idx + 1 < self.core_roles.len() {
                    let data = session_data_set(data, "core_cursor", json!(idx + 1));
                    StepOutcome::Advance { next_state: "CoreBoardInterrogation".into(), session_data: data }
                } else if self.has_growth_roles {
                    let data = session_data_set(data, "growth_cursor", json!(0));
                    StepOutcome::Advance { next_state: "GrowthBoardInterrogation".into(), session_data: data }
                } else {
                    StepOutcome::Advance { next_state: "GenerateReport".into(), session_data: data }
                }
            }
            "GrowthBoardInterrogation" => {
                let idx = board_cursor(session_data, "growth_cursor");
                let key = format!("growth_answer_{idx}");
                let data = session_data_set(session_data.clone(), &key, json!(answer));
                if idx + 1 < self.growth_roles.len() {
                    let data = session_data_set(data, "growth_cursor", json!(idx + 1));
                    StepOutcome::Advance { next_state: "GrowthBoardInterrogation".into(), session_data: data }
                } else {
                    StepOutcome::Advance { next_state: "GenerateReport".into(), session_data: data }
                }
            }
            "GenerateReport" => StepOutcome::Complete { output_markdown: answer.to_string(), session_data: session_data.clone() },
            other => StepOutcome::Advance { next_state: other.to_string(), session_data: session_data.clone() },
        }
    }
}

/// Builds a `QuarterlySpec` from the current board and checks the
/// portfolio-present gate, erroring rather than letting the FSM start
/// a session that can never progress past `GatePortfolioPresent`.
pub fn prepare_spec(store: &Store) -> Result<QuarterlySpec, CoreError> {
    let board = store.list_board_members()?;
    if board.is_empty() {
        return Err(CoreError::ValidationFailure(
            "no portfolio or board exists yet; run Setup first".into(),
        ));
    }
    let core_roles: Vec<String> = board.iter().filter(|m| !m.is_growth_role).map(|m| format!("{:?}", m.role_type)).collect();
    let growth_roles: Vec<String> = board.iter().filter(|m| m.is_growth_role && m.is_active).map(|m| format!("{:?}", m.role_type)).collect();
    Ok(QuarterlySpec { has_growth_roles: !growth_roles.is_empty(), core_roles, growth_roles })
}

/// Non-blocking eligibility check (spec §4.5.5): true if the most
/// recently completed quarterly session finished less than 30 days ago.
pub fn too_soon_for_quarterly(last_completed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_completed_at.is_some_and(|t| now - t < chrono::Duration::days(30))
}

fn report_schema() -> Schema {
    Schema {
        fields: vec![
            Field { name: "reportMarkdown", required: true, kind: FieldType::String { min_len: 100, max_len: 6000 } },
            Field { name: "betPrediction", required: true, kind: FieldType::String { min_len: 5, max_len: 300 } },
            Field { name: "betWrongIf", required: true, kind: FieldType::String { min_len: 1, max_len: 300 } },
            Field { name: "lastBetCorrect", required: true, kind: FieldType::Boolean },
        ],
    }
}

pub struct QuarterlyOutput {
    pub markdown: String,
    pub bet_prediction: String,
    pub bet_wrong_if: String,
    pub last_bet_correct: bool,
}

fn board_interrogation_excerpt(session_data: &Value, roles: &[String], prefix: &str) -> String {
    roles
        .iter()
        .enumerate()
        .map(|(i, role)| {
            let answer = session_data_get(session_data, &format!("{prefix}_answer_{i}")).and_then(Value::as_str).unwrap_or_default();
            format!("{role}: {answer}")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Calls the adapter to compose the full quarterly report from the
/// accumulated session data, then finalizes the FSM session with the
/// rendered markdown (spec §4.5.5). Evidence items, the bet
/// resolution/creation, and the portfolio snapshot are persisted
/// separately by `finalize_quarterly` after this returns.
pub async fn generate_report(
    adapter: &AiAdapter,
    runtime: &FsmRuntime<'_>,
    session: &crate::db::sessions::GovernanceSession,
    spec: &QuarterlySpec,
    deadline: Duration,
) -> Result<(TransitionResult, QuarterlyOutput), CoreError> {
    let data = &session.session_data;
    let core_excerpt = board_interrogation_excerpt(data, &spec.core_roles, "core");
    let growth_excerpt = board_interrogation_excerpt(data, &spec.growth_roles, "growth");

    let user_context = UserContext {
        last_quarterly_output: session_data_get(data, "commitments").and_then(Value::as_str).map(str::to_string),
        ..Default::default()
    };
    let excerpt = format!(
        "Quarterly report. Last bet: {}. Commitments: {}. Avoided decision: {}. Comfort work: {}. Allocation changes: {}. Next bet: {}. Core board answers: {core_excerpt}. Growth board answers: {growth_excerpt}. Synthesize one markdown report with evidence-labeled progress claims, a verdict on the prior bet, and the next bet's prediction/wrong_if.",
        session_data_get(data, "last_bet_resolution").and_then(Value::as_str).unwrap_or(""),
        session_data_get(data, "commitments").and_then(Value::as_str).unwrap_or(""),
        session_data_get(data, "avoided_decision").and_then(Value::as_str).unwrap_or(""),
        session_data_get(data, "comfort_work").and_then(Value::as_str).unwrap_or(""),
        session_data_get(data, "allocation_changes").and_then(Value::as_str).unwrap_or(""),
        session_data_get(data, "next_bet").and_then(Value::as_str).unwrap_or(""),
    );
    let ctx = PromptContext { workflow_excerpt: excerpt, user_context, ..Default::default() };
    let messages = assemble_prompt(&ctx);
    let schema = report_schema();
    let value = adapter.complete(OperationKind::Quarterly, messages, &schema, deadline).await?;
    if !validate(&schema, &value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "quarterly_report".into(), attempts: 1 });
    }

    let get = |k: &str| value.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let output = QuarterlyOutput {
        markdown: get("reportMarkdown"),
        bet_prediction: get("betPrediction"),
        bet_wrong_if: get("betWrongIf"),
        last_bet_correct: value.get("lastBetCorrect").and_then(Value::as_bool).unwrap_or(false),
    };

    let result = runtime.submit(session, spec, SubmitAction::Answer(output.markdown.clone()))?;
    Ok((result, output))
}

/// Inserts one `EvidenceItem` per board-role progress claim collected
/// during the interrogation loops (spec §4.5.5 "Evidence strength
/// labels are attached to every progress claim"), weakening any claim
/// that names no concrete, observable outcome.
fn record_board_interrogation_evidence(
    store: &Store,
    random: &dyn RandomSource,
    session_id: &str,
    session_data: &Value,
    roles: &[String],
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    for (i, role) in roles.iter().enumerate() {
        let answer = session_data_get(session_data, &format!("{prefix}_answer_{i}")).and_then(Value::as_str).unwrap_or_default();
        let item = store.insert_evidence_item(
            random.new_id().to_string(),
            session_id.to_string(),
            None,
            EvidenceType::Decision,
            answer.to_string(),
            None,
            Some(format!("{role} board interrogation")),
            now,
        )?;
        if !has_outcome_marker(answer) {
            store.weaken_evidence_strength(&item.sync.id, EvidenceStrength::Medium, now)?;
        }
    }
    Ok(())
}

/// Persists what `generate_report` can't: the prior bet's evaluation,
/// the next bet, an evidence item per board-role progress claim plus
/// one for the report synthesis itself, and a fresh `PortfolioVersion`
/// snapshot. Called once the session has completed.
pub fn finalize_quarterly(
    store: &Store,
    random: &dyn RandomSource,
    session_id: &str,
    session_data: &Value,
    spec: &QuarterlySpec,
    output: &QuarterlyOutput,
    now: DateTime<Utc>,
) -> Result<(), CoreError> {
    if let Some(bet) = store.most_recent_bet()? {
        if bet.status == BetStatus::Open {
            let target = if output.last_bet_correct { BetStatus::Correct } else { BetStatus::Wrong };
            if validate_bet_transition(bet.status, target) == BetTransitionCheck::Ok {
                store.set_bet_status(&bet.sync.id, target, Some(session_id), now)?;
            }
        }
    }

    store.create_bet(random.new_id().to_string(), output.bet_prediction.clone(), output.bet_wrong_if.clone(), session_id.to_string(), now, now)?;

    record_board_interrogation_evidence(store, random, session_id, session_data, &spec.core_roles, "core", now)?;
    record_board_interrogation_evidence(store, random, session_id, session_data, &spec.growth_roles, "growth", now)?;

    store.insert_evidence_item(
        random.new_id().to_string(),
        session_id.to_string(),
        None,
        EvidenceType::Decision,
        output.markdown.chars().take(300).collect(),
        None,
        Some("quarterly report synthesis".into()),
        now,
    )?;

    let snapshot = store.build_portfolio_snapshot()?;
    let snapshot_json = serde_json::to_string(&snapshot).map_err(|e| CoreError::ValidationFailure(e.to_string()))?;
    store.append_portfolio_version(random.new_id().to_string(), snapshot_json, "quarterly", now)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_day_eligibility_window() {
        let now = Utc::now();
        assert!(too_soon_for_quarterly(Some(now - chrono::Duration::days(10)), now));
        assert!(!too_soon_for_quarterly(Some(now - chrono::Duration::days(31)), now));
        assert!(!too_soon_for_quarterly(None, now));
    }

    #[test]
    fn q6_skips_growth_states_when_absent() {
        let spec = QuarterlySpec { has_growth_roles: false, core_roles: vec!["Accountability".into()], growth_roles: vec![] };
        let outcome = spec.apply("Q6_HealthUpdate", &json!({}), "");
        let StepOutcome::Advance { next_state, .. } = outcome else { panic!() };
        assert_eq!(next_state, "Q9_TriggerCheck");
    }

    #[test]
    fn core_board_loop_falls_through_to_generate_report_without_growth() {
        let spec = QuarterlySpec { has_growth_roles: false, core_roles: vec!["Accountability".into()], growth_roles: vec![] };
        let data = json!({"core_cursor": 0});
        let outcome = spec.apply("CoreBoardInterrogation", &data, "concrete answer here");
        let StepOutcome::Advance { next_state, .. } = outcome else { panic!() };
        assert_eq!(next_state, "GenerateReport");
    }
}
