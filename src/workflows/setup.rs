//! Setup: builds a fresh portfolio and board (spec §4.5.4).
//!
//! Collection happens over the FSM one problem at a time; the
//! DB/AI-heavy board construction itself (spec §4.6) runs once, in
//! `publish`, after the session has already committed a `Complete`
//! transition — the FSM never suspends mid-transition for I/O.

use std::time::Duration;

use serde_json::{json, Value};

use crate::db::problems::NewProblem;
use crate::db::Store;
use crate::domain::validators::{validate_allocation, AllocationCheck};
use crate::error::CoreError;
use crate::fsm::{session_data_set, Prompt, StepOutcome, WorkflowSpec};
use crate::ports::{Clock, RandomSource};
use crate::types::Direction;

pub struct SetupSpec;

const MAX_PROBLEMS: usize = 5;

fn collected_count(session_data: &Value) -> usize {
    session_data.get("problems").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0)
}

/// One problem record as collected from a single pipe-delimited answer:
/// `name|what_breaks|scarcity1;scarcity2|direction|rationale|ev1;ev2;ev3|allocation`.
fn parse_problem_line(line: &str) -> Option<Value> {
    let parts: Vec<&str> = line.split('|').collect();
    if parts.len() != 7 {
        return None;
    }
    let scarcity: Vec<&str> = parts[2].split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    let evidences: Vec<&str> = parts[5].split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    let allocation: i64 = parts[6].trim().parse().ok()?;
    Some(json!({
        "name": parts[0].trim(),
        "whatBreaks": parts[1].trim(),
        "scarcitySignals": scarcity,
        "direction": parts[3].trim(),
        "directionRationale": parts[4].trim(),
        "evidenceQuotes": evidences,
        "allocation": allocation,
    }))
}

impl WorkflowSpec for SetupSpec {
    fn initial_state(&self) -> &'static str {
        "SensitivityGate"
    }

    fn prompt_for(&self, state: &str, session_data: &Value) -> Prompt {
        let text = match state {
            "SensitivityGate" => "Setup takes about 20 minutes and asks about work you may find uncomfortable. Continue?".into(),
            "CollectProblem" => format!(
                "Problem #{}: name|what breaks if you stopped|2 scarcity signals (;-separated)|direction (appreciating/depreciating/stable)|rationale|3 evidence quotes (;-separated)|allocation %. Type \"done\" if you have at least 3.",
                collected_count(session_data) + 1
            ),
            "TimeAllocationValidation" => {
                let allocations: Vec<i64> = session_data
                    .get("problems")
                    .and_then(Value::as_array)
                    .map(|ps| ps.iter().filter_map(|p| p.get("allocation").and_then(Value::as_i64)).collect())
                    .unwrap_or_default();
                match validate_allocation(&allocations) {
                    AllocationCheck::Warning(sum) => format!(
                        "Allocations sum to {sum}%, outside the [95,105] ideal band. Type \"confirm\" to publish anyway, or adjust and resubmit."
                    ),
                    AllocationCheck::Error(sum) => format!(
                        "Allocations sum to {sum}%, too far outside the ideal band to publish. Adjust and resubmit."
                    ),
                    AllocationCheck::Ok => "Allocations recorded. Confirm to publish, or adjust and resubmit.".into(),
                }
            }
            "Publish" => "Publishing your portfolio and board.".into(),
            other => other.to_string(),
        };
        Prompt { state: state.to_string(), text }
    }

    fn requires_vagueness_gate(&self, state: &str) -> bool {
        state == "CollectProblem"
    }

    fn apply(&self, state: &str, session_data: &Value, answer: &str) -> StepOutcome {
        match state {
            "SensitivityGate" => StepOutcome::Advance { next_state: "CollectProblem".into(), session_data: session_data.clone() },
            "CollectProblem" => {
                let count = collected_count(session_data);
                if answer.trim().eq_ignore_ascii_case("done") && count >= 3 {
                    return StepOutcome::Advance { next_state: "TimeAllocationValidation".into(), session_data: session_data.clone() };
                }
                let Some(problem) = parse_problem_line(answer) else {
                    return StepOutcome::Advance { next_state: "CollectProblem".into(), session_data: session_data.clone() };
                };
                let mut problems = session_data.get("problems").and_then(Value::as_array).cloned().unwrap_or_default();
                problems.push(problem);
                let data = session_data_set(session_data.clone(), "problems", json!(problems));
                if problems_len(&data) >= MAX_PROBLEMS {
                    StepOutcome::Advance { next_state: "TimeAllocationValidation".into(), session_data: data }
                } else {
                    StepOutcome::Advance { next_state: "CollectProblem".into(), session_data: data }
                }
            }
            "TimeAllocationValidation" => {
                let allocations: Vec<i64> = session_data
                    .get("problems")
                    .and_then(Value::as_array)
                    .map(|ps| ps.iter().filter_map(|p| p.get("allocation").and_then(Value::as_i64)).collect())
                    .unwrap_or_default();
                match validate_allocation(&allocations) {
                    AllocationCheck::Ok => {
                        StepOutcome::Advance { next_state: "Publish".into(), session_data: session_data.clone() }
                    }
                    AllocationCheck::Warning(_) => {
                        // Warning band requires an explicit override, not a
                        // silent pass-through (spec "AllocationWarning(93);
                        // explicit override permitted").
                        if answer.trim().eq_ignore_ascii_case("confirm") {
                            StepOutcome::Advance { next_state: "Publish".into(), session_data: session_data.clone() }
                        } else {
                            StepOutcome::Advance { next_state: "CollectProblem".into(), session_data: session_data.clone() }
                        }
                    }
                    AllocationCheck::Error(_) => {
                        StepOutcome::Advance { next_state: "CollectProblem".into(), session_data: session_data.clone() }
                    }
                }
            }
            "Publish" => StepOutcome::Complete { output_markdown: "Portfolio published.".into(), session_data: session_data.clone() },
            other => StepOutcome::Advance { next_state: other.to_string(), session_data: session_data.clone() },
        }
    }
}

fn problems_len(data: &Value) -> usize {
    data.get("problems").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0)
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "appreciating" => Direction::Appreciating,
        "depreciating" => Direction::Depreciating,
        _ => Direction::Stable,
    }
}

/// Materializes the problems collected during the session into the
/// store, builds the board, creates the annual re-setup trigger, and
/// appends the first `PortfolioVersion` snapshot. Called once the
/// session has reached `Publish` and committed its `Complete`
/// transition (spec §4.5.4 + §4.6).
pub async fn publish_portfolio(
    store: &Store,
    adapter: &crate::ai::adapter::AiAdapter,
    clock: &dyn Clock,
    random: &dyn RandomSource,
    session_data: &Value,
    deadline: Duration,
) -> Result<(), CoreError> {
    let now = clock.now_utc();
    let problems = session_data.get("problems").and_then(Value::as_array).cloned().unwrap_or_default();

    // publish_portfolio is reachable directly by any caller, not only via
    // a session that already passed through TimeAllocationValidation —
    // re-check the allocation gate here so an Error-band portfolio can
    // never be written ("AllocationError(85); publish refused.").
    let allocations: Vec<i64> = problems.iter().filter_map(|p| p.get("allocation").and_then(Value::as_i64)).collect();
    if let AllocationCheck::Error(sum) = validate_allocation(&allocations) {
        return Err(CoreError::ValidationFailure(format!("allocation sum {sum}% is outside the publishable range")));
    }

    // Re-setup replaces the portfolio and board wholesale rather than
    // appending to whatever a prior Setup session published (spec
    // §4.6). A first-time Setup finds nothing active to retire, so this
    // is a no-op on that path.
    store.soft_delete_all_active_problems(now)?;
    store.soft_delete_all_board_members(now)?;

    for (i, p) in problems.iter().enumerate() {
        let get_str = |k: &str| p.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        let scarcity: Vec<String> = p
            .get("scarcitySignals")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let evidences: Vec<String> = p
            .get("evidenceQuotes")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let quotes = [
            evidences.first().cloned().unwrap_or_default(),
            evidences.get(1).cloned().unwrap_or_default(),
            evidences.get(2).cloned().unwrap_or_default(),
        ];
        store.insert_problem(
            &NewProblem {
                id: random.new_id().to_string(),
                name: get_str("name"),
                what_breaks: get_str("whatBreaks"),
                scarcity_signals: scarcity,
                direction: parse_direction(&get_str("direction")),
                direction_rationale: get_str("directionRationale"),
                evidence_quotes: quotes,
                time_allocation_pct: p.get("allocation").and_then(Value::as_i64).unwrap_or(0),
                display_order: i as i64,
            },
            now,
        )?;
    }

    let ids = std::iter::repeat_with(|| random.new_id().to_string()).take(7);
    crate::portfolio::anchoring::build_board(store, adapter, ids, now, deadline).await?;

    let stored_problems = store.list_active_problems()?;
    let breakdown = crate::portfolio::health::compute_health(&stored_problems);
    store.upsert_portfolio_health(
        breakdown.appreciating_pct,
        breakdown.depreciating_pct,
        breakdown.stable_pct,
        None,
        None,
        1,
        now,
    )?;

    store.create_annual_trigger(random.new_id().to_string(), now, now)?;

    let snapshot = store.build_portfolio_snapshot()?;
    let snapshot_json = serde_json::to_string(&snapshot).map_err(|e| CoreError::ValidationFailure(e.to_string()))?;
    store.append_portfolio_version(random.new_id().to_string(), snapshot_json, "setup", now)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_line_parses_seven_fields() {
        let value = parse_problem_line("Oncall|pages interrupt focus|noisy alerts;no runbooks|depreciating|burns trust|\"it's bad\";\"we lose sleep\";\"no one wants it\"|30").unwrap();
        assert_eq!(value["name"], "Oncall");
        assert_eq!(value["allocation"], 30);
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_problem_line("not enough fields").is_none());
    }
}
