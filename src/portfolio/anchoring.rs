//! Board construction: core-role anchoring and growth-role activation
//! (spec §4.6).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ai::adapter::{AiAdapter, OperationKind};
use crate::ai::prompts::{assemble_prompt, PromptContext};
use crate::ai::schema::{validate, Field, FieldType, Schema};
use crate::db::board::{NewBoardMember, Persona};
use crate::db::problems::Problem;
use crate::db::Store;
use crate::domain::validators::{validate_persona_fields, PersonaFieldCheck, PersonaFields};
use crate::error::CoreError;
use crate::types::{Direction, RoleType};

/// A core or growth role with its resolved anchor, before a persona and
/// anchored demand have been generated.
#[derive(Debug, Clone)]
pub struct RoleAnchor {
    pub role_type: RoleType,
    pub is_growth_role: bool,
    pub anchored_problem_id: Option<String>,
}

/// Pure anchoring algorithm. Always produces the 5 core roles; growth
/// roles are included only when at least one appreciating problem
/// exists (spec §4.6 — absent, not merely inactive, otherwise).
pub fn assign_anchors(problems: &[Problem]) -> Vec<RoleAnchor> {
    let mut ordered: Vec<&Problem> = problems.iter().collect();
    ordered.sort_by_key(|p| p.display_order);

    let mut appreciating: Vec<&Problem> = ordered
        .iter()
        .copied()
        .filter(|p| p.direction == Direction::Appreciating)
        .collect();
    appreciating.sort_by_key(|p| std::cmp::Reverse(p.time_allocation_pct));

    let mut anchors = Vec::with_capacity(7);

    let long_term_anchor = appreciating.first().or(ordered.first()).map(|p| p.sync.id.clone());
    anchors.push(RoleAnchor {
        role_type: RoleType::LongTermPositioning,
        is_growth_role: false,
        anchored_problem_id: long_term_anchor.clone(),
    });

    // Remaining core roles cycle through problems not yet used by
    // LongTermPositioning, reusing a problem only once every distinct
    // problem has been assigned once (unavoidable when the portfolio
    // holds the minimum of 3 problems and 5 core roles need anchors).
    let remaining_roles = [
        RoleType::Accountability,
        RoleType::MarketReality,
        RoleType::Avoidance,
        RoleType::DevilsAdvocate,
    ];
    let candidates: Vec<String> = ordered
        .iter()
        .map(|p| p.sync.id.clone())
        .filter(|id| Some(id) != long_term_anchor.as_ref())
        .collect();
    let pool: Vec<String> = if candidates.is_empty() {
        ordered.iter().map(|p| p.sync.id.clone()).collect()
    } else {
        candidates
    };

    for (i, role) in remaining_roles.into_iter().enumerate() {
        let anchor = pool.get(i % pool.len().max(1)).cloned();
        anchors.push(RoleAnchor { role_type: role, is_growth_role: false, anchored_problem_id: anchor });
    }

    if let Some(top) = appreciating.first() {
        for role in RoleType::GROWTH {
            anchors.push(RoleAnchor {
                role_type: role,
                is_growth_role: true,
                anchored_problem_id: Some(top.sync.id.clone()),
            });
        }
    }

    anchors
}

fn persona_schema() -> Schema {
    Schema {
        fields: vec![
            Field { name: "name", required: true, kind: FieldType::String { min_len: 1, max_len: 50 } },
            Field { name: "background", required: true, kind: FieldType::String { min_len: 10, max_len: 300 } },
            Field {
                name: "communicationStyle",
                required: true,
                kind: FieldType::String { min_len: 10, max_len: 200 },
            },
            Field {
                name: "signaturePhrase",
                required: true,
                kind: FieldType::String { min_len: 0, max_len: 100 },
            },
            Field { name: "anchoredDemand", required: true, kind: FieldType::String { min_len: 10, max_len: 400 } },
        ],
    }
}

struct GeneratedPersona {
    persona: Persona,
    anchored_demand: String,
}

async fn generate_persona(
    adapter: &AiAdapter,
    role_type: RoleType,
    problem: Option<&Problem>,
    deadline: Duration,
) -> Result<GeneratedPersona, CoreError> {
    let problem_excerpt = problem
        .map(|p| format!("Anchored problem: {} — {}", p.name, p.what_breaks))
        .unwrap_or_else(|| "No anchored problem in this portfolio.".into());

    let ctx = PromptContext {
        workflow_excerpt: format!(
            "Board construction: invent a named board-member persona for the {role_type:?} role and a single anchored demand — a specific, pointed question this persona will keep asking — grounded in the anchored problem below. {problem_excerpt}"
        ),
        ..Default::default()
    };
    let messages = assemble_prompt(&ctx);
    let schema = persona_schema();
    let value = adapter.complete(OperationKind::AnchoredDemandGeneration, messages, &schema, deadline).await?;
    parse_persona(&value)
}

fn parse_persona(value: &Value) -> Result<GeneratedPersona, CoreError> {
    let schema = persona_schema();
    if !validate(&schema, value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "board_persona".into(), attempts: 1 });
    }
    let get = |k: &str| value.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let persona = Persona {
        name: get("name"),
        background: get("background"),
        communication_style: get("communicationStyle"),
        signature_phrase: get("signaturePhrase"),
    };
    let fields = PersonaFields {
        name: &persona.name,
        background: &persona.background,
        communication_style: &persona.communication_style,
        signature_phrase: &persona.signature_phrase,
    };
    if let PersonaFieldCheck::FieldOutOfRange(field) = validate_persona_fields(&fields) {
        return Err(CoreError::ValidationFailure(format!("generated persona field out of range: {field:?}")));
    }
    Ok(GeneratedPersona { persona, anchored_demand: get("anchoredDemand") })
}

/// Constructs the full board for a fresh Setup: core roles always,
/// growth roles iff at least one appreciating problem exists (spec
/// §4.6). Each role's persona and anchored demand come from the AI
/// adapter; IDs are supplied by the caller so they can be generated
/// from whatever `RandomSource` the caller already holds.
pub async fn build_board(
    store: &Store,
    adapter: &AiAdapter,
    ids: impl Iterator<Item = String>,
    now: chrono::DateTime<chrono::Utc>,
    deadline: Duration,
) -> Result<(), CoreError> {
    let problems = store.list_active_problems()?;
    let anchors = assign_anchors(&problems);
    let mut ids = ids;

    for anchor in anchors {
        let problem = anchor
            .anchored_problem_id
            .as_ref()
            .and_then(|id| problems.iter().find(|p| &p.sync.id == id));
        let generated = generate_persona(adapter, anchor.role_type, problem, deadline).await?;
        let id = ids.next().ok_or_else(|| CoreError::ValidationFailure("not enough ids supplied for board construction".into()))?;
        store.insert_board_member(
            &NewBoardMember {
                id,
                role_type: anchor.role_type,
                is_growth_role: anchor.is_growth_role,
                is_active: true,
                anchored_problem_id: anchor.anchored_problem_id,
                anchored_demand: Some(generated.anchored_demand),
                persona: generated.persona,
            },
            now,
        )?;
    }
    Ok(())
}

fn demand_schema() -> Schema {
    Schema {
        fields: vec![Field { name: "anchoredDemand", required: true, kind: FieldType::String { min_len: 10, max_len: 400 } }],
    }
}

async fn regenerate_demand(
    adapter: &AiAdapter,
    role_type: RoleType,
    problem: Option<&Problem>,
    deadline: Duration,
) -> Result<String, CoreError> {
    let problem_excerpt = problem
        .map(|p| format!("Re-anchored problem: {} — {}", p.name, p.what_breaks))
        .unwrap_or_else(|| "No problem left to anchor to.".into());
    let ctx = PromptContext {
        workflow_excerpt: format!(
            "Problem deletion re-anchoring: regenerate only the anchored demand for the existing {role_type:?} persona, grounded in its new anchor. {problem_excerpt}"
        ),
        ..Default::default()
    };
    let messages = assemble_prompt(&ctx);
    let schema = demand_schema();
    let value = adapter.complete(OperationKind::AnchoredDemandGeneration, messages, &schema, deadline).await?;
    if !validate(&schema, &value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "reanchor_demand".into(), attempts: 1 });
    }
    Ok(value.get("anchoredDemand").and_then(Value::as_str).unwrap_or_default().to_string())
}

/// After a problem is deleted, regenerates `anchored_demand` for every
/// role that pointed at it — persona fields are preserved, only the
/// demand and anchor change (spec §4.6 bounded edits).
pub async fn reanchor_after_problem_deletion(
    store: &Store,
    adapter: &AiAdapter,
    deleted_problem_id: &str,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Result<(), CoreError> {
    let affected = store.list_board_members_anchored_to(deleted_problem_id)?;
    if affected.is_empty() {
        return Ok(());
    }

    let remaining = store.list_active_problems()?;
    let anchors = assign_anchors(&remaining);

    for member in affected {
        let replacement = anchors
            .iter()
            .find(|a| a.role_type == member.role_type)
            .and_then(|a| a.anchored_problem_id.clone())
            .or_else(|| remaining.first().map(|p| p.sync.id.clone()));
        let problem = replacement.as_ref().and_then(|id| remaining.iter().find(|p| &p.sync.id == id));
        let demand = regenerate_demand(adapter, member.role_type, problem, deadline).await?;
        store.set_board_member_anchor(&member.sync.id, replacement.as_deref(), Some(&demand), now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncColumns;

    fn problem(id: &str, direction: Direction, pct: i64, order: i64) -> Problem {
        Problem {
            sync: SyncColumns::new(id.into(), chrono::Utc::now()),
            name: id.into(),
            what_breaks: "it breaks".into(),
            scarcity_signals: vec![],
            direction,
            direction_rationale: "rationale".into(),
            evidence_quotes: [String::new(), String::new(), String::new()],
            time_allocation_pct: pct,
            display_order: order,
        }
    }

    #[test]
    fn growth_roles_present_only_with_an_appreciating_problem() {
        let problems = vec![
            problem("p1", Direction::Stable, 40, 0),
            problem("p2", Direction::Depreciating, 30, 1),
            problem("p3", Direction::Stable, 30, 2),
        ];
        let anchors = assign_anchors(&problems);
        assert_eq!(anchors.len(), 5);
        assert!(anchors.iter().all(|a| !a.is_growth_role));
    }

    #[test]
    fn growth_roles_anchor_to_top_appreciating_problem() {
        let problems = vec![
            problem("p1", Direction::Appreciating, 20, 0),
            problem("p2", Direction::Appreciating, 50, 1),
            problem("p3", Direction::Stable, 30, 2),
        ];
        let anchors = assign_anchors(&problems);
        assert_eq!(anchors.len(), 7);
        let growth: Vec<_> = anchors.iter().filter(|a| a.is_growth_role).collect();
        assert_eq!(growth.len(), 2);
        assert!(growth.iter().all(|a| a.anchored_problem_id.as_deref() == Some("p2")));
    }

    #[test]
    fn long_term_positioning_anchors_to_appreciating_when_available() {
        let problems = vec![
            problem("p1", Direction::Stable, 50, 0),
            problem("p2", Direction::Appreciating, 20, 1),
            problem("p3", Direction::Depreciating, 30, 2),
        ];
        let anchors = assign_anchors(&problems);
        let ltp = anchors.iter().find(|a| a.role_type == RoleType::LongTermPositioning).unwrap();
        assert_eq!(ltp.anchored_problem_id.as_deref(), Some("p2"));
    }

    #[test]
    fn minimum_three_problems_still_anchors_every_core_role() {
        let problems = vec![
            problem("p1", Direction::Stable, 40, 0),
            problem("p2", Direction::Stable, 30, 1),
            problem("p3", Direction::Stable, 30, 2),
        ];
        let anchors = assign_anchors(&problems);
        assert!(anchors.iter().all(|a| a.anchored_problem_id.is_some()));
    }
}
