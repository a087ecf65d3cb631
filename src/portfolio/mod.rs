//! Portfolio & Board Manager (spec §4.6): anchoring, health, re-setup
//! triggers, and bet lifecycle orchestration above the `db::` persistence
//! layer.

pub mod anchoring;
pub mod bets;
pub mod health;
pub mod triggers;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::ai::adapter::AiAdapter;
use crate::db::Store;
use crate::domain::validators::{validate_problem_deletion, ProblemDeletionCheck};
use crate::error::CoreError;

/// Deletes a problem without a full re-setup: rejects if the portfolio
/// would drop below the minimum of 3, otherwise snapshots a new
/// `PortfolioVersion` and regenerates `anchored_demand` for every
/// orphaned role (spec §4.6 "Portfolio edits without re-setup").
pub async fn delete_problem(
    store: &Store,
    adapter: &AiAdapter,
    problem_id: &str,
    snapshot_id: String,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Result<(), CoreError> {
    let current_count = store.list_active_problems()?.len();
    if validate_problem_deletion(current_count) != ProblemDeletionCheck::Ok {
        return Err(CoreError::ValidationFailure(
            "deleting this problem would drop the portfolio below the minimum of 3".into(),
        ));
    }

    store.soft_delete_problem(problem_id, now)?;
    anchoring::reanchor_after_problem_deletion(store, adapter, problem_id, now, deadline).await?;

    let snapshot = store.build_portfolio_snapshot()?;
    let snapshot_json = serde_json::to_string(&snapshot).map_err(|e| CoreError::ValidationFailure(e.to_string()))?;
    store.append_portfolio_version(snapshot_id, snapshot_json, "problem_deletion", now)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::problems::NewProblem;
    use crate::types::Direction;

    fn seed_problem(store: &Store, id: &str, order: i64) {
        store
            .insert_problem(
                &NewProblem {
                    id: id.into(),
                    name: id.into(),
                    what_breaks: "x".into(),
                    scarcity_signals: vec!["a".into(), "b".into()],
                    direction: Direction::Stable,
                    direction_rationale: "r".into(),
                    evidence_quotes: ["a".into(), "b".into(), "c".into()],
                    time_allocation_pct: 20,
                    display_order: order,
                },
                Utc::now(),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn deletion_below_minimum_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        seed_problem(&store, "p1", 0);
        seed_problem(&store, "p2", 1);
        seed_problem(&store, "p3", 2);

        let adapter = crate::testing::fake_adapter();
        let result = delete_problem(&store, &adapter, "p1", "v1".into(), Utc::now(), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
