//! Bet lifecycle orchestration: evaluation and auto-expiration (spec
//! §4.6, §8).

use chrono::{DateTime, Utc};

use crate::db::bets::Bet;
use crate::db::Store;
use crate::domain::validators::{validate_bet_transition, BetTransitionCheck};
use crate::error::CoreError;
use crate::types::BetStatus;

/// Moves `bet_id` to `target`, rejecting any transition the domain
/// validator does not allow (spec §4.2 bet-transition matrix).
pub fn evaluate_bet(
    store: &Store,
    bet_id: &str,
    target: BetStatus,
    evaluation_session_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Bet, CoreError> {
    let bet = store.get_bet(bet_id)?;
    if validate_bet_transition(bet.status, target) != BetTransitionCheck::Ok {
        return Err(CoreError::ValidationFailure(format!(
            "illegal bet transition {:?} -> {:?}",
            bet.status, target
        )));
    }
    Ok(store.set_bet_status(bet_id, target, evaluation_session_id, now)?)
}

/// Expires every open bet past its `due_at_utc`. Safe to run repeatedly
/// — the query only ever returns bets still `open`, so re-running after
/// a crash mid-pass re-expires nothing twice (spec §5 idempotent pass).
pub fn expire_overdue_bets(store: &Store, now: DateTime<Utc>) -> Result<Vec<Bet>, CoreError> {
    let due = store.list_open_bets_due_before(now)?;
    let mut expired = Vec::with_capacity(due.len());
    for bet in due {
        expired.push(store.set_bet_status(&bet.sync.id, BetStatus::Expired, None, now)?);
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_pass_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let created = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        store
            .create_bet("b1".into(), "pred".into(), "wrong if nothing ships".into(), "s1".into(), created, created)
            .unwrap();

        let past_due = created + chrono::Duration::days(91);
        let first = expire_overdue_bets(&store, past_due).unwrap();
        assert_eq!(first.len(), 1);

        let second = expire_overdue_bets(&store, past_due).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        store.create_bet("b1".into(), "pred".into(), "wrong if nothing ships".into(), "s1".into(), now, now).unwrap();
        evaluate_bet(&store, "b1", BetStatus::Wrong, None, now).unwrap();
        let result = evaluate_bet(&store, "b1", BetStatus::Correct, None, now);
        assert!(result.is_err());
    }
}
