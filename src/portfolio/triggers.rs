//! Re-setup trigger evaluation (spec §4.6). Evaluated at app launch and
//! at the close of each Quarterly session.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::db::problems::Problem;
use crate::db::triggers::APPROACHING_WINDOW_DAYS;
use crate::types::Direction;

pub const TIME_DRIFT_THRESHOLD_PCT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvaluation {
    NotMet,
    /// Within `APPROACHING_WINDOW_DAYS` of `due_at_utc`. Only the
    /// `annual` trigger carries a due date, so only it can reach this
    /// state.
    Approaching,
    Met,
}

/// `annual` is met when `now >= due_at_utc`, approaching inside the
/// 30-day window before that (spec §4.6).
pub fn evaluate_annual(due_at_utc: DateTime<Utc>, now: DateTime<Utc>) -> TriggerEvaluation {
    if now >= due_at_utc {
        TriggerEvaluation::Met
    } else if due_at_utc - now <= Duration::days(APPROACHING_WINDOW_DAYS) {
        TriggerEvaluation::Approaching
    } else {
        TriggerEvaluation::NotMet
    }
}

/// `time_drift` is met if any current problem's allocation differs from
/// its allocation in the most recent snapshot by ≥ 20 points. Problems
/// absent from the snapshot (added since) are ignored — they can only
/// exist after a full re-setup, which already resets drift tracking.
pub fn evaluate_time_drift(current: &[Problem], snapshot_allocations: &HashMap<String, i64>) -> TriggerEvaluation {
    let drifted = current.iter().any(|p| {
        snapshot_allocations
            .get(&p.sync.id)
            .is_some_and(|prior| (p.time_allocation_pct - prior).abs() >= TIME_DRIFT_THRESHOLD_PCT)
    });
    if drifted {
        TriggerEvaluation::Met
    } else {
        TriggerEvaluation::NotMet
    }
}

/// `direction_shift` is met if the same problem's direction differs
/// across the last two completed Quarterly sessions.
pub fn evaluate_direction_shift(previous: Direction, current: Direction) -> TriggerEvaluation {
    if previous != current {
        TriggerEvaluation::Met
    } else {
        TriggerEvaluation::NotMet
    }
}

/// `role_change` / `scope_change` are user-signaled, not computed — the
/// caller passes through whatever the user reported.
pub fn evaluate_user_signaled(signaled: bool) -> TriggerEvaluation {
    if signaled {
        TriggerEvaluation::Met
    } else {
        TriggerEvaluation::NotMet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncColumns;

    fn problem(id: &str, pct: i64) -> Problem {
        Problem {
            sync: SyncColumns::new(id.into(), Utc::now()),
            name: id.into(),
            what_breaks: "x".into(),
            scarcity_signals: vec![],
            direction: Direction::Stable,
            direction_rationale: "r".into(),
            evidence_quotes: [String::new(), String::new(), String::new()],
            time_allocation_pct: pct,
            display_order: 0,
        }
    }

    #[test]
    fn annual_trigger_states() {
        let now = "2026-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(evaluate_annual(now + Duration::days(31), now), TriggerEvaluation::NotMet);
        assert_eq!(evaluate_annual(now + Duration::days(30), now), TriggerEvaluation::Approaching);
        assert_eq!(evaluate_annual(now - Duration::days(1), now), TriggerEvaluation::Met);
    }

    #[test]
    fn time_drift_met_at_20_point_swing() {
        let mut snapshot = HashMap::new();
        snapshot.insert("p1".to_string(), 30);
        let current = vec![problem("p1", 50)];
        assert_eq!(evaluate_time_drift(&current, &snapshot), TriggerEvaluation::Met);

        let current_small = vec![problem("p1", 45)];
        assert_eq!(evaluate_time_drift(&current_small, &snapshot), TriggerEvaluation::NotMet);
    }

    #[test]
    fn direction_shift_detects_a_flip() {
        assert_eq!(
            evaluate_direction_shift(Direction::Stable, Direction::Appreciating),
            TriggerEvaluation::Met
        );
        assert_eq!(
            evaluate_direction_shift(Direction::Stable, Direction::Stable),
            TriggerEvaluation::NotMet
        );
    }
}
