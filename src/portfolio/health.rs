//! Portfolio health computation (spec §4.6).

use crate::db::problems::Problem;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthBreakdown {
    pub appreciating_pct: i64,
    pub depreciating_pct: i64,
    pub stable_pct: i64,
}

/// Sums `time_allocation_pct` across problems sharing a direction.
/// This is deliberately the allocation total, not a problem count — a
/// single 60%-allocated appreciating problem dominates the breakdown
/// over three 5%-allocated depreciating ones.
pub fn compute_health(problems: &[Problem]) -> HealthBreakdown {
    let mut breakdown = HealthBreakdown { appreciating_pct: 0, depreciating_pct: 0, stable_pct: 0 };
    for p in problems {
        match p.direction {
            Direction::Appreciating => breakdown.appreciating_pct += p.time_allocation_pct,
            Direction::Depreciating => breakdown.depreciating_pct += p.time_allocation_pct,
            Direction::Stable => breakdown.stable_pct += p.time_allocation_pct,
        }
    }
    breakdown
}

/// True when depreciating allocation outweighs appreciating allocation
/// — the condition the Market Reality and Devil's Advocate roles press
/// on during governance sessions.
pub fn is_depreciation_dominant(breakdown: &HealthBreakdown) -> bool {
    breakdown.depreciating_pct > breakdown.appreciating_pct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncColumns;

    fn problem(direction: Direction, pct: i64) -> Problem {
        Problem {
            sync: SyncColumns::new("p".into(), chrono::Utc::now()),
            name: "p".into(),
            what_breaks: "x".into(),
            scarcity_signals: vec![],
            direction,
            direction_rationale: "r".into(),
            evidence_quotes: [String::new(), String::new(), String::new()],
            time_allocation_pct: pct,
            display_order: 0,
        }
    }

    #[test]
    fn breakdown_sums_allocation_by_direction() {
        let problems = vec![
            problem(Direction::Appreciating, 40),
            problem(Direction::Depreciating, 35),
            problem(Direction::Stable, 25),
        ];
        let b = compute_health(&problems);
        assert_eq!(b, HealthBreakdown { appreciating_pct: 40, depreciating_pct: 35, stable_pct: 25 });
        assert!(!is_depreciation_dominant(&b));
    }

    #[test]
    fn depreciation_dominant_when_it_outweighs_appreciation() {
        let problems = vec![problem(Direction::Appreciating, 10), problem(Direction::Depreciating, 60)];
        let b = compute_health(&problems);
        assert!(is_depreciation_dominant(&b));
    }
}
