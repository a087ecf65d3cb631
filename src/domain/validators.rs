//! Allocation, persona, bet-transition, and portfolio-deletion invariants
//! (spec §4.2, §8).

use crate::types::BetStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationCheck {
    Ok,
    Warning(i64),
    Error(i64),
}

/// Green if `Σ∈[95,105]`, yellow (warning) if `Σ∈[90,94]∪[106,110]`, red
/// (error) otherwise.
pub fn validate_allocation(allocations: &[i64]) -> AllocationCheck {
    let sum: i64 = allocations.iter().sum();
    match sum {
        95..=105 => AllocationCheck::Ok,
        90..=94 | 106..=110 => AllocationCheck::Warning(sum),
        _ => AllocationCheck::Error(sum),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaField {
    Name,
    Background,
    CommunicationStyle,
    SignaturePhrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonaFieldCheck {
    Ok,
    FieldOutOfRange(PersonaField),
}

pub struct PersonaFields<'a> {
    pub name: &'a str,
    pub background: &'a str,
    pub communication_style: &'a str,
    pub signature_phrase: &'a str,
}

/// Bounds from spec §3: name 1–50, background 10–300, style 10–200,
/// phrase 0–100 (phrase is optional so its lower bound is 0).
pub fn validate_persona_fields(fields: &PersonaFields) -> PersonaFieldCheck {
    let checks: [(PersonaField, usize, usize, usize); 4] = [
        (PersonaField::Name, fields.name.chars().count(), 1, 50),
        (PersonaField::Background, fields.background.chars().count(), 10, 300),
        (
            PersonaField::CommunicationStyle,
            fields.communication_style.chars().count(),
            10,
            200,
        ),
        (PersonaField::SignaturePhrase, fields.signature_phrase.chars().count(), 0, 100),
    ];
    for (field, len, min, max) in checks {
        if len < min || len > max {
            return PersonaFieldCheck::FieldOutOfRange(field);
        }
    }
    PersonaFieldCheck::Ok
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetTransitionCheck {
    Ok,
    IllegalTransition,
}

/// Allowed edges: `open→{correct,wrong,expired}`; `expired→{correct,wrong}`
/// (retroactive); all other transitions, including from a terminal state,
/// fail (spec §4.2, §8).
pub fn validate_bet_transition(current: BetStatus, target: BetStatus) -> BetTransitionCheck {
    let ok = matches!(
        (current, target),
        (BetStatus::Open, BetStatus::Correct)
            | (BetStatus::Open, BetStatus::Wrong)
            | (BetStatus::Open, BetStatus::Expired)
            | (BetStatus::Expired, BetStatus::Correct)
            | (BetStatus::Expired, BetStatus::Wrong)
    );
    if ok {
        BetTransitionCheck::Ok
    } else {
        BetTransitionCheck::IllegalTransition
    }
}

pub const MIN_PROBLEMS: usize = 3;
pub const MAX_PROBLEMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemDeletionCheck {
    Ok,
    MinimumProblemsViolation,
}

/// Fails if deleting one more problem would drop the portfolio below
/// `MIN_PROBLEMS` (spec §4.6, §8 boundary).
pub fn validate_problem_deletion(current_count: usize) -> ProblemDeletionCheck {
    if current_count <= MIN_PROBLEMS {
        ProblemDeletionCheck::MinimumProblemsViolation
    } else {
        ProblemDeletionCheck::Ok
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn bet_status_strategy() -> impl Strategy<Value = BetStatus> {
        prop_oneof![
            Just(BetStatus::Open),
            Just(BetStatus::Correct),
            Just(BetStatus::Wrong),
            Just(BetStatus::Expired),
        ]
    }

    proptest! {
        /// Whatever the inputs, the three allocation bands partition the
        /// integers exactly as spec §4.2 describes — no sum falls outside
        /// all three, and the band matches the sum's own range.
        #[test]
        fn allocation_check_matches_its_own_sum(allocations in prop::collection::vec(-50i64..150, 0..8)) {
            let sum: i64 = allocations.iter().sum();
            match validate_allocation(&allocations) {
                AllocationCheck::Ok => prop_assert!((95..=105).contains(&sum)),
                AllocationCheck::Warning(reported) => {
                    prop_assert_eq!(reported, sum);
                    prop_assert!((90..=94).contains(&sum) || (106..=110).contains(&sum));
                }
                AllocationCheck::Error(reported) => {
                    prop_assert_eq!(reported, sum);
                    prop_assert!(!(90..=110).contains(&sum));
                }
            }
        }

        /// No transition ever re-enters `Open`, and nothing ever leaves a
        /// terminal state (`Correct`/`Wrong`) — the two structural rules
        /// the explicit matrix in spec §4.2/§8 is built from.
        #[test]
        fn bet_transition_matrix_obeys_structural_rules(
            current in bet_status_strategy(),
            target in bet_status_strategy(),
        ) {
            let check = validate_bet_transition(current, target);
            if target == BetStatus::Open {
                prop_assert_eq!(check, BetTransitionCheck::IllegalTransition);
            }
            if matches!(current, BetStatus::Correct | BetStatus::Wrong) {
                prop_assert_eq!(check, BetTransitionCheck::IllegalTransition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_boundary_scenario() {
        assert_eq!(validate_allocation(&[30, 30, 35]), AllocationCheck::Ok);
        assert_eq!(validate_allocation(&[30, 30, 33]), AllocationCheck::Warning(93));
        assert_eq!(validate_allocation(&[30, 30, 25]), AllocationCheck::Error(85));
    }

    #[test]
    fn allocation_edges_are_inclusive() {
        assert_eq!(validate_allocation(&[95]), AllocationCheck::Ok);
        assert_eq!(validate_allocation(&[105]), AllocationCheck::Ok);
        assert_eq!(validate_allocation(&[90]), AllocationCheck::Warning(90));
        assert_eq!(validate_allocation(&[110]), AllocationCheck::Warning(110));
        assert_eq!(validate_allocation(&[89]), AllocationCheck::Error(89));
        assert_eq!(validate_allocation(&[111]), AllocationCheck::Error(111));
    }

    #[test]
    fn bet_transitions_per_matrix() {
        assert_eq!(
            validate_bet_transition(BetStatus::Open, BetStatus::Expired),
            BetTransitionCheck::Ok
        );
        assert_eq!(
            validate_bet_transition(BetStatus::Expired, BetStatus::Correct),
            BetTransitionCheck::Ok
        );
        assert_eq!(
            validate_bet_transition(BetStatus::Correct, BetStatus::Wrong),
            BetTransitionCheck::IllegalTransition
        );
        assert_eq!(
            validate_bet_transition(BetStatus::Wrong, BetStatus::Open),
            BetTransitionCheck::IllegalTransition
        );
    }

    #[test]
    fn deletion_at_minimum_is_refused() {
        assert_eq!(validate_problem_deletion(3), ProblemDeletionCheck::MinimumProblemsViolation);
        assert_eq!(validate_problem_deletion(4), ProblemDeletionCheck::Ok);
    }

    #[test]
    fn persona_field_bounds() {
        let fields = PersonaFields {
            name: "",
            background: "0123456789",
            communication_style: "0123456789",
            signature_phrase: "",
        };
        assert_eq!(
            validate_persona_fields(&fields),
            PersonaFieldCheck::FieldOutOfRange(PersonaField::Name)
        );
    }
}
