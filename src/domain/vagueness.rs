//! Vagueness gate heuristic (spec §4.2, §4.4).
//!
//! `classify_vagueness` is the primary signal consulted by the FSM
//! runtime before any free-text answer advances a session. The AI
//! Adapter may run a confirmatory second pass on top of this, but the
//! heuristic alone must be sound enough to gate on its own.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vagueness {
    Concrete,
    Vague,
}

/// Generic qualifiers that, on their own, signal hand-waving rather
/// than a concrete example. Closed list per spec §4.2; callers needing
/// a project-specific addition should extend this list, not bypass it.
const GENERIC_QUALIFIERS: &[&str] = &[
    "stuff", "things", "helped", "a lot", "various", "some", "improve", "kind of", "sort of",
];

/// Timeline markers: weekday/month names, relative-time phrases, or a
/// bare number that could be a date/quarter/duration.
const TIMELINE_WORDS: &[&str] = &[
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "january",
    "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "yesterday", "today", "tomorrow", "last week", "next week", "q1",
    "q2", "q3", "q4", "this week", "last month", "next month",
];

const STAKEHOLDER_WORDS: &[&str] = &["with", "for", "from", "manager", "director", "vp", "ceo", "cto", "team", "client", "customer"];

const OUTCOME_WORDS: &[&str] = &[
    "resulted in", "led to", "increased", "decreased", "shipped", "launched", "completed",
    "closed", "signed", "approved", "rejected", "%", "reduced", "grew", "saved",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// A "named instance" is a proper noun, quoted span, or digit sequence
/// anywhere but the very first word — a project name, meeting title,
/// decision, deliverable, or person's name almost always surfaces as
/// one of these.
fn has_named_instance(answer: &str) -> bool {
    if answer.contains('"') || answer.contains('\'') {
        return true;
    }
    let mut saw_digit = false;
    for ch in answer.chars() {
        if ch.is_ascii_digit() {
            saw_digit = true;
            break;
        }
    }
    if saw_digit {
        return true;
    }
    let words: Vec<&str> = answer.split_whitespace().collect();
    words.iter().skip(1).any(|w| {
        let trimmed = w.trim_matches(|c: char| !c.is_alphanumeric());
        trimmed.chars().next().is_some_and(|c| c.is_uppercase())
    })
}

fn has_context_marker(lower: &str) -> bool {
    contains_any(lower, TIMELINE_WORDS) || contains_any(lower, STAKEHOLDER_WORDS) || contains_any(lower, OUTCOME_WORDS)
}

/// Vague iff all three hold: no named instance, contains a generic
/// qualifier, and lacks any timeline/stakeholder/observable-outcome
/// marker.
pub fn classify_vagueness(answer: &str) -> Vagueness {
    let lower = answer.to_lowercase();
    let no_named_instance = !has_named_instance(answer);
    let has_qualifier = contains_any(&lower, GENERIC_QUALIFIERS);
    let lacks_context = !has_context_marker(&lower);

    if no_named_instance && has_qualifier && lacks_context {
        Vagueness::Vague
    } else {
        Vagueness::Concrete
    }
}

/// True if `answer` names a concrete, observable outcome (spec §4.5.5
/// evidence-strength weakening: a progress claim with no observable
/// outcome attached is downgraded, never upgraded, by the validator).
pub fn has_outcome_marker(answer: &str) -> bool {
    contains_any(&answer.to_lowercase(), OUTCOME_WORDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_hand_wave_is_vague() {
        assert_eq!(classify_vagueness("I did some stuff and helped a lot"), Vagueness::Vague);
    }

    #[test]
    fn named_project_with_qualifier_is_concrete() {
        assert_eq!(
            classify_vagueness("I helped ship Project Atlas"),
            Vagueness::Concrete
        );
    }

    #[test]
    fn qualifier_with_timeline_is_concrete() {
        assert_eq!(
            classify_vagueness("various things on Tuesday"),
            Vagueness::Concrete
        );
    }

    #[test]
    fn no_qualifier_at_all_is_concrete() {
        assert_eq!(
            classify_vagueness("I rewrote the billing reconciliation job"),
            Vagueness::Concrete
        );
    }
}
