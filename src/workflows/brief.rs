//! Weekly Brief: `Collect → Summarize → Render → MicroReview → Publish →
//! (Regen | Finalize)` (spec §4.5.2).
//!
//! Unlike Quick Version, Setup, and Quarterly, a brief is not a user
//! interrogation and so is not a `GovernanceSession` — it's a scheduled
//! pipeline over a week's `DailyEntry` rows, with the user's only input
//! coming at `Publish` (accept, regenerate, or start over).

use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc, Weekday};
use serde_json::Value;

use crate::ai::adapter::{AiAdapter, OperationKind};
use crate::ai::prompts::{assemble_prompt, BoardRoleContext, PromptContext};
use crate::ai::schema::{validate, Field, FieldType, Schema};
use crate::db::board::BoardMember;
use crate::db::briefs::{RegenModifier, WeeklyBrief, MAX_REGENERATIONS};
use crate::db::daily_entries::DailyEntry;
use crate::db::Store;
use crate::error::CoreError;
use crate::ports::RandomSource;

pub const SCHEDULE_WEEKDAY: Weekday = Weekday::Sun;
pub const SCHEDULE_HOUR: u32 = 20;

const MIN_BODY_WORDS: usize = 200;
const MAX_BODY_WORDS: usize = 800;
const ZERO_ENTRY_TARGET_WORDS: usize = 100;

/// Monday 00:00 through Sunday 23:59:59 of the week containing `now`, in
/// `tz` (spec §4.5.2 collection window).
pub fn week_window(now: DateTime<chrono_tz::Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
    let days_since_monday = now.weekday().num_days_from_monday();
    let monday = (now - chrono::Duration::days(days_since_monday as i64))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let week_start = now.timezone().from_local_datetime(&monday).single().unwrap_or_else(|| now.timezone().from_utc_datetime(&monday));
    let sunday_naive = monday + chrono::Duration::days(6) + chrono::Duration::hours(23) + chrono::Duration::minutes(59) + chrono::Duration::seconds(59);
    let week_end = now.timezone().from_local_datetime(&sunday_naive).single().unwrap_or_else(|| now.timezone().from_utc_datetime(&sunday_naive));
    (week_start.with_timezone(&Utc), week_end.with_timezone(&Utc))
}

fn brief_schema() -> Schema {
    Schema {
        fields: vec![
            Field { name: "headline", required: true, kind: FieldType::String { min_len: 1, max_len: 300 } },
            Field { name: "wins", required: true, kind: FieldType::StringArray { min_items: 0, max_items: 3 } },
            Field { name: "blockers", required: true, kind: FieldType::StringArray { min_items: 0, max_items: 3 } },
            Field { name: "risks", required: true, kind: FieldType::StringArray { min_items: 0, max_items: 3 } },
            Field { name: "openLoops", required: true, kind: FieldType::StringArray { min_items: 0, max_items: 5 } },
            Field { name: "nextWeekFocus", required: true, kind: FieldType::StringArray { min_items: 0, max_items: 3 } },
            Field { name: "avoidedDecision", required: true, kind: FieldType::String { min_len: 1, max_len: 300 } },
            Field { name: "comfortWork", required: true, kind: FieldType::String { min_len: 1, max_len: 300 } },
            Field { name: "bodyMarkdown", required: true, kind: FieldType::String { min_len: 1, max_len: 8000 } },
        ],
    }
}

fn micro_review_schema() -> Schema {
    Schema {
        fields: vec![Field { name: "reviewMarkdown", required: true, kind: FieldType::String { min_len: 1, max_len: 2000 } }],
    }
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyLengthCheck {
    Ok,
    TooShort(usize),
    TooLong(usize),
}

/// Enforces the [200, 800]-word body cap the schema validator can't
/// express on its own (char-length bounds only). Zero-entry weeks are
/// exempt — they target a ~100-word reflection instead.
fn check_body_length(markdown: &str, entry_count: i64) -> BodyLengthCheck {
    let words = word_count(markdown);
    if entry_count == 0 {
        return BodyLengthCheck::Ok;
    }
    if words < MIN_BODY_WORDS {
        BodyLengthCheck::TooShort(words)
    } else if words > MAX_BODY_WORDS {
        BodyLengthCheck::TooLong(words)
    } else {
        BodyLengthCheck::Ok
    }
}

fn render_markdown(value: &Value) -> String {
    let get = |k: &str| value.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let list = |k: &str| -> Vec<String> {
        value
            .get(k)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let bullets = |items: &[String]| -> String {
        if items.is_empty() {
            "- none".to_string()
        } else {
            items.iter().map(|i| format!("- {i}")).collect::<Vec<_>>().join("\n")
        }
    };

    format!(
        "## This Week\n\n{}\n\n{}\n\n### Wins\n{}\n\n### Blockers\n{}\n\n### Risks\n{}\n\n### Open Loops\n{}\n\n### Next Week Focus\n{}\n\n**Avoided decision:** {}\n\n**Comfort work:** {}\n",
        get("headline"),
        get("bodyMarkdown"),
        bullets(&list("wins")),
        bullets(&list("blockers")),
        bullets(&list("risks")),
        bullets(&list("openLoops")),
        bullets(&list("nextWeekFocus")),
        get("avoidedDecision"),
        get("comfortWork"),
    )
}

fn modifier_instruction(modifiers: &[RegenModifier]) -> String {
    if modifiers.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = modifiers
        .iter()
        .map(|m| match m {
            RegenModifier::Shorter => "make it noticeably shorter",
            RegenModifier::Actionable => "emphasize concrete next actions over narrative",
            RegenModifier::Strategic => "foreground strategic tradeoffs over day-to-day detail",
        })
        .collect();
    format!(" Regeneration instructions: {}.", parts.join("; "))
}

fn entries_excerpt(entries: &[DailyEntry]) -> String {
    if entries.is_empty() {
        return "No entries were recorded this week.".into();
    }
    entries
        .iter()
        .map(|e| {
            format!(
                "[{}] wins={:?} blockers={:?} risks={:?} avoided={:?} comfort={:?} actions={:?}",
                e.created_at_utc.format("%Y-%m-%d"),
                e.signals.wins,
                e.signals.blockers,
                e.signals.risks,
                e.signals.avoided_decision,
                e.signals.comfort_work,
                e.signals.actions,
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn compose_brief(
    adapter: &AiAdapter,
    entries: &[DailyEntry],
    modifiers: &[RegenModifier],
    deadline: Duration,
) -> Result<(Value, String), CoreError> {
    let target_words = if entries.is_empty() { ZERO_ENTRY_TARGET_WORDS } else { 600 };
    let excerpt = format!(
        "Weekly brief assembly from {} daily entries this week. Target body length {target_words} words.{} If there are zero entries, write a short reflection brief instead of a wins/blockers breakdown.\n\n{}",
        entries.len(),
        modifier_instruction(modifiers),
        entries_excerpt(entries),
    );
    let ctx = PromptContext { workflow_excerpt: excerpt, ..Default::default() };
    let messages = assemble_prompt(&ctx);
    let schema = brief_schema();
    let value = adapter.complete(OperationKind::BriefGeneration, messages, &schema, deadline).await?;
    if !validate(&schema, &value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "weekly_brief".into(), attempts: 1 });
    }
    let markdown = render_markdown(&value);
    Ok((value, markdown))
}

async fn compose_micro_review(adapter: &AiAdapter, board: &[BoardMember], deadline: Duration) -> Result<String, CoreError> {
    let active: Vec<&BoardMember> = board.iter().filter(|m| m.is_active).collect();
    if active.is_empty() {
        return Ok(String::new());
    }
    let roles: String = active.iter().map(|m| format!("{:?} ({})", m.role_type, m.persona.name)).collect::<Vec<_>>().join(", ");
    let ctx = PromptContext {
        workflow_excerpt: format!(
            "Micro-review: exactly one sentence per active board role, in character, reacting to this week's brief. Roles: {roles}. Total length should land near 100 words across {} sentences.",
            active.len()
        ),
        board_role: active.first().map(|m| BoardRoleContext {
            persona: m.persona.clone(),
            anchored_problem: m.anchored_problem_id.clone(),
            anchored_demand: m.anchored_demand.clone(),
        }),
        ..Default::default()
    };
    let messages = assemble_prompt(&ctx);
    let schema = micro_review_schema();
    let value = adapter.complete(OperationKind::MicroReview, messages, &schema, deadline).await?;
    if !validate(&schema, &value).is_empty() {
        return Err(CoreError::SchemaFailure { layer: "micro_review".into(), attempts: 1 });
    }
    Ok(value.get("reviewMarkdown").and_then(Value::as_str).unwrap_or_default().to_string())
}

/// Runs `Collect → Summarize → Render → MicroReview → Publish` for the
/// week containing `reference` and persists the result as a new
/// `WeeklyBrief` row. Idempotent per `(week_start, week_timezone)` via
/// the store's unique constraint.
pub async fn generate_weekly_brief(
    store: &Store,
    adapter: &AiAdapter,
    random: &dyn RandomSource,
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
    week_timezone: String,
    now: DateTime<Utc>,
    deadline: Duration,
) -> Result<WeeklyBrief, CoreError> {
    let entries = store.list_daily_entries_between(week_start, week_end)?;
    let (_, markdown) = compose_brief(adapter, &entries, &[], deadline).await?;

    let board = store.list_board_members().unwrap_or_default();
    let micro_review = compose_micro_review(adapter, &board, deadline).await?;
    let micro_review = if micro_review.is_empty() { None } else { Some(micro_review) };

    let brief = store.create_weekly_brief(
        random.new_id().to_string(),
        week_start,
        week_end,
        week_timezone,
        markdown,
        micro_review,
        entries.len() as i64,
        now,
    )?;
    Ok(brief)
}

/// `Regen` branch: applies a composable subset of modifiers and
/// re-renders the body, respecting the regeneration cap (spec §4.5.2,
/// §8). `StartOver` is just a regeneration with no modifiers that the
/// caller has already discarded local edits for.
pub async fn regenerate_brief(
    store: &Store,
    adapter: &AiAdapter,
    brief_id: &str,
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
    modifiers: &[RegenModifier],
    now: DateTime<Utc>,
    deadline: Duration,
) -> Result<WeeklyBrief, CoreError> {
    let current = store.get_weekly_brief(brief_id)?;
    if current.regen_count >= MAX_REGENERATIONS {
        return Err(CoreError::ValidationFailure(format!(
            "brief already regenerated {} times (max {MAX_REGENERATIONS})",
            current.regen_count
        )));
    }
    let entries = store.list_daily_entries_between(week_start, week_end)?;
    let (_, markdown) = compose_brief(adapter, &entries, modifiers, deadline).await?;
    Ok(store.regenerate_weekly_brief(brief_id, markdown, now)?)
}

pub fn body_length_status(brief: &WeeklyBrief) -> BodyLengthCheck {
    check_body_length(&brief.brief_markdown, brief.entry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_window_spans_monday_to_sunday() {
        let tz: chrono_tz::Tz = "UTC".parse().unwrap();
        let wednesday = tz.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        let (start, end) = week_window(wednesday);
        assert_eq!(start.weekday(), Weekday::Mon);
        assert_eq!(end.weekday(), Weekday::Sun);
        assert!(end > start);
    }

    #[test]
    fn zero_entry_week_is_exempt_from_length_check() {
        assert_eq!(check_body_length("too short", 0), BodyLengthCheck::Ok);
    }

    #[test]
    fn nonzero_entry_week_enforces_the_word_band() {
        let short_body = "word ".repeat(50);
        assert!(matches!(check_body_length(&short_body, 3), BodyLengthCheck::TooShort(_)));
        let long_body = "word ".repeat(900);
        assert!(matches!(check_body_length(&long_body, 3), BodyLengthCheck::TooLong(_)));
        let ok_body = "word ".repeat(600);
        assert_eq!(check_body_length(&ok_body, 3), BodyLengthCheck::Ok);
    }
}
