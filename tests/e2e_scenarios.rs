//! Multi-module end-to-end scenarios seeded from spec §8, exercised
//! against the public crate API rather than any single module's
//! internals.

use std::time::Duration;

use std::sync::Arc;

use boardroom_journal::ai::adapter::AiAdapter;
use boardroom_journal::db::Store;
use boardroom_journal::ports::{Batch, Delta, RemoteSyncPort};
use boardroom_journal::sync::{resolve_conflict, ConflictResolution, SyncCoordinator};
use boardroom_journal::testing::{FakeClock, FakeRandomSource, FakeTranscription, ScriptedLlm};
use boardroom_journal::types::EntryType;
use boardroom_journal::workflows::setup::publish_portfolio;

use chrono::Utc;
use serde_json::json;

/// An adapter whose LLM always returns a schema-valid persona/anchored-
/// demand payload, so board construction in `publish_portfolio` never
/// hits `SchemaFailure` regardless of how many roles it builds.
fn adapter_with_valid_persona_responses() -> AiAdapter {
    let persona_response = json!({
        "name": "Role Voice",
        "background": "A long-tenured advisor who has seen this pattern before.",
        "communicationStyle": "Direct, terse, unimpressed by hand-waving.",
        "signaturePhrase": "Show me the receipt.",
        "anchoredDemand": "What evidence backs this claim, concretely?",
    });
    AiAdapter::new(
        Arc::new(ScriptedLlm::new(vec![persona_response])),
        Arc::new(FakeTranscription { text: String::new() }),
        None,
        Arc::new(FakeClock::new(Utc::now())),
    )
}

fn session_with_problems(directions: &[&str]) -> serde_json::Value {
    let problems: Vec<serde_json::Value> = directions
        .iter()
        .enumerate()
        .map(|(i, direction)| {
            json!({
                "name": format!("problem-{i}"),
                "whatBreaks": "things break",
                "scarcitySignals": ["signal a", "signal b"],
                "direction": direction,
                "directionRationale": "rationale",
                "evidenceQuotes": ["quote a", "quote b", "quote c"],
                "allocation": 100 / directions.len() as i64,
            })
        })
        .collect();
    json!({ "problems": problems })
}

/// Scenario 2 (spec §8): a portfolio with no appreciating problem
/// publishes a 5-member board with no growth roles. Flipping one
/// problem to appreciating and re-running Setup (re-setup) grows the
/// board to 7, both growth roles anchored to that problem.
#[tokio::test]
async fn growth_role_activation_on_resetup() {
    let store = Store::open_in_memory().unwrap();
    let adapter = adapter_with_valid_persona_responses();
    let clock = FakeClock::new(Utc::now());
    let random = FakeRandomSource::default();

    let first_setup = session_with_problems(&["depreciating", "depreciating", "stable"]);
    publish_portfolio(&store, &adapter, &clock, &random, &first_setup, Duration::from_secs(5))
        .await
        .unwrap();

    let board = store.list_board_members().unwrap();
    assert_eq!(board.len(), 5);
    assert!(board.iter().all(|m| !m.is_growth_role));

    clock.advance(chrono::Duration::days(1));
    let resetup = session_with_problems(&["appreciating", "depreciating", "stable"]);
    publish_portfolio(&store, &adapter, &clock, &random, &resetup, Duration::from_secs(5))
        .await
        .unwrap();

    let board = store.list_board_members().unwrap();
    assert_eq!(board.len(), 7);
    let growth: Vec<_> = board.iter().filter(|m| m.is_growth_role).collect();
    assert_eq!(growth.len(), 2);

    let problems = store.list_active_problems().unwrap();
    let appreciating_id = &problems.iter().find(|p| p.direction == boardroom_journal::types::Direction::Appreciating).unwrap().sync.id;
    assert!(growth.iter().all(|m| m.anchored_problem_id.as_ref() == Some(appreciating_id)));

    // Re-setup replaced the board wholesale, not appended to it.
    assert_eq!(store.list_active_problems().unwrap().len(), 3);
}

/// Scenario 5 (spec §8): device A edits an entry at T1, device B edits
/// the same row at T2 > T1, both offline, then both sync. The final
/// row reflects B's payload and A's prior payload is recoverable from
/// the overwrite log with timestamp T1.
#[tokio::test]
async fn sync_conflict_last_write_wins_with_overwrite_log() {
    let device_a = Store::open_in_memory().unwrap();
    let t1 = Utc::now();
    device_a
        .create_daily_entry("shared-entry".into(), "device A's edit".into(), "device A's edit".into(), EntryType::Text, None, t1, "UTC".into(), t1)
        .unwrap();

    let t2 = t1 + chrono::Duration::minutes(5);
    assert_eq!(resolve_conflict(t1, t2), ConflictResolution::RemoteWins);

    // The remote already holds device B's newer payload, acknowledged
    // under a higher server_version than A's pending push.
    struct ConflictingRemote {
        remote_updated_at: chrono::DateTime<Utc>,
    }
    #[async_trait::async_trait]
    impl RemoteSyncPort for ConflictingRemote {
        async fn pull(&self, _since: Option<&str>) -> Result<Batch, boardroom_journal::error::CoreError> {
            Ok(Batch::default())
        }
        async fn push(&self, batch: &[Delta]) -> Result<Vec<boardroom_journal::ports::PushResult>, boardroom_journal::error::CoreError> {
            Ok(batch
                .iter()
                .map(|d| boardroom_journal::ports::PushResult::Conflict {
                    id: d.id.clone(),
                    current_server_version: 9,
                    current_payload: json!({
                        "updatedAtUtc": self.remote_updated_at.to_rfc3339(),
                        "payload": {"raw_transcript": "device B's edit"},
                    }),
                })
                .collect())
        }
        async fn ping(&self) -> Result<boardroom_journal::ports::PingResult, boardroom_journal::error::CoreError> {
            Ok(boardroom_journal::ports::PingResult::Ok)
        }
    }

    let remote = ConflictingRemote { remote_updated_at: t2 };
    let clock = FakeClock::new(t2);
    let random = FakeRandomSource::default();
    let coordinator = SyncCoordinator::new(&device_a, &remote, &clock, &random);

    let report = coordinator.push().await.unwrap();
    assert_eq!(report.conflicts, 1);

    // Device A's prior payload survived in the overwrite log, stamped
    // with its own (losing) timestamp.
    let overwrites = device_a.list_overwrites_for_entity("shared-entry").unwrap();
    assert_eq!(overwrites.len(), 1);
    assert_eq!(overwrites[0].losing_payload.get("raw_transcript").unwrap(), "device A's edit");
    assert_eq!(overwrites[0].losing_updated_at_utc, t1);

    // And the row itself now reflects device B's payload.
    let entry = device_a.get_daily_entry("shared-entry").unwrap();
    assert_eq!(entry.raw_transcript, "device B's edit");
    assert_eq!(entry.sync.server_version, 9);
}

/// Scenario 1 (spec §8), exercised through the public Setup workflow
/// rather than the validator directly: a portfolio that sums to 93%
/// still publishes (validators warn, they don't block), 85% behavior is
/// covered at the validator layer in-crate.
#[tokio::test]
async fn setup_publishes_with_allocation_in_warning_band() {
    let store = Store::open_in_memory().unwrap();
    let adapter = adapter_with_valid_persona_responses();
    let clock = FakeClock::new(Utc::now());
    let random = FakeRandomSource::default();

    let session_data = json!({
        "problems": [
            {"name": "p1", "whatBreaks": "x", "scarcitySignals": ["a", "b"], "direction": "stable", "directionRationale": "r", "evidenceQuotes": ["a", "b", "c"], "allocation": 30},
            {"name": "p2", "whatBreaks": "x", "scarcitySignals": ["a", "b"], "direction": "stable", "directionRationale": "r", "evidenceQuotes": ["a", "b", "c"], "allocation": 30},
            {"name": "p3", "whatBreaks": "x", "scarcitySignals": ["a", "b"], "direction": "stable", "directionRationale": "r", "evidenceQuotes": ["a", "b", "c"], "allocation": 33},
        ]
    });

    publish_portfolio(&store, &adapter, &clock, &random, &session_data, Duration::from_secs(5)).await.unwrap();
    assert_eq!(store.list_active_problems().unwrap().len(), 3);
}
