//! `watch(filter)` — a lazy sequence of result snapshots (spec §4.1).
//!
//! The Store has no change-notification primitive of its own (single
//! SQLite file, single writer), so `watch` is a debounced poll over a
//! caller-supplied query, matching this codebase's existing pattern of
//! a background task pushing snapshots down an mpsc channel. The
//! contract that matters is monotonicity: a subscriber never receives
//! a snapshot whose rows regress to an older `updated_at_utc` than one
//! already delivered.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::types::SyncColumns;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Starts a background poll loop that calls `query` repeatedly and only
/// forwards a snapshot when its maximum `updated_at_utc` has advanced
/// past everything delivered so far.
pub fn watch<T, F>(query: F, poll_interval: Option<Duration>) -> mpsc::Receiver<Vec<T>>
where
    T: AsRef<SyncColumns> + Send + 'static,
    F: Fn() -> Vec<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    let interval_dur = poll_interval.unwrap_or(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS));

    tokio::spawn(async move {
        let mut ticker = interval(interval_dur);
        let mut high_water_mark: Option<DateTime<Utc>> = None;

        loop {
            ticker.tick().await;
            let rows = query();
            let batch_max = rows.iter().map(|r| r.as_ref().updated_at_utc).max();

            let should_send = match (batch_max, high_water_mark) {
                (Some(max), Some(hwm)) => max > hwm,
                (Some(_), None) => true,
                (None, _) => false,
            };

            if should_send {
                high_water_mark = batch_max;
                if tx.send(rows).await.is_err() {
                    break;
                }
            }
        }
    });

    rx
}

impl AsRef<SyncColumns> for crate::db::daily_entries::DailyEntry {
    fn as_ref(&self) -> &SyncColumns {
        &self.sync
    }
}

impl AsRef<SyncColumns> for crate::db::problems::Problem {
    fn as_ref(&self) -> &SyncColumns {
        &self.sync
    }
}

impl AsRef<SyncColumns> for crate::db::bets::Bet {
    fn as_ref(&self) -> &SyncColumns {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn only_forwards_when_high_water_mark_advances() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let rows = Arc::new(std::sync::Mutex::new(vec![crate::db::problems::Problem {
            sync: SyncColumns::new("p1".into(), Utc::now()),
            name: "n".into(),
            what_breaks: "b".into(),
            scarcity_signals: vec![],
            direction: crate::types::Direction::Stable,
            direction_rationale: "r".into(),
            evidence_quotes: ["a".into(), "b".into(), "c".into()],
            time_allocation_pct: 100,
            display_order: 0,
        }]));
        let rows2 = rows.clone();

        let mut rx = watch(
            move || {
                calls2.fetch_add(1, Ordering::SeqCst);
                rows2.lock().unwrap().clone()
            },
            Some(Duration::from_millis(10)),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 1);

        // No further update: nothing else should arrive within a short window.
        let timeout = tokio::time::timeout(Duration::from_millis(60), rx.recv()).await;
        assert!(timeout.is_err(), "unchanged rows must not produce a second snapshot");
    }
}
