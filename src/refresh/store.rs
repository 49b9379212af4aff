//! Published snapshots, one lock-free slot per dataset.
//!
//! Each slot is a `watch` channel holding an `Arc<Snapshot>`: readers clone
//! the `Arc` under a momentary read lock, a publish swaps the pointer. A reader
//! therefore sees either the previous snapshot or the new one, never a mix.

use crate::data::{DatasetId, Payload, fallback};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Where a snapshot's payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Produced by a successful refresh cycle.
    Fresh,
    /// The built-in default served until the first successful cycle.
    Fallback,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Fresh => "fresh",
            Origin::Fallback => "fallback",
        }
    }
}

/// The immutable, currently published result for a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub dataset: DatasetId,
    pub payload: Payload,
    /// Set for fresh snapshots only.
    pub published_at: Option<DateTime<Utc>>,
    pub origin: Origin,
}

impl Snapshot {
    pub fn fallback(dataset: DatasetId) -> Self {
        Self {
            dataset,
            payload: fallback::payload(dataset),
            published_at: None,
            origin: Origin::Fallback,
        }
    }

    fn fresh(dataset: DatasetId, payload: Payload) -> Self {
        Self {
            dataset,
            payload,
            published_at: Some(Utc::now()),
            origin: Origin::Fresh,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.origin == Origin::Fresh
    }
}

pub struct SnapshotStore {
    slots: [watch::Sender<Arc<Snapshot>>; DatasetId::ALL.len()],
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// A store seeded with the fallback snapshot of every dataset.
    pub fn new() -> Self {
        Self {
            slots: DatasetId::ALL
                .map(|dataset| watch::Sender::new(Arc::new(Snapshot::fallback(dataset)))),
        }
    }

    pub fn get(&self, dataset: DatasetId) -> Arc<Snapshot> {
        self.slots[dataset.index()].borrow().clone()
    }

    /// Replace the dataset's snapshot with a fresh one stamped now.
    pub fn publish(&self, dataset: DatasetId, payload: Payload) -> Arc<Snapshot> {
        let snapshot = Arc::new(Snapshot::fresh(dataset, payload));
        self.slots[dataset.index()].send_replace(snapshot.clone());
        snapshot
    }

    pub fn subscribe(&self, dataset: DatasetId) -> watch::Receiver<Arc<Snapshot>> {
        self.slots[dataset.index()].subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Leaderboard, LeaderboardItem};

    fn board(items: &[(&str, u64)]) -> Payload {
        Payload::Leaderboard(Leaderboard {
            items: items
                .iter()
                .map(|&(label, value)| LeaderboardItem::new(label, value))
                .collect(),
        })
    }

    #[test]
    fn starts_with_fallbacks() {
        let store = SnapshotStore::new();
        for dataset in DatasetId::ALL {
            let snapshot = store.get(dataset);
            assert_eq!(snapshot.dataset, dataset);
            assert_eq!(snapshot.origin, Origin::Fallback);
            assert!(snapshot.published_at.is_none());
            assert!(!snapshot.payload.is_empty());
        }
    }

    #[test]
    fn publish_replaces_only_its_dataset() {
        let store = SnapshotStore::new();
        let published = store.publish(DatasetId::Leaderboard, board(&[("Belgium", 9)]));

        let current = store.get(DatasetId::Leaderboard);
        assert!(Arc::ptr_eq(&published, &current));
        assert!(current.is_fresh());
        assert!(current.published_at.is_some());
        assert_eq!(store.get(DatasetId::Timeseries).origin, Origin::Fallback);
    }

    #[test]
    fn readers_keep_their_snapshot_across_publish() {
        let store = SnapshotStore::new();
        let before = store.get(DatasetId::Leaderboard);
        store.publish(DatasetId::Leaderboard, board(&[("France", 1)]));
        assert_eq!(before.origin, Origin::Fallback);
        assert_eq!(before.payload, fallback::payload(DatasetId::Leaderboard));
    }

    #[tokio::test]
    async fn subscribers_observe_publishes() {
        let store = SnapshotStore::new();
        let mut rx = store.subscribe(DatasetId::Timeseries);
        assert!(!rx.has_changed().unwrap());

        store.publish(DatasetId::Timeseries, fallback::payload(DatasetId::Timeseries));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_fresh());
    }
}
