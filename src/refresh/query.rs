use crate::data::DatasetId;
use crate::refresh::store::{Snapshot, SnapshotStore};
use std::sync::Arc;

/// Read path for request handlers. Never triggers a fetch.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<SnapshotStore>,
}

impl QueryService {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    /// The current best snapshot: the latest fresh one, or the fallback.
    pub fn respond(&self, dataset: DatasetId) -> Arc<Snapshot> {
        self.store.get(dataset)
    }
}
