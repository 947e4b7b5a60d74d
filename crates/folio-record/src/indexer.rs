//! Search index contract.
//!
//! Folio does not own a search engine. Housekeeping tells an indexer which
//! records need reindexing, and destroying a record removes it.

use std::collections::BTreeSet;
use std::sync::RwLock;

use folio_types::RecordId;

use crate::error::RecordResult;

pub trait SearchIndexer: Send + Sync {
    /// Schedule a record for (re)indexing.
    fn queue_reindex(&self, record: RecordId) -> RecordResult<()>;

    /// Drop a record from the index.
    fn remove_from_index(&self, record: RecordId) -> RecordResult<()>;
}

/// Indexer that only remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct InMemorySearchIndexer {
    queued: RwLock<BTreeSet<RecordId>>,
    removed: RwLock<BTreeSet<RecordId>>,
}

impl InMemorySearchIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records waiting to be reindexed.
    pub fn queued(&self) -> Vec<RecordId> {
        self.queued.read().expect("lock poisoned").iter().copied().collect()
    }

    pub fn removed(&self) -> Vec<RecordId> {
        self.removed.read().expect("lock poisoned").iter().copied().collect()
    }

    /// Take every queued record, as an indexing pass would.
    pub fn take_queued(&self) -> Vec<RecordId> {
        std::mem::take(&mut *self.queued.write().expect("lock poisoned"))
            .into_iter()
            .collect()
    }
}

impl SearchIndexer for InMemorySearchIndexer {
    fn queue_reindex(&self, record: RecordId) -> RecordResult<()> {
        self.queued.write().expect("lock poisoned").insert(record);
        Ok(())
    }

    fn remove_from_index(&self, record: RecordId) -> RecordResult<()> {
        self.queued.write().expect("lock poisoned").remove(&record);
        self.removed.write().expect("lock poisoned").insert(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_cancels_queued_reindex() {
        let indexer = InMemorySearchIndexer::new();
        indexer.queue_reindex(RecordId(3)).unwrap();
        indexer.queue_reindex(RecordId(4)).unwrap();
        indexer.queue_reindex(RecordId(3)).unwrap();
        assert_eq!(indexer.queued(), vec![RecordId(3), RecordId(4)]);

        indexer.remove_from_index(RecordId(3)).unwrap();
        assert_eq!(indexer.queued(), vec![RecordId(4)]);
        assert_eq!(indexer.removed(), vec![RecordId(3)]);

        assert_eq!(indexer.take_queued(), vec![RecordId(4)]);
        assert!(indexer.queued().is_empty());
    }
}
