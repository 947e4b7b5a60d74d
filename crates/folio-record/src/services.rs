use std::sync::Arc;

use folio_access::PermissionEvaluator;
use folio_events::{ChangeNotifier, TaskQueue};
use folio_schema::SchemaRegistry;
use folio_store::MetadataStore;

use crate::config::RecordConfig;
use crate::indexer::SearchIndexer;

/// Everything a record handle talks to.
///
/// Cloning is cheap; every service is shared.
#[derive(Clone)]
pub struct RecordServices {
    pub store: Arc<dyn MetadataStore>,
    pub registry: Arc<SchemaRegistry>,
    pub evaluator: Arc<PermissionEvaluator>,
    pub notifier: Arc<ChangeNotifier>,
    pub queue: Arc<dyn TaskQueue>,
    pub indexer: Arc<dyn SearchIndexer>,
    pub config: RecordConfig,
}

impl std::fmt::Debug for RecordServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordServices")
            .field("registry", &self.registry)
            .field("evaluator", &self.evaluator)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
