//! Shared wiring for this crate's unit tests.

use std::sync::Arc;

use folio_access::{AccessConfig, PermissionEvaluator};
use folio_events::{ChangeNotifier, InMemoryTaskQueue, NotifierConfig};
use folio_schema::{Attribute, ConverterConfig, FieldDescriptor, SchemaRegistry};
use folio_store::{InMemoryMetadataStore, MetadataStore};
use folio_types::{FieldType, SchemaId};

use crate::config::RecordConfig;
use crate::indexer::InMemorySearchIndexer;
use crate::services::RecordServices;

pub(crate) struct Fixture {
    pub store: Arc<InMemoryMetadataStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub indexer: Arc<InMemorySearchIndexer>,
    pub services: RecordServices,
    pub schema: SchemaId,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryMetadataStore::new());
        let shared: Arc<dyn MetadataStore> = store.clone();
        let registry = Arc::new(SchemaRegistry::new(Arc::clone(&shared), ConverterConfig::default()));
        let schema = registry.create_schema("Resources").unwrap().id;
        let queue = Arc::new(InMemoryTaskQueue::new());
        let indexer = Arc::new(InMemorySearchIndexer::new());
        let services = RecordServices {
            store: Arc::clone(&shared),
            registry,
            evaluator: Arc::new(PermissionEvaluator::new(shared, AccessConfig::default())),
            notifier: Arc::new(ChangeNotifier::new(NotifierConfig::default())),
            queue: queue.clone(),
            indexer: indexer.clone(),
            config: RecordConfig::default(),
        };
        Self {
            store,
            queue,
            indexer,
            services,
            schema,
        }
    }

    /// A permanent field in the fixture schema.
    pub fn field(&self, field_type: FieldType, name: &str) -> Arc<FieldDescriptor> {
        self.field_with(field_type, name, Vec::new())
    }

    pub fn field_with(&self, field_type: FieldType, name: &str, attributes: Vec<Attribute>) -> Arc<FieldDescriptor> {
        let registry = &self.services.registry;
        let field = registry.create_field(self.schema, field_type, name, true, None).unwrap();
        for attribute in attributes {
            registry.set_field_attribute(field.id, attribute).unwrap();
        }
        registry.make_permanent(field.id).unwrap()
    }
}
