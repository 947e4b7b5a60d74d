use std::path::Path;
use std::sync::Arc;

use tracing::info;

use folio_access::{PermissionEvaluator, User};
use folio_events::{ChangeEvent, ChangeFilter, ChangeNotifier, ChangeStream, InMemoryTaskQueue, ObserverId, RunReport};
use folio_record::{InMemorySearchIndexer, Record, RecordServices};
use folio_schema::{FieldDescriptor, Schema, SchemaRegistry};
use folio_store::{InMemoryMetadataStore, MetadataStore, RecordTable};
use folio_types::{FieldType, RecordId, SchemaId, ValueInput};

use crate::config::CollectionConfig;
use crate::error::{SdkError, SdkResult};

/// An in-memory Folio collection.
pub struct Collection {
    store: Arc<InMemoryMetadataStore>,
    queue: Arc<InMemoryTaskQueue>,
    indexer: Arc<InMemorySearchIndexer>,
    services: RecordServices,
}

impl Collection {
    /// Open an empty collection with default settings.
    pub fn open() -> Self {
        Self::with_config(CollectionConfig::default())
    }

    pub fn with_config(config: CollectionConfig) -> Self {
        let store = Arc::new(InMemoryMetadataStore::new());
        let shared: Arc<dyn MetadataStore> = store.clone();
        let queue = Arc::new(InMemoryTaskQueue::new());
        let indexer = Arc::new(InMemorySearchIndexer::new());

        let services = RecordServices {
            store: Arc::clone(&shared),
            registry: Arc::new(SchemaRegistry::new(Arc::clone(&shared), config.converter)),
            evaluator: Arc::new(PermissionEvaluator::new(shared, config.access)),
            notifier: Arc::new(ChangeNotifier::new(config.notifier)),
            queue: queue.clone(),
            indexer: indexer.clone(),
            config: config.record,
        };
        info!("collection opened");
        Self {
            store,
            queue,
            indexer,
            services,
        }
    }

    pub fn from_config_file(path: &Path) -> SdkResult<Self> {
        Ok(Self::with_config(CollectionConfig::load(path)?))
    }

    // ---- Services ----

    pub fn registry(&self) -> &SchemaRegistry {
        &self.services.registry
    }

    pub fn evaluator(&self) -> &PermissionEvaluator {
        &self.services.evaluator
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.services.notifier
    }

    pub fn store(&self) -> &InMemoryMetadataStore {
        &self.store
    }

    pub fn indexer(&self) -> &InMemorySearchIndexer {
        &self.indexer
    }

    /// The shared handles records are built from.
    pub fn services(&self) -> &RecordServices {
        &self.services
    }

    // ---- Schemas ----

    pub fn create_schema(&self, name: &str) -> SdkResult<Arc<Schema>> {
        Ok(self.registry().create_schema(name)?)
    }

    pub fn schema(&self, id: SchemaId) -> SdkResult<Arc<Schema>> {
        Ok(self.registry().schema(id)?)
    }

    pub fn schema_by_name(&self, name: &str) -> SdkResult<Arc<Schema>> {
        Ok(self.registry().schema_by_name(name)?)
    }

    /// Create a field and make it permanent in one step.
    pub fn add_field(
        &self,
        schema: SchemaId,
        field_type: FieldType,
        name: &str,
        optional: bool,
        default: Option<ValueInput>,
    ) -> SdkResult<Arc<FieldDescriptor>> {
        let registry = self.registry();
        let field = registry.create_field(schema, field_type, name, optional, default)?;
        Ok(registry.make_permanent(field.id)?)
    }

    /// Import fields from an interchange document. Vocabulary paths resolve
    /// against `base_dir`.
    pub fn import_fields(&self, schema: SchemaId, text: &str, base_dir: &Path) -> SdkResult<Vec<Arc<FieldDescriptor>>> {
        Ok(self
            .registry()
            .add_fields_from_interchange_document(schema, text, base_dir)?)
    }

    pub fn import_fields_from_file(&self, schema: SchemaId, path: &Path) -> SdkResult<Vec<Arc<FieldDescriptor>>> {
        Ok(self.registry().add_fields_from_interchange_file(schema, path)?)
    }

    // ---- Records ----

    /// Start a new temporary record on behalf of `user`, who must be allowed
    /// to author in the schema.
    pub fn create_record(&self, schema: SchemaId, user: User) -> SdkResult<Record> {
        let described = self.schema(schema)?;
        if !self.evaluator().can_author(&user, &described.rules())? {
            return Err(SdkError::AuthoringDenied {
                user: user.name,
                schema,
            });
        }
        Ok(Record::create(self.services.clone(), schema, user)?)
    }

    pub fn record(&self, id: RecordId) -> SdkResult<Record> {
        Ok(Record::load(self.services.clone(), id)?)
    }

    /// Load a record whose writes are attributed to `user`.
    pub fn record_as(&self, id: RecordId, user: User) -> SdkResult<Record> {
        Ok(self.record(id)?.with_user(user))
    }

    pub fn records(&self, schema: SchemaId) -> SdkResult<Vec<RecordId>> {
        Ok(self.store.records_in_schema(schema)?)
    }

    // ---- Events ----

    pub fn subscribe(&self, filter: ChangeFilter) -> ChangeStream {
        self.notifier().subscribe(filter)
    }

    pub fn observe<F>(&self, filter: ChangeFilter, handler: F) -> ObserverId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.notifier().observe(filter, handler)
    }

    // ---- Housekeeping ----

    pub fn pending_housekeeping(&self) -> usize {
        self.queue.len()
    }

    /// Run queued housekeeping until the queue is empty or stops making
    /// progress.
    pub fn run_housekeeping(&self) -> RunReport {
        let report = self.queue.drain();
        info!(completed = report.completed, failed = report.failed, "housekeeping drained");
        report
    }
}

impl Default for Collection {
    fn default() -> Self {
        Self::open()
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("store", &self.store)
            .field("pending_housekeeping", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use folio_access::{Condition, PrivilegeSet};
    use folio_events::ChangeKind;
    use folio_record::{GetOptions, RecordError, RecordState};
    use folio_schema::{PrivilegeLevel, SchemaError};
    use folio_types::{FieldValue, UserId};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn editor() -> User {
        User::logged_in(UserId(1), "editor")
    }

    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    #[test]
    fn setting_the_same_value_twice_notifies_once() {
        init_tracing();
        let collection = Collection::open();
        let schema = collection.create_schema("Library").unwrap().id;
        assert_eq!(schema, SchemaId::DEFAULT);
        collection
            .add_field(schema, FieldType::Text, "Title", false, None)
            .unwrap();

        let mut record = collection.create_record(schema, editor()).unwrap();
        record.make_permanent().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        collection.observe(ChangeFilter::record(record.id()), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(record.set("Title", "Foo", false).unwrap());
        assert_eq!(record.get("Title", GetOptions::default()).unwrap().as_text(), Some("Foo"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        assert!(!record.set("Title", "Foo", false).unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mapped_fields_cannot_be_dropped() {
        init_tracing();
        let collection = Collection::open();
        let schema = collection.create_schema("Library").unwrap().id;
        let topic = collection
            .add_field(schema, FieldType::Tree, "Topic", true, None)
            .unwrap();
        collection.registry().map_std_name(schema, "Subject", topic.id).unwrap();
        collection
            .registry()
            .add_term(topic.id, "Science -- Physics")
            .unwrap();

        let mut record = collection.create_record(schema, editor()).unwrap();
        record.make_permanent().unwrap();
        record.set(topic.id, "Science -- Physics", false).unwrap();
        assert_eq!(collection.store().term_row_count(), 2);

        assert!(matches!(
            collection.registry().drop_field(topic.id),
            Err(SchemaError::MappedField { .. })
        ));

        assert!(collection.registry().unmap_std_name(schema, "Subject").unwrap());
        collection.registry().drop_field(topic.id).unwrap();
        assert_eq!(collection.store().term_row_count(), 0);
        assert!(collection.registry().std_name(schema, "Subject").unwrap().is_none());
        assert!(matches!(
            record.get("Topic", GetOptions::default()),
            Err(RecordError::Schema(SchemaError::UnknownField(_)))
        ));
    }

    #[test]
    fn fields_read_by_viewing_rules_cannot_be_dropped() {
        init_tracing();
        let collection = Collection::open();
        let schema = collection.create_schema("Library").unwrap().id;
        let published = collection
            .add_field(schema, FieldType::Flag, "Published", true, None)
            .unwrap();
        collection
            .registry()
            .set_schema_privileges(
                schema,
                PrivilegeLevel::Viewing,
                PrivilegeSet::open().with(Condition::FieldFlag {
                    field: published.id,
                    expected: true,
                }),
            )
            .unwrap();

        let mut record = collection.create_record(schema, editor()).unwrap();
        record.make_permanent().unwrap();
        assert!(matches!(
            collection.registry().drop_field(published.id),
            Err(SchemaError::RuleReferencedField { .. })
        ));

        record.set(published.id, true, false).unwrap();
        let report = collection.run_housekeeping();
        assert_eq!(report.failed, 0);
        assert_eq!(collection.pending_housekeeping(), 0);
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    #[test]
    fn authoring_rules_gate_record_creation() {
        let collection = Collection::open();
        let schema = collection.create_schema("Archive").unwrap().id;
        collection
            .registry()
            .set_schema_privileges(
                schema,
                PrivilegeLevel::Authoring,
                PrivilegeSet::open().with(Condition::LoggedIn),
            )
            .unwrap();

        assert!(matches!(
            collection.create_record(schema, User::anonymous()),
            Err(SdkError::AuthoringDenied { .. })
        ));
        let record = collection.create_record(schema, editor()).unwrap();
        assert_eq!(record.state(), RecordState::Temporary);
    }

    #[test]
    fn streams_and_housekeeping_are_wired() {
        init_tracing();
        let collection = Collection::open();
        let schema = collection.create_schema("Library").unwrap().id;
        let year = collection
            .add_field(schema, FieldType::Number, "Year", true, None)
            .unwrap();
        let mut stream = collection.subscribe(ChangeFilter::field(year.id));

        let mut record = collection.create_record(schema, editor()).unwrap();
        let id = record.make_permanent().unwrap();
        record.set(year.id, 1999i64, false).unwrap();
        record.clear(year.id, None).unwrap();

        let set = stream.try_recv().unwrap();
        assert_eq!(set.kind, ChangeKind::Set);
        assert_eq!(set.payload, FieldValue::Number(Some(1999)));
        assert_eq!(set.user, Some(UserId(1)));
        assert_eq!(stream.try_recv().unwrap().kind, ChangeKind::Clear);

        assert_eq!(collection.pending_housekeeping(), 1);
        let report = collection.run_housekeeping();
        assert_eq!(report.completed, 1);
        assert_eq!(collection.indexer().queued(), vec![id]);
        assert_eq!(collection.records(schema).unwrap(), vec![id]);

        let reloaded = collection.record_as(id, User::anonymous()).unwrap();
        assert!(reloaded.get(year.id, GetOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn config_flows_into_services() {
        let config = CollectionConfig::from_toml_str("[record]\nhousekeeping_prefix = \"hk\"").unwrap();
        let collection = Collection::with_config(config);
        assert_eq!(collection.services().config.housekeeping_key(RecordId(4)), "hk:4");
    }
}
