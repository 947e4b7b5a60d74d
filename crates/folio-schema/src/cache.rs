//! Process-local memoization for the schema registry.
//!
//! Every registry mutator calls [`RegistryCache::invalidate`] with the
//! narrowest scope that covers what it changed. Nothing here is shared
//! across processes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use folio_types::{FieldId, SchemaId};

use crate::descriptor::FieldDescriptor;
use crate::registry::FieldQuery;
use crate::schema::Schema;

/// What an invalidation covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheScope {
    All,
    /// A schema row and everything derived from its fields.
    Schema(SchemaId),
    /// One field and every list or lookup that may include it.
    Field(SchemaId, FieldId),
}

#[derive(Default)]
struct Entries {
    schemas: HashMap<SchemaId, Arc<Schema>>,
    fields: HashMap<FieldId, Arc<FieldDescriptor>>,
    /// Lowercased field name within a schema.
    names: HashMap<(SchemaId, String), FieldId>,
    field_lists: HashMap<(SchemaId, FieldQuery), Vec<FieldId>>,
    /// Whether a schema's viewing rule references a field.
    references: HashMap<(SchemaId, FieldId), bool>,
}

/// Memoized schemas, descriptors, name lookups, field lists and
/// rule-reference answers.
#[derive(Default)]
pub struct RegistryCache {
    entries: RwLock<Entries>,
}

impl std::fmt::Debug for RegistryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().expect("lock poisoned");
        f.debug_struct("RegistryCache")
            .field("schemas", &entries.schemas.len())
            .field("fields", &entries.fields.len())
            .field("names", &entries.names.len())
            .field("field_lists", &entries.field_lists.len())
            .field("references", &entries.references.len())
            .finish()
    }
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self, id: SchemaId) -> Option<Arc<Schema>> {
        self.entries.read().expect("lock poisoned").schemas.get(&id).cloned()
    }

    pub fn put_schema(&self, schema: Arc<Schema>) {
        self.entries
            .write()
            .expect("lock poisoned")
            .schemas
            .insert(schema.id, schema);
    }

    pub fn field(&self, id: FieldId) -> Option<Arc<FieldDescriptor>> {
        self.entries.read().expect("lock poisoned").fields.get(&id).cloned()
    }

    pub fn put_field(&self, field: Arc<FieldDescriptor>) {
        self.entries
            .write()
            .expect("lock poisoned")
            .fields
            .insert(field.id, field);
    }

    pub fn name(&self, schema: SchemaId, name: &str) -> Option<FieldId> {
        self.entries
            .read()
            .expect("lock poisoned")
            .names
            .get(&(schema, name.to_lowercase()))
            .copied()
    }

    pub fn put_name(&self, schema: SchemaId, name: &str, field: FieldId) {
        self.entries
            .write()
            .expect("lock poisoned")
            .names
            .insert((schema, name.to_lowercase()), field);
    }

    pub fn field_list(&self, schema: SchemaId, query: &FieldQuery) -> Option<Vec<FieldId>> {
        self.entries
            .read()
            .expect("lock poisoned")
            .field_lists
            .get(&(schema, query.clone()))
            .cloned()
    }

    pub fn put_field_list(&self, schema: SchemaId, query: FieldQuery, ids: Vec<FieldId>) {
        self.entries
            .write()
            .expect("lock poisoned")
            .field_lists
            .insert((schema, query), ids);
    }

    pub fn references(&self, schema: SchemaId, field: FieldId) -> Option<bool> {
        self.entries
            .read()
            .expect("lock poisoned")
            .references
            .get(&(schema, field))
            .copied()
    }

    pub fn put_references(&self, schema: SchemaId, field: FieldId, answer: bool) {
        self.entries
            .write()
            .expect("lock poisoned")
            .references
            .insert((schema, field), answer);
    }

    /// Drop every entry the scope covers.
    pub fn invalidate(&self, scope: CacheScope) {
        let mut entries = self.entries.write().expect("lock poisoned");
        match scope {
            CacheScope::All => *entries = Entries::default(),
            CacheScope::Schema(schema) => {
                entries.schemas.remove(&schema);
                entries.fields.retain(|_, f| f.schema != schema);
                entries.names.retain(|(s, _), _| *s != schema);
                entries.field_lists.retain(|(s, _), _| *s != schema);
                entries.references.retain(|(s, _), _| *s != schema);
            }
            CacheScope::Field(schema, field) => {
                entries.fields.remove(&field);
                entries.names.retain(|_, id| *id != field);
                entries.field_lists.retain(|(s, _), _| *s != schema);
                entries.references.retain(|(_, f), _| *f != field);
            }
        }
        debug!(?scope, "registry cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_types::FieldType;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn descriptor(id: i32, schema: i32, name: &str) -> Arc<FieldDescriptor> {
        Arc::new(
            FieldDescriptor::new_temporary(FieldId(id), SchemaId(schema), FieldType::Text, name, 1)
                .unwrap(),
        )
    }

    fn filled() -> RegistryCache {
        let cache = RegistryCache::new();
        cache.put_schema(Arc::new(Schema::new(SchemaId(0), "Resources")));
        cache.put_schema(Arc::new(Schema::new(SchemaId(1), "Photos")));
        cache.put_field(descriptor(1, 0, "Title"));
        cache.put_field(descriptor(2, 1, "Caption"));
        cache.put_name(SchemaId(0), "Title", FieldId(1));
        cache.put_name(SchemaId(1), "Caption", FieldId(2));
        cache.put_field_list(SchemaId(0), FieldQuery::default(), vec![FieldId(1)]);
        cache.put_field_list(SchemaId(1), FieldQuery::default(), vec![FieldId(2)]);
        cache.put_references(SchemaId(0), FieldId(1), true);
        cache.put_references(SchemaId(1), FieldId(2), false);
        cache
    }

    // ------------------------------------------------------------------
    // Invalidation scopes
    // ------------------------------------------------------------------

    #[test]
    fn names_are_case_insensitive() {
        let cache = filled();
        assert_eq!(cache.name(SchemaId(0), "TITLE"), Some(FieldId(1)));
        assert_eq!(cache.name(SchemaId(1), "title"), None);
    }

    #[test]
    fn field_scope_leaves_other_schemas_alone() {
        let cache = filled();
        cache.invalidate(CacheScope::Field(SchemaId(0), FieldId(1)));
        assert!(cache.field(FieldId(1)).is_none());
        assert!(cache.name(SchemaId(0), "Title").is_none());
        assert!(cache.field_list(SchemaId(0), &FieldQuery::default()).is_none());
        assert!(cache.references(SchemaId(0), FieldId(1)).is_none());
        assert!(cache.schema(SchemaId(0)).is_some());

        assert!(cache.field(FieldId(2)).is_some());
        assert!(cache.field_list(SchemaId(1), &FieldQuery::default()).is_some());
    }

    #[test]
    fn schema_scope_drops_its_fields() {
        let cache = filled();
        cache.invalidate(CacheScope::Schema(SchemaId(1)));
        assert!(cache.schema(SchemaId(1)).is_none());
        assert!(cache.field(FieldId(2)).is_none());
        assert!(cache.references(SchemaId(1), FieldId(2)).is_none());
        assert!(cache.field(FieldId(1)).is_some());
    }

    #[test]
    fn all_scope_empties_everything() {
        let cache = filled();
        cache.invalidate(CacheScope::All);
        assert!(cache.schema(SchemaId(0)).is_none());
        assert!(cache.field(FieldId(1)).is_none());
        assert!(cache.name(SchemaId(1), "Caption").is_none());
    }
}
