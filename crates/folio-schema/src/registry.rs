//! The schema registry: schemas, field descriptors and their lifecycle.
//!
//! All reads go through the [`RegistryCache`]; every mutator invalidates the
//! narrowest scope covering what it touched before returning, so no caller
//! observes a stale descriptor, list or lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use folio_access::{PrivilegeRequirements, PrivilegeSet};
use folio_store::{
    decode, encode, AssociationStore, CatalogStore, IdSequence, MetadataStore, RecordExtras,
    RecordTable, RowKind, SharedCaches, StoreError, TermStore,
};
use folio_types::{
    FieldId, FieldType, Point, SchemaId, StorageClass, TermId, TermKind, ValueInput,
    TREE_SEPARATOR,
};

use crate::attributes::{Attribute, AttributeKind};
use crate::cache::{CacheScope, RegistryCache};
use crate::convert::{ConverterConfig, TypeConverter};
use crate::descriptor::{DefaultValue, FieldDescriptor, PrivilegeLevel};
use crate::error::{SchemaError, SchemaResult};
use crate::names;
use crate::schema::{OrderKind, Schema};

/// How a caller names a field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldRef {
    Id(FieldId),
    /// A bare name, or `"Schema: Name"`.
    Name(String),
}

impl From<FieldId> for FieldRef {
    fn from(id: FieldId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for FieldRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&FieldDescriptor> for FieldRef {
    fn from(field: &FieldDescriptor) -> Self {
        Self::Id(field.id)
    }
}

/// Ordering for [`SchemaRegistry::get_fields`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldOrder {
    #[default]
    Creation,
    Display,
    Edit,
    /// By display name, ignoring case.
    Alphabetical,
}

/// Filter and ordering for [`SchemaRegistry::get_fields`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FieldQuery {
    pub type_filter: Option<FieldType>,
    pub order: FieldOrder,
    pub include_disabled: bool,
    pub include_temporary: bool,
}

impl FieldQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.type_filter = Some(field_type);
        self
    }

    pub fn ordered_by(mut self, order: FieldOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_disabled(mut self) -> Self {
        self.include_disabled = true;
        self
    }

    pub fn with_temporary(mut self) -> Self {
        self.include_temporary = true;
        self
    }
}

fn field_id(raw: i64) -> SchemaResult<FieldId> {
    i32::try_from(raw)
        .map(FieldId)
        .map_err(|_| SchemaError::InvalidValue(format!("field id {raw} out of range")))
}

fn schema_id(raw: i64) -> SchemaResult<SchemaId> {
    i32::try_from(raw)
        .map(SchemaId)
        .map_err(|_| SchemaError::InvalidValue(format!("schema id {raw} out of range")))
}

/// Split a tree path into its segments. A path without separators is one
/// segment.
pub(crate) fn tree_segments(path: &str) -> Vec<&str> {
    path.split(TREE_SEPARATOR.trim())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Schemas and field descriptors backed by a [`MetadataStore`].
pub struct SchemaRegistry {
    store: Arc<dyn MetadataStore>,
    cache: RegistryCache,
    converter: TypeConverter,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("cache", &self.cache)
            .field("converter", &self.converter)
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new(store: Arc<dyn MetadataStore>, config: ConverterConfig) -> Self {
        Self {
            store,
            cache: RegistryCache::new(),
            converter: TypeConverter::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Drop cached state, for example after another process changed the
    /// catalogue.
    pub fn invalidate(&self, scope: CacheScope) {
        self.cache.invalidate(scope);
    }

    // ------------------------------------------------------------------
    // Persistence helpers
    // ------------------------------------------------------------------

    fn save_schema(&self, schema: Schema) -> SchemaResult<Arc<Schema>> {
        self.store
            .write_row(RowKind::Schema, i64::from(schema.id.get()), encode(&schema)?)?;
        self.cache.invalidate(CacheScope::Schema(schema.id));
        let schema = Arc::new(schema);
        self.cache.put_schema(Arc::clone(&schema));
        Ok(schema)
    }

    /// Restore a schema row exactly as captured earlier.
    pub(crate) fn restore_schema(&self, schema: &Schema) -> SchemaResult<()> {
        self.save_schema(schema.clone()).map(|_| ())
    }

    fn update_schema<F>(&self, id: SchemaId, change: F) -> SchemaResult<Arc<Schema>>
    where
        F: FnOnce(&mut Schema) -> SchemaResult<()>,
    {
        let mut schema = (*self.schema(id)?).clone();
        change(&mut schema)?;
        self.save_schema(schema)
    }

    fn write_field(&self, field: &FieldDescriptor) -> SchemaResult<()> {
        self.store
            .write_row(RowKind::Field, i64::from(field.id.get()), encode(field)?)?;
        self.cache.invalidate(CacheScope::Field(field.schema, field.id));
        Ok(())
    }

    fn save_field(&self, field: FieldDescriptor) -> SchemaResult<Arc<FieldDescriptor>> {
        self.write_field(&field)?;
        let field = Arc::new(field);
        self.cache.put_field(Arc::clone(&field));
        Ok(field)
    }

    fn load_field(&self, id: FieldId) -> SchemaResult<Arc<FieldDescriptor>> {
        if let Some(field) = self.cache.field(id) {
            return Ok(field);
        }
        let bytes = self
            .store
            .read_row(RowKind::Field, i64::from(id.get()))?
            .ok_or_else(|| SchemaError::UnknownField(id.to_string()))?;
        let field: Arc<FieldDescriptor> = Arc::new(decode(&bytes)?);
        self.cache.put_field(Arc::clone(&field));
        Ok(field)
    }

    /// Every descriptor of a schema, temporary and disabled included.
    fn all_fields(&self, schema: SchemaId) -> SchemaResult<Vec<Arc<FieldDescriptor>>> {
        let mut fields = Vec::new();
        for (_, bytes) in self.store.list_rows(RowKind::Field)? {
            let field: FieldDescriptor = decode(&bytes)?;
            if field.schema == schema {
                let field = Arc::new(field);
                self.cache.put_field(Arc::clone(&field));
                fields.push(field);
            }
        }
        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Schemas
    // ------------------------------------------------------------------

    /// Create a schema. The first schema created is the default schema.
    pub fn create_schema(&self, name: &str) -> SchemaResult<Arc<Schema>> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchemaError::InvalidName("schema name is empty".into()));
        }
        if self.schemas()?.iter().any(|s| names::same_name(&s.name, name)) {
            return Err(SchemaError::DuplicateName(name.to_string()));
        }
        let id = schema_id(self.store.allocate_id(IdSequence::Schema, false)?)?;
        let schema = self.save_schema(Schema::new(id, name))?;
        info!(schema = %id, name, "schema created");
        Ok(schema)
    }

    pub fn schema(&self, id: SchemaId) -> SchemaResult<Arc<Schema>> {
        if let Some(schema) = self.cache.schema(id) {
            return Ok(schema);
        }
        let bytes = self
            .store
            .read_row(RowKind::Schema, i64::from(id.get()))?
            .ok_or_else(|| SchemaError::UnknownSchema(id.to_string()))?;
        let schema: Arc<Schema> = Arc::new(decode(&bytes)?);
        self.cache.put_schema(Arc::clone(&schema));
        Ok(schema)
    }

    /// Find a schema by name, ignoring case.
    pub fn schema_by_name(&self, name: &str) -> SchemaResult<Arc<Schema>> {
        self.schemas()?
            .into_iter()
            .find(|s| names::same_name(&s.name, name.trim()))
            .ok_or_else(|| SchemaError::UnknownSchema(name.to_string()))
    }

    /// All schemas, ordered by id.
    pub fn schemas(&self) -> SchemaResult<Vec<Arc<Schema>>> {
        self.store
            .list_rows(RowKind::Schema)?
            .into_iter()
            .map(|(id, _)| self.schema(schema_id(id)?))
            .collect()
    }

    pub fn set_schema_privileges(
        &self,
        schema: SchemaId,
        level: PrivilegeLevel,
        set: PrivilegeSet,
    ) -> SchemaResult<Arc<Schema>> {
        let updated = self.update_schema(schema, |s| {
            s.set_privileges(level, set);
            Ok(())
        })?;
        if level == PrivilegeLevel::Viewing {
            // Persisted view results were computed under the old rule.
            let removed = self.store.clear_all_permissions()?;
            debug!(schema = %schema, removed, "viewing rule changed, permission rows cleared");
        }
        Ok(updated)
    }

    pub fn set_default_sort_field(
        &self,
        schema: SchemaId,
        field: Option<FieldRef>,
    ) -> SchemaResult<Arc<Schema>> {
        let field = match field {
            Some(reference) => Some(self.get_field(reference, Some(schema))?.id),
            None => None,
        };
        self.update_schema(schema, |s| {
            s.default_sort_field = field;
            Ok(())
        })
    }

    pub fn set_templates(
        &self,
        schema: SchemaId,
        view_template: Option<String>,
        edit_template: Option<String>,
    ) -> SchemaResult<Arc<Schema>> {
        self.update_schema(schema, |s| {
            s.view_template = view_template;
            s.edit_template = edit_template;
            Ok(())
        })
    }

    pub fn set_item_name(
        &self,
        schema: SchemaId,
        item_name: &str,
        abbreviation: &str,
    ) -> SchemaResult<Arc<Schema>> {
        self.update_schema(schema, |s| {
            s.item_name = item_name.trim().to_string();
            s.abbreviation = abbreviation.trim().to_string();
            Ok(())
        })
    }

    /// Whether a schema's viewing rule reads a field. Memoized.
    pub fn viewing_rule_references(&self, schema: SchemaId, field: FieldId) -> SchemaResult<bool> {
        if let Some(answer) = self.cache.references(schema, field) {
            return Ok(answer);
        }
        let answer = self.schema(schema)?.viewing.references_field(field);
        self.cache.put_references(schema, field, answer);
        Ok(answer)
    }

    // ------------------------------------------------------------------
    // Field lookup
    // ------------------------------------------------------------------

    fn field_id_by_name(&self, schema: SchemaId, name: &str) -> SchemaResult<Option<FieldId>> {
        if let Some(id) = self.cache.name(schema, name) {
            return Ok(Some(id));
        }
        let found = self
            .all_fields(schema)?
            .into_iter()
            .find(|f| names::same_name(&f.name, name))
            .map(|f| f.id);
        if let Some(id) = found {
            self.cache.put_name(schema, name, id);
        }
        Ok(found)
    }

    /// Canonicalize a field reference.
    ///
    /// Bare names are looked up in `within`, or the default schema when
    /// `within` is `None`. If `within` is given, a field from another schema
    /// fails with `CrossSchema`.
    pub fn get_field(
        &self,
        reference: impl Into<FieldRef>,
        within: Option<SchemaId>,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let field = match reference.into() {
            FieldRef::Id(id) => self.load_field(id)?,
            FieldRef::Name(name) => {
                let bare_schema = within.unwrap_or(SchemaId::DEFAULT);
                let id = match names::split_qualified(&name) {
                    Some((schema_name, field_name)) => match self.schema_by_name(schema_name) {
                        Ok(schema) => self.field_id_by_name(schema.id, field_name)?,
                        // A field whose own name contains the separator.
                        Err(SchemaError::UnknownSchema(_)) => {
                            match self.field_id_by_name(bare_schema, name.trim())? {
                                Some(id) => Some(id),
                                None => return Err(SchemaError::UnknownSchema(schema_name.to_string())),
                            }
                        }
                        Err(e) => return Err(e),
                    },
                    None => self.field_id_by_name(bare_schema, name.trim())?,
                };
                let id = id.ok_or_else(|| SchemaError::UnknownField(name.clone()))?;
                self.load_field(id)?
            }
        };
        if let Some(expected) = within {
            if field.schema != expected {
                return Err(SchemaError::CrossSchema {
                    field: field.id,
                    expected,
                    actual: field.schema,
                });
            }
        }
        Ok(field)
    }

    /// Fields of a schema, filtered and ordered. Memoized per query.
    pub fn get_fields(
        &self,
        schema: SchemaId,
        query: &FieldQuery,
    ) -> SchemaResult<Vec<Arc<FieldDescriptor>>> {
        if let Some(ids) = self.cache.field_list(schema, query) {
            return ids.into_iter().map(|id| self.load_field(id)).collect();
        }
        let schema_row = self.schema(schema)?;
        let mut fields: Vec<Arc<FieldDescriptor>> = self
            .all_fields(schema)?
            .into_iter()
            .filter(|f| query.type_filter.map_or(true, |t| f.field_type == t))
            .filter(|f| query.include_disabled || f.enabled)
            .filter(|f| query.include_temporary || !f.is_temporary())
            .collect();

        match query.order {
            FieldOrder::Creation => fields.sort_by_key(|f| f.sequence),
            FieldOrder::Display | FieldOrder::Edit => {
                let kind = if query.order == FieldOrder::Display {
                    OrderKind::Display
                } else {
                    OrderKind::Edit
                };
                let positions: HashMap<FieldId, usize> = schema_row
                    .order(kind)
                    .iter()
                    .enumerate()
                    .map(|(pos, id)| (*id, pos))
                    .collect();
                fields.sort_by_key(|f| (positions.get(&f.id).copied().unwrap_or(usize::MAX), f.sequence));
            }
            FieldOrder::Alphabetical => {
                fields.sort_by_cached_key(|f| (f.display_name().to_lowercase(), f.sequence))
            }
        }

        self.cache
            .put_field_list(schema, query.clone(), fields.iter().map(|f| f.id).collect());
        Ok(fields)
    }

    // ------------------------------------------------------------------
    // Field lifecycle
    // ------------------------------------------------------------------

    fn check_name_free(
        &self,
        schema: SchemaId,
        name: &str,
        storage_name: &str,
        except: Option<FieldId>,
    ) -> SchemaResult<()> {
        let taken = self.all_fields(schema)?.into_iter().any(|f| {
            Some(f.id) != except
                && (names::same_name(&f.name, name) || names::same_name(&f.storage_name, storage_name))
        });
        if taken {
            return Err(SchemaError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Create a temporary field. Storage is allocated by
    /// [`make_permanent`](Self::make_permanent).
    pub fn create_field(
        &self,
        schema: SchemaId,
        field_type: FieldType,
        name: &str,
        optional: bool,
        default: Option<ValueInput>,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        self.schema(schema)?;
        let name = name.trim();
        let storage_name = names::storage_name(name, schema)?;
        self.check_name_free(schema, name, &storage_name, None)?;

        let sequence = self
            .all_fields(schema)?
            .iter()
            .map(|f| f.sequence)
            .max()
            .map_or(1, |max| max + 1);
        let id = field_id(self.store.allocate_id(IdSequence::Field, true)?)?;
        let mut field = FieldDescriptor::new_temporary(id, schema, field_type, name, sequence)?;
        field.optional = optional;
        let field = self.save_field(field)?;
        self.update_schema(schema, |s| {
            s.push_field(id);
            Ok(())
        })?;
        info!(field = %id, schema = %schema, name, field_type = %field_type, "field created");

        match default {
            Some(input) => match self.set_field_default(id, Some(input)) {
                Ok(field) => Ok(field),
                Err(e) => {
                    self.remove_field(&field)?;
                    Err(e)
                }
            },
            None => Ok(field),
        }
    }

    /// Like [`create_field`](Self::create_field) with the type given by
    /// name. Unknown names fail with `InvalidType`.
    pub fn create_field_of_type_name(
        &self,
        schema: SchemaId,
        type_name: &str,
        name: &str,
        optional: bool,
        default: Option<ValueInput>,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let field_type: FieldType = type_name
            .parse()
            .map_err(|_| SchemaError::InvalidType(type_name.to_string()))?;
        self.create_field(schema, field_type, name, optional, default)
    }

    pub fn set_field_attribute(
        &self,
        field: impl Into<FieldRef>,
        attribute: Attribute,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let mut descriptor = (*self.get_field(field, None)?).clone();
        if let Attribute::ReferenceSchema(Some(target)) = &attribute {
            self.schema(*target)?;
        }
        descriptor.set_attribute(attribute)?;
        self.save_field(descriptor)
    }

    /// Set or clear a field's default. Literal strings for term fields are
    /// resolved against the field's vocabulary, creating missing terms.
    pub fn set_field_default(
        &self,
        field: impl Into<FieldRef>,
        default: Option<ValueInput>,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let mut descriptor = (*self.get_field(field, None)?).clone();
        let value = match default {
            Some(input) => self.resolve_default(&descriptor, input)?,
            None => None,
        };
        descriptor.set_default(value)?;
        self.save_field(descriptor)
    }

    fn resolve_default(
        &self,
        field: &FieldDescriptor,
        input: ValueInput,
    ) -> SchemaResult<Option<DefaultValue>> {
        if !AttributeKind::DefaultValue.is_legal_for(field.field_type) {
            return Err(SchemaError::IllegalAttribute {
                attribute: AttributeKind::DefaultValue,
                field_type: field.field_type,
            });
        }
        let mut items = input.into_items();
        if items.is_empty() {
            return Ok(None);
        }
        let invalid = |item: &ValueInput| {
            SchemaError::InvalidValue(format!("{item:?} is not a {} default", field.field_type))
        };

        if field.field_type.term_kind().is_some() {
            let mut ids = Vec::with_capacity(items.len());
            for item in items {
                let id = match &item {
                    ValueInput::Id(raw) => {
                        if !self.store.term_exists(field.id, TermId(*raw))? {
                            return Err(invalid(&item));
                        }
                        TermId(*raw)
                    }
                    ValueInput::Text(text) => self.add_term(field.id, text)?,
                    other => return Err(invalid(other)),
                };
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if !field.allows_multiple() {
                ids.truncate(1);
            }
            return Ok(Some(DefaultValue::Terms(ids)));
        }

        if items.len() > 1 {
            return Err(SchemaError::InvalidValue(format!(
                "{} fields take a single default value",
                field.field_type
            )));
        }
        let item = items.remove(0);
        let value = match (field.field_type.storage_class(), item) {
            (StorageClass::TextColumn, ValueInput::Text(text)) => DefaultValue::Text(text),
            (StorageClass::Singular(FieldType::Number), ValueInput::Number(n)) => DefaultValue::Number(n),
            (StorageClass::Singular(FieldType::Number), ValueInput::Text(text)) => DefaultValue::Number(
                text.trim().parse().map_err(|_| invalid(&ValueInput::Text(text.clone())))?,
            ),
            (StorageClass::Singular(FieldType::Flag), ValueInput::Flag(b)) => DefaultValue::Flag(b),
            (StorageClass::Singular(FieldType::Flag), ValueInput::Text(text)) => {
                match text.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" | "1" => DefaultValue::Flag(true),
                    "false" | "no" | "0" => DefaultValue::Flag(false),
                    _ => return Err(invalid(&ValueInput::Text(text))),
                }
            }
            (StorageClass::Singular(FieldType::Point), ValueInput::Point(p)) => DefaultValue::Point(p),
            (StorageClass::Singular(FieldType::Point), ValueInput::Text(text)) => {
                DefaultValue::Point(Point::parse(&text)?)
            }
            (_, other) => return Err(invalid(&other)),
        };
        Ok(Some(value))
    }

    pub fn set_field_privileges(
        &self,
        field: impl Into<FieldRef>,
        level: PrivilegeLevel,
        set: PrivilegeSet,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let mut descriptor = (*self.get_field(field, None)?).clone();
        descriptor.set_privileges(level, set);
        self.save_field(descriptor)
    }

    /// Give a temporary field a permanent id and allocate its storage.
    ///
    /// Columns that already exist with an incompatible physical type fail
    /// with `SchemaConflict` before anything changes. Permanent fields are
    /// returned unchanged.
    pub fn make_permanent(&self, field: impl Into<FieldRef>) -> SchemaResult<Arc<FieldDescriptor>> {
        let temporary = self.get_field(field, None)?;
        if !temporary.is_temporary() {
            return Ok(temporary);
        }
        let schema = temporary.schema;
        let columns = temporary.columns();
        for (column, column_type) in &columns {
            if let Some(existing) = self.store.column_type(schema, column)? {
                if existing != *column_type {
                    return Err(SchemaError::SchemaConflict(format!(
                        "column {column} exists as {existing:?}, {} needs {column_type:?}",
                        temporary.name
                    )));
                }
            }
        }

        let id = field_id(self.store.allocate_id(IdSequence::Field, false)?)?;
        for (column, column_type) in &columns {
            self.store.add_column(schema, column, *column_type)?;
        }
        let associations = self.store.rekey_field_associations(temporary.id, id)?;
        let terms = self.store.rekey_field_terms(temporary.id, id)?;
        self.store.delete_field_extras(temporary.id)?;

        let mut permanent = (*temporary).clone();
        permanent.id = id;
        let permanent = self.save_field(permanent)?;
        self.store.delete_row(RowKind::Field, i64::from(temporary.id.get()))?;
        self.cache.invalidate(CacheScope::Field(schema, temporary.id));
        self.update_schema(schema, |s| {
            s.replace_field(temporary.id, id);
            Ok(())
        })?;
        info!(
            from = %temporary.id,
            field = %id,
            schema = %schema,
            columns = columns.len(),
            associations,
            terms,
            "field made permanent"
        );
        Ok(permanent)
    }

    /// Remove a field's storage, terms, associations and catalogue row.
    /// The schema row is left to the caller.
    pub(crate) fn remove_field(&self, field: &FieldDescriptor) -> SchemaResult<()> {
        if !field.is_temporary() {
            for (column, _) in field.columns() {
                self.store.drop_column(field.schema, &column)?;
            }
        }
        let mut associations = 0;
        if let Some(kind) = field.field_type.association_kind() {
            associations = self.store.delete_field_associations(kind, field.id)?;
        }
        let terms = if field.field_type.term_kind().is_some() {
            self.store.delete_field_terms(field.id)?.len()
        } else {
            0
        };
        self.store.delete_field_extras(field.id)?;
        self.store.delete_row(RowKind::Field, i64::from(field.id.get()))?;
        self.cache.invalidate(CacheScope::Field(field.schema, field.id));
        debug!(field = %field.id, associations, terms, "field storage removed");
        Ok(())
    }

    /// Drop a field and everything stored for it. Fails with `MappedField`
    /// while the field is a standard-name target, and with
    /// `RuleReferencedField` while any privilege rule of its schema or of a
    /// sibling field still reads it.
    pub fn drop_field(&self, field: impl Into<FieldRef>) -> SchemaResult<()> {
        let field = self.get_field(field, None)?;
        let schema = self.schema(field.schema)?;
        if let Some(std_name) = schema.std_name_of(field.id) {
            return Err(SchemaError::MappedField {
                field: field.id,
                std_name: std_name.to_string(),
            });
        }
        self.check_unreferenced(&schema, field.id)?;
        self.remove_field(&field)?;
        self.update_schema(field.schema, |s| {
            s.remove_field(field.id);
            Ok(())
        })?;
        info!(field = %field.id, schema = %field.schema, name = %field.name, "field dropped");
        Ok(())
    }

    fn check_unreferenced(&self, schema: &Schema, field: FieldId) -> SchemaResult<()> {
        for level in PrivilegeLevel::ALL {
            if schema.privileges(level).references_field(field) {
                return Err(SchemaError::RuleReferencedField {
                    field,
                    owner: format!("schema '{}'", schema.name),
                    level,
                });
            }
        }
        for other in self.all_fields(schema.id)?.into_iter().filter(|f| f.id != field) {
            if let Some(level) = PrivilegeLevel::ALL
                .into_iter()
                .find(|level| other.privileges(*level).references_field(field))
            {
                return Err(SchemaError::RuleReferencedField {
                    field,
                    owner: format!("field '{}'", other.name),
                    level,
                });
            }
        }
        Ok(())
    }

    /// Rename a field, re-deriving its storage name and moving its columns.
    pub fn rename_field(
        &self,
        field: impl Into<FieldRef>,
        new_name: &str,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let field = self.get_field(field, None)?;
        let new_name = new_name.trim();
        if new_name == field.name {
            return Ok(field);
        }
        let storage_name = names::storage_name(new_name, field.schema)?;
        self.check_name_free(field.schema, new_name, &storage_name, Some(field.id))?;

        if !field.is_temporary() && storage_name != field.storage_name {
            let moves: Vec<(String, String)> = field
                .columns()
                .into_iter()
                .zip(names::columns(&storage_name, field.field_type))
                .map(|((from, _), (to, _))| (from, to))
                .collect();
            for (_, to) in &moves {
                if self.store.column_type(field.schema, to)?.is_some() {
                    return Err(SchemaError::SchemaConflict(format!("column {to} already exists")));
                }
            }
            for (from, to) in &moves {
                self.store.rename_column(field.schema, from, to)?;
            }
        }

        let mut renamed = (*field).clone();
        renamed.name = new_name.to_string();
        renamed.storage_name = storage_name;
        let renamed = self.save_field(renamed)?;
        info!(field = %field.id, from = %field.name, to = new_name, "field renamed");
        Ok(renamed)
    }

    /// Change a field's type, migrating stored values. Unsupported pairs
    /// fail with `UnsupportedConversion` and leave the field untouched.
    pub fn convert_field_type(
        &self,
        field: impl Into<FieldRef>,
        to: FieldType,
    ) -> SchemaResult<Arc<FieldDescriptor>> {
        let field = self.get_field(field, None)?;
        if field.field_type == to {
            return Ok(field);
        }
        let plan = self.converter.plan(&field, to)?;
        let converted = self
            .converter
            .execute(&plan, self.store.as_ref(), &field, |d| self.write_field(d))?;
        self.cache.invalidate(CacheScope::Field(field.schema, field.id));
        let converted = Arc::new(converted);
        self.cache.put_field(Arc::clone(&converted));
        Ok(converted)
    }

    // ------------------------------------------------------------------
    // Orderings
    // ------------------------------------------------------------------

    /// Move a field to `position` in one ordering.
    pub fn move_field(
        &self,
        field: impl Into<FieldRef>,
        kind: OrderKind,
        position: usize,
    ) -> SchemaResult<Arc<Schema>> {
        let field = self.get_field(field, None)?;
        self.update_schema(field.schema, |s| {
            let order = s.order_mut(kind);
            let current = order
                .iter()
                .position(|id| *id == field.id)
                .ok_or_else(|| SchemaError::UnknownField(field.id.to_string()))?;
            order.remove(current);
            let position = position.min(order.len());
            order.insert(position, field.id);
            Ok(())
        })
    }

    /// Replace one ordering. Fields not listed keep their relative order
    /// after the listed ones.
    pub fn set_field_order(
        &self,
        schema: SchemaId,
        kind: OrderKind,
        fields: &[FieldRef],
    ) -> SchemaResult<Arc<Schema>> {
        let mut listed = Vec::with_capacity(fields.len());
        for reference in fields {
            let id = self.get_field(reference.clone(), Some(schema))?.id;
            if !listed.contains(&id) {
                listed.push(id);
            }
        }
        self.update_schema(schema, |s| {
            let order = s.order_mut(kind);
            let rest: Vec<FieldId> = order.iter().copied().filter(|id| !listed.contains(id)).collect();
            *order = listed.into_iter().chain(rest).collect();
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Standard names
    // ------------------------------------------------------------------

    /// The field a standard name maps to, if any.
    pub fn std_name(&self, schema: SchemaId, std_name: &str) -> SchemaResult<Option<Arc<FieldDescriptor>>> {
        match self.schema(schema)?.std_name_target(std_name.trim()) {
            Some(id) => self.load_field(id).map(Some),
            None => Ok(None),
        }
    }

    pub fn std_names(&self, schema: SchemaId) -> SchemaResult<BTreeMap<String, FieldId>> {
        Ok(self.schema(schema)?.std_names.clone())
    }

    /// Map a standard name to a field of the same schema, replacing any
    /// previous mapping of that name.
    pub fn map_std_name(
        &self,
        schema: SchemaId,
        std_name: &str,
        field: impl Into<FieldRef>,
    ) -> SchemaResult<Arc<Schema>> {
        let std_name = std_name.trim();
        if std_name.is_empty() {
            return Err(SchemaError::InvalidName("standard name is empty".into()));
        }
        let target = self.get_field(field, Some(schema))?.id;
        let updated = self.update_schema(schema, |s| {
            s.std_names.retain(|name, _| !name.eq_ignore_ascii_case(std_name));
            s.std_names.insert(std_name.to_string(), target);
            Ok(())
        })?;
        debug!(schema = %schema, std_name, field = %target, "standard name mapped");
        Ok(updated)
    }

    /// Clear a standard-name mapping. Returns `true` if one existed.
    pub fn unmap_std_name(&self, schema: SchemaId, std_name: &str) -> SchemaResult<bool> {
        let mut existed = false;
        self.update_schema(schema, |s| {
            let before = s.std_names.len();
            s.std_names.retain(|name, _| !name.eq_ignore_ascii_case(std_name.trim()));
            existed = s.std_names.len() != before;
            Ok(())
        })?;
        Ok(existed)
    }

    // ------------------------------------------------------------------
    // Terms
    // ------------------------------------------------------------------

    /// Resolve a term of a vocabulary or tree field by name, creating it if
    /// missing. Tree paths (`A -- B -- C`) create missing ancestors.
    pub fn add_term(&self, field: FieldId, name: &str) -> SchemaResult<TermId> {
        let descriptor = self.load_field(field)?;
        let kind = descriptor.field_type.term_kind().ok_or_else(|| {
            SchemaError::InvalidValue(format!("{} fields have no terms", descriptor.field_type))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SchemaError::InvalidValue("term name is empty".into()));
        }
        match kind {
            TermKind::Flat => match self.store.resolve_term(field, name)? {
                Some(id) => Ok(id),
                None => Ok(self.store.create_term(field, TermKind::Flat, name, None)?),
            },
            TermKind::Hierarchical => {
                let mut parent: Option<TermId> = None;
                let mut path = String::new();
                for segment in tree_segments(name) {
                    if !path.is_empty() {
                        path.push_str(TREE_SEPARATOR);
                    }
                    path.push_str(segment);
                    let id = match self.store.resolve_term(field, &path)? {
                        Some(id) => id,
                        None => self.store.create_term(field, TermKind::Hierarchical, segment, parent)?,
                    };
                    parent = Some(id);
                }
                parent.ok_or_else(|| SchemaError::InvalidValue(format!("'{name}' is not a tree path")))
            }
        }
    }

    /// Add an alternate spelling that resolves to a term.
    pub fn add_term_variant(&self, term: TermId, variant: &str) -> SchemaResult<()> {
        let mut row = self
            .store
            .term(term)?
            .ok_or(StoreError::TermNotFound(term))?;
        let variant = variant.trim();
        if !row.variants.iter().any(|v| v.eq_ignore_ascii_case(variant)) {
            row.variants.push(variant.to_string());
            self.store.update_term(row)?;
        }
        Ok(())
    }
}
