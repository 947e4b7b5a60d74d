//! Storage backend traits.
//!
//! A backend is split along the physical tables it manages. Anything that
//! implements all of them is a [`MetadataStore`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use folio_types::{
    AssociationKind, ColumnType, FieldId, QualifierId, RecordId, SchemaId, TermId, TermKind,
    UserId,
};

use crate::error::StoreResult;
use crate::row::{Cell, Comment, FieldStamp, IdSequence, PermissionRow, RowKind, TermCount, TermRow};

/// Serialized catalogue rows (schemas and field descriptors) plus identifier
/// allocation.
pub trait CatalogStore: Send + Sync {
    /// Read a serialized row. Returns `Ok(None)` if it does not exist.
    fn read_row(&self, kind: RowKind, id: i64) -> StoreResult<Option<Vec<u8>>>;

    /// Create or replace a serialized row.
    fn write_row(&self, kind: RowKind, id: i64, data: Vec<u8>) -> StoreResult<()>;

    /// Delete a row. Returns `true` if it existed.
    fn delete_row(&self, kind: RowKind, id: i64) -> StoreResult<bool>;

    /// All rows of a kind, ordered by id.
    fn list_rows(&self, kind: RowKind) -> StoreResult<Vec<(i64, Vec<u8>)>>;

    /// Allocate the next identifier of a sequence.
    ///
    /// Runs under an exclusive lock covering "read current extreme, record
    /// new value". Permanent ids grow upward from 0 (records, terms and
    /// comments from 1); temporary ids grow downward from -1.
    fn allocate_id(&self, sequence: IdSequence, temporary: bool) -> StoreResult<i64>;
}

/// Per-schema record rows with dynamically allocated columns.
pub trait RecordTable: Send + Sync {
    /// Allocate a column. Re-adding a column with the same type is a no-op;
    /// a different type fails with `ColumnConflict`.
    fn add_column(&self, schema: SchemaId, column: &str, column_type: ColumnType) -> StoreResult<()>;

    /// Drop a column and every value in it. Returns `true` if it existed.
    fn drop_column(&self, schema: SchemaId, column: &str) -> StoreResult<bool>;

    /// Rename a column, keeping its values.
    fn rename_column(&self, schema: SchemaId, from: &str, to: &str) -> StoreResult<()>;

    /// The type of an allocated column.
    fn column_type(&self, schema: SchemaId, column: &str) -> StoreResult<Option<ColumnType>>;

    /// Insert an empty record row.
    fn insert_record(&self, schema: SchemaId, record: RecordId) -> StoreResult<()>;

    /// Delete a record row. Returns `true` if it existed.
    fn delete_record(&self, record: RecordId) -> StoreResult<bool>;

    /// Move a record row to a new identity.
    fn rekey_record(&self, from: RecordId, to: RecordId) -> StoreResult<()>;

    /// The schema a record row belongs to, if it exists.
    fn record_schema(&self, record: RecordId) -> StoreResult<Option<SchemaId>>;

    /// All record ids in a schema, ascending.
    fn records_in_schema(&self, schema: SchemaId) -> StoreResult<Vec<RecordId>>;

    /// Read one cell. Unset cells read as [`Cell::Null`].
    fn read_cell(&self, record: RecordId, column: &str) -> StoreResult<Cell>;

    /// Write one cell; the column must exist and the cell must fit its type.
    fn write_cell(&self, record: RecordId, column: &str, cell: Cell) -> StoreResult<()>;
}

/// Record-to-target association rows.
pub trait AssociationStore: Send + Sync {
    /// Targets linked to a record through a field, ascending.
    fn associations(&self, kind: AssociationKind, record: RecordId, field: FieldId) -> StoreResult<Vec<i64>>;

    /// Insert an association. Returns `true` if it was new.
    fn add_association(&self, kind: AssociationKind, record: RecordId, field: FieldId, target: i64) -> StoreResult<bool>;

    /// Remove an association. Returns `true` if it existed.
    fn remove_association(&self, kind: AssociationKind, record: RecordId, field: FieldId, target: i64) -> StoreResult<bool>;

    /// Remove every association of a record through a field, returning the
    /// removed targets.
    fn clear_associations(&self, kind: AssociationKind, record: RecordId, field: FieldId) -> StoreResult<Vec<i64>>;

    /// Records linked to a target, optionally restricted to one field.
    fn records_with_target(&self, kind: AssociationKind, field: Option<FieldId>, target: i64) -> StoreResult<Vec<RecordId>>;

    /// Every `(record, target)` pair stored for a field, ordered.
    fn field_associations(&self, kind: AssociationKind, field: FieldId) -> StoreResult<Vec<(RecordId, i64)>>;

    /// Move every association row of a field to a new field id.
    fn rekey_field_associations(&self, from: FieldId, to: FieldId) -> StoreResult<usize>;

    /// Delete every association row of a field.
    fn delete_field_associations(&self, kind: AssociationKind, field: FieldId) -> StoreResult<usize>;

    /// Move every association row owned by a record to a new identity.
    fn rekey_record_associations(&self, from: RecordId, to: RecordId) -> StoreResult<usize>;

    /// Delete rows owned by a record and rows of other records that
    /// reference it. Returns the removed `(kind, field, target)` rows owned
    /// by the record.
    fn delete_record_associations(&self, record: RecordId) -> StoreResult<Vec<(AssociationKind, FieldId, i64)>>;
}

/// Shared vocabulary and hierarchical terms.
pub trait TermStore: Send + Sync {
    /// Create a term. Hierarchical terms receive their parent's full name as
    /// prefix.
    fn create_term(&self, field: FieldId, kind: TermKind, segment: &str, parent: Option<TermId>) -> StoreResult<TermId>;

    fn term(&self, id: TermId) -> StoreResult<Option<TermRow>>;

    /// Find a term of a field by full name or variant, ignoring case.
    fn resolve_term(&self, field: FieldId, name: &str) -> StoreResult<Option<TermId>>;

    /// Returns `true` if the id is a term of the given field.
    fn term_exists(&self, field: FieldId, id: TermId) -> StoreResult<bool> {
        Ok(self.term(id)?.is_some_and(|t| t.field == field))
    }

    /// All terms of a field, ordered by id.
    fn terms_for_field(&self, field: FieldId) -> StoreResult<Vec<TermRow>>;

    /// Replace a term row.
    fn update_term(&self, row: TermRow) -> StoreResult<()>;

    /// Delete a term. Returns `true` if it existed.
    fn delete_term(&self, id: TermId) -> StoreResult<bool>;

    /// Move every term of a field to a new field id.
    fn rekey_field_terms(&self, from: FieldId, to: FieldId) -> StoreResult<usize>;

    /// Delete every term of a field, returning their ids.
    fn delete_field_terms(&self, field: FieldId) -> StoreResult<Vec<TermId>>;
}

/// Users known to the enclosing application.
pub trait UserDirectory: Send + Sync {
    fn register_user(&self, id: UserId, name: &str) -> StoreResult<()>;

    fn user_name(&self, id: UserId) -> StoreResult<Option<String>>;

    /// Find a user by exact name, ignoring case.
    fn resolve_user(&self, name: &str) -> StoreResult<Option<UserId>>;
}

/// Per-record side tables: field timestamps, qualifiers, ratings, comments.
pub trait RecordExtras: Send + Sync {
    fn set_field_stamp(&self, record: RecordId, field: FieldId, stamp: FieldStamp) -> StoreResult<()>;

    fn field_stamp(&self, record: RecordId, field: FieldId) -> StoreResult<Option<FieldStamp>>;

    fn set_record_qualifier(&self, record: RecordId, field: FieldId, qualifier: Option<QualifierId>) -> StoreResult<()>;

    fn record_qualifier(&self, record: RecordId, field: FieldId) -> StoreResult<Option<QualifierId>>;

    /// Set or replace one user's rating (0-100).
    fn set_rating(&self, record: RecordId, user: UserId, score: u8) -> StoreResult<()>;

    fn ratings(&self, record: RecordId) -> StoreResult<BTreeMap<UserId, u8>>;

    fn add_comment(&self, record: RecordId, user: UserId, at: DateTime<Utc>, text: &str) -> StoreResult<Comment>;

    fn comments(&self, record: RecordId) -> StoreResult<Vec<Comment>>;

    /// Drop per-field side rows of a field (timestamps and qualifiers).
    fn delete_field_extras(&self, field: FieldId) -> StoreResult<()>;

    /// Move every side row of a record to a new identity.
    fn rekey_record_extras(&self, from: RecordId, to: RecordId) -> StoreResult<()>;

    /// Delete every side row of a record.
    fn delete_record_extras(&self, record: RecordId) -> StoreResult<()>;
}

/// Caches persisted in storage and therefore shared across processes.
pub trait SharedCaches: Send + Sync {
    fn permission(&self, record: RecordId, class_key: &str) -> StoreResult<Option<PermissionRow>>;

    fn set_permission(&self, record: RecordId, class_key: &str, row: PermissionRow) -> StoreResult<()>;

    /// Delete every cached row for a record. Returns how many were removed.
    fn clear_record_permissions(&self, record: RecordId) -> StoreResult<usize>;

    /// Delete every cached permission row.
    fn clear_all_permissions(&self) -> StoreResult<usize>;

    fn term_count(&self, term: TermId) -> StoreResult<TermCount>;

    fn set_term_count(&self, term: TermId, count: TermCount) -> StoreResult<()>;
}

/// A complete storage backend.
pub trait MetadataStore:
    CatalogStore + RecordTable + AssociationStore + TermStore + UserDirectory + RecordExtras + SharedCaches
{
}

impl<T> MetadataStore for T where
    T: CatalogStore
        + RecordTable
        + AssociationStore
        + TermStore
        + UserDirectory
        + RecordExtras
        + SharedCaches
{
}
