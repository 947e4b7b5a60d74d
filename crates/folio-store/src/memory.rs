use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use folio_types::{
    AssociationKind, ColumnType, FieldId, QualifierId, RecordId, SchemaId, TermId, TermKind,
    UserId, TREE_SEPARATOR,
};

use crate::error::{StoreError, StoreResult};
use crate::row::{Cell, Comment, FieldStamp, IdSequence, PermissionRow, RowKind, TermCount, TermRow};
use crate::traits::{
    AssociationStore, CatalogStore, RecordExtras, RecordTable, SharedCaches, TermStore,
    UserDirectory,
};

type AssociationRow = (AssociationKind, RecordId, FieldId, i64);

#[derive(Default)]
struct Sequence {
    /// Highest permanent id handed out.
    max: Option<i64>,
    /// Lowest temporary id handed out (0 when none).
    min: i64,
}

struct RecordRow {
    schema: SchemaId,
    cells: HashMap<String, Cell>,
}

#[derive(Default)]
struct Tables {
    columns: HashMap<SchemaId, BTreeMap<String, ColumnType>>,
    rows: BTreeMap<RecordId, RecordRow>,
}

#[derive(Default)]
struct Extras {
    stamps: HashMap<(RecordId, FieldId), FieldStamp>,
    qualifiers: HashMap<(RecordId, FieldId), QualifierId>,
    ratings: HashMap<RecordId, BTreeMap<UserId, u8>>,
    comments: BTreeMap<i64, Comment>,
}

#[derive(Default)]
struct Caches {
    permissions: HashMap<(RecordId, String), PermissionRow>,
    term_counts: HashMap<TermId, TermCount>,
}

/// In-memory storage backend.
///
/// Intended for tests and embedding. Each table lives behind its own
/// `RwLock`; identifier allocation is serialized by a dedicated `Mutex`.
pub struct InMemoryMetadataStore {
    catalog: RwLock<BTreeMap<(RowKind, i64), Vec<u8>>>,
    sequences: Mutex<HashMap<IdSequence, Sequence>>,
    tables: RwLock<Tables>,
    associations: RwLock<BTreeSet<AssociationRow>>,
    terms: RwLock<BTreeMap<TermId, TermRow>>,
    users: RwLock<BTreeMap<UserId, String>>,
    extras: RwLock<Extras>,
    caches: RwLock<Caches>,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(BTreeMap::new()),
            sequences: Mutex::new(HashMap::new()),
            tables: RwLock::new(Tables::default()),
            associations: RwLock::new(BTreeSet::new()),
            terms: RwLock::new(BTreeMap::new()),
            users: RwLock::new(BTreeMap::new()),
            extras: RwLock::new(Extras::default()),
            caches: RwLock::new(Caches::default()),
        }
    }

    /// Number of association rows of every kind.
    pub fn association_count(&self) -> usize {
        self.associations.read().expect("lock poisoned").len()
    }

    /// Number of persisted permission rows.
    pub fn permission_row_count(&self) -> usize {
        self.caches.read().expect("lock poisoned").permissions.len()
    }

    /// Number of term rows across all fields.
    pub fn term_row_count(&self) -> usize {
        self.terms.read().expect("lock poisoned").len()
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let records = self.tables.read().expect("lock poisoned").rows.len();
        f.debug_struct("InMemoryMetadataStore")
            .field("record_count", &records)
            .field("association_count", &self.association_count())
            .field("term_count", &self.term_row_count())
            .finish()
    }
}

fn first_permanent(sequence: IdSequence) -> i64 {
    match sequence {
        IdSequence::Schema => 0,
        _ => 1,
    }
}

impl CatalogStore for InMemoryMetadataStore {
    fn read_row(&self, kind: RowKind, id: i64) -> StoreResult<Option<Vec<u8>>> {
        let catalog = self.catalog.read().expect("lock poisoned");
        Ok(catalog.get(&(kind, id)).cloned())
    }

    fn write_row(&self, kind: RowKind, id: i64, data: Vec<u8>) -> StoreResult<()> {
        self.catalog
            .write()
            .expect("lock poisoned")
            .insert((kind, id), data);
        Ok(())
    }

    fn delete_row(&self, kind: RowKind, id: i64) -> StoreResult<bool> {
        let mut catalog = self.catalog.write().expect("lock poisoned");
        Ok(catalog.remove(&(kind, id)).is_some())
    }

    fn list_rows(&self, kind: RowKind) -> StoreResult<Vec<(i64, Vec<u8>)>> {
        let catalog = self.catalog.read().expect("lock poisoned");
        Ok(catalog
            .range((kind, i64::MIN)..=(kind, i64::MAX))
            .map(|((_, id), data)| (*id, data.clone()))
            .collect())
    }

    fn allocate_id(&self, sequence: IdSequence, temporary: bool) -> StoreResult<i64> {
        let mut sequences = self.sequences.lock().expect("lock poisoned");
        let state = sequences.entry(sequence).or_default();
        let id = if temporary {
            state.min -= 1;
            state.min
        } else {
            let next = state
                .max
                .map_or(first_permanent(sequence), |max| max + 1);
            state.max = Some(next);
            next
        };
        debug!(?sequence, id, temporary, "allocated id");
        Ok(id)
    }
}

impl RecordTable for InMemoryMetadataStore {
    fn add_column(&self, schema: SchemaId, column: &str, column_type: ColumnType) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let columns = tables.columns.entry(schema).or_default();
        match columns.get(column) {
            Some(existing) if *existing == column_type => Ok(()),
            Some(existing) => Err(StoreError::ColumnConflict {
                schema,
                column: column.to_string(),
                existing: *existing,
                requested: column_type,
            }),
            None => {
                columns.insert(column.to_string(), column_type);
                debug!(%schema, column, ?column_type, "column added");
                Ok(())
            }
        }
    }

    fn drop_column(&self, schema: SchemaId, column: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let existed = tables
            .columns
            .get_mut(&schema)
            .is_some_and(|cols| cols.remove(column).is_some());
        if existed {
            for row in tables.rows.values_mut().filter(|r| r.schema == schema) {
                row.cells.remove(column);
            }
        }
        Ok(existed)
    }

    fn rename_column(&self, schema: SchemaId, from: &str, to: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let columns = tables.columns.entry(schema).or_default();
        let column_type = columns
            .get(from)
            .copied()
            .ok_or_else(|| StoreError::UnknownColumn {
                schema,
                column: from.to_string(),
            })?;
        if let Some(existing) = columns.get(to) {
            return Err(StoreError::ColumnConflict {
                schema,
                column: to.to_string(),
                existing: *existing,
                requested: column_type,
            });
        }
        columns.remove(from);
        columns.insert(to.to_string(), column_type);
        for row in tables.rows.values_mut().filter(|r| r.schema == schema) {
            if let Some(cell) = row.cells.remove(from) {
                row.cells.insert(to.to_string(), cell);
            }
        }
        Ok(())
    }

    fn column_type(&self, schema: SchemaId, column: &str) -> StoreResult<Option<ColumnType>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .columns
            .get(&schema)
            .and_then(|cols| cols.get(column))
            .copied())
    }

    fn insert_record(&self, schema: SchemaId, record: RecordId) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.rows.contains_key(&record) {
            return Err(StoreError::RecordExists(record));
        }
        tables.rows.insert(
            record,
            RecordRow {
                schema,
                cells: HashMap::new(),
            },
        );
        Ok(())
    }

    fn delete_record(&self, record: RecordId) -> StoreResult<bool> {
        let mut tables = self.tables.write().expect("lock poisoned");
        Ok(tables.rows.remove(&record).is_some())
    }

    fn rekey_record(&self, from: RecordId, to: RecordId) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        if tables.rows.contains_key(&to) {
            return Err(StoreError::RecordExists(to));
        }
        let row = tables
            .rows
            .remove(&from)
            .ok_or(StoreError::RecordNotFound(from))?;
        tables.rows.insert(to, row);
        Ok(())
    }

    fn record_schema(&self, record: RecordId) -> StoreResult<Option<SchemaId>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables.rows.get(&record).map(|r| r.schema))
    }

    fn records_in_schema(&self, schema: SchemaId) -> StoreResult<Vec<RecordId>> {
        let tables = self.tables.read().expect("lock poisoned");
        Ok(tables
            .rows
            .iter()
            .filter(|(_, row)| row.schema == schema)
            .map(|(id, _)| *id)
            .collect())
    }

    fn read_cell(&self, record: RecordId, column: &str) -> StoreResult<Cell> {
        let tables = self.tables.read().expect("lock poisoned");
        let row = tables
            .rows
            .get(&record)
            .ok_or(StoreError::RecordNotFound(record))?;
        Ok(row.cells.get(column).cloned().unwrap_or(Cell::Null))
    }

    fn write_cell(&self, record: RecordId, column: &str, cell: Cell) -> StoreResult<()> {
        let mut tables = self.tables.write().expect("lock poisoned");
        let schema = tables
            .rows
            .get(&record)
            .map(|r| r.schema)
            .ok_or(StoreError::RecordNotFound(record))?;
        let column_type = tables
            .columns
            .get(&schema)
            .and_then(|cols| cols.get(column))
            .copied()
            .ok_or_else(|| StoreError::UnknownColumn {
                schema,
                column: column.to_string(),
            })?;
        if !cell.fits(column_type) {
            return Err(StoreError::CellTypeMismatch {
                column: column.to_string(),
                expected: column_type,
            });
        }
        if let Some(row) = tables.rows.get_mut(&record) {
            if cell.is_null() {
                row.cells.remove(column);
            } else {
                row.cells.insert(column.to_string(), cell);
            }
        }
        Ok(())
    }
}

impl AssociationStore for InMemoryMetadataStore {
    fn associations(&self, kind: AssociationKind, record: RecordId, field: FieldId) -> StoreResult<Vec<i64>> {
        let rows = self.associations.read().expect("lock poisoned");
        Ok(rows
            .range((kind, record, field, i64::MIN)..=(kind, record, field, i64::MAX))
            .map(|(_, _, _, target)| *target)
            .collect())
    }

    fn add_association(&self, kind: AssociationKind, record: RecordId, field: FieldId, target: i64) -> StoreResult<bool> {
        let mut rows = self.associations.write().expect("lock poisoned");
        Ok(rows.insert((kind, record, field, target)))
    }

    fn remove_association(&self, kind: AssociationKind, record: RecordId, field: FieldId, target: i64) -> StoreResult<bool> {
        let mut rows = self.associations.write().expect("lock poisoned");
        Ok(rows.remove(&(kind, record, field, target)))
    }

    fn clear_associations(&self, kind: AssociationKind, record: RecordId, field: FieldId) -> StoreResult<Vec<i64>> {
        let mut rows = self.associations.write().expect("lock poisoned");
        let doomed: Vec<AssociationRow> = rows
            .range((kind, record, field, i64::MIN)..=(kind, record, field, i64::MAX))
            .copied()
            .collect();
        for row in &doomed {
            rows.remove(row);
        }
        Ok(doomed.into_iter().map(|(_, _, _, target)| target).collect())
    }

    fn records_with_target(&self, kind: AssociationKind, field: Option<FieldId>, target: i64) -> StoreResult<Vec<RecordId>> {
        let rows = self.associations.read().expect("lock poisoned");
        let found: BTreeSet<RecordId> = rows
            .iter()
            .filter(|(k, _, f, t)| *k == kind && *t == target && field.map_or(true, |want| want == *f))
            .map(|(_, record, _, _)| *record)
            .collect();
        Ok(found.into_iter().collect())
    }

    fn field_associations(&self, kind: AssociationKind, field: FieldId) -> StoreResult<Vec<(RecordId, i64)>> {
        let rows = self.associations.read().expect("lock poisoned");
        Ok(rows
            .iter()
            .filter(|(k, _, f, _)| *k == kind && *f == field)
            .map(|(_, record, _, target)| (*record, *target))
            .collect())
    }

    fn rekey_field_associations(&self, from: FieldId, to: FieldId) -> StoreResult<usize> {
        let mut rows = self.associations.write().expect("lock poisoned");
        let moving: Vec<AssociationRow> = rows.iter().filter(|r| r.2 == from).copied().collect();
        for row in &moving {
            rows.remove(row);
            rows.insert((row.0, row.1, to, row.3));
        }
        Ok(moving.len())
    }

    fn delete_field_associations(&self, kind: AssociationKind, field: FieldId) -> StoreResult<usize> {
        let mut rows = self.associations.write().expect("lock poisoned");
        let before = rows.len();
        rows.retain(|(k, _, f, _)| !(*k == kind && *f == field));
        Ok(before - rows.len())
    }

    fn rekey_record_associations(&self, from: RecordId, to: RecordId) -> StoreResult<usize> {
        let mut rows = self.associations.write().expect("lock poisoned");
        let moving: Vec<AssociationRow> = rows.iter().filter(|r| r.1 == from).copied().collect();
        for row in &moving {
            rows.remove(row);
            rows.insert((row.0, to, row.2, row.3));
        }
        Ok(moving.len())
    }

    fn delete_record_associations(&self, record: RecordId) -> StoreResult<Vec<(AssociationKind, FieldId, i64)>> {
        let mut rows = self.associations.write().expect("lock poisoned");
        let mut owned = Vec::new();
        rows.retain(|(kind, rec, field, target)| {
            if *rec == record {
                owned.push((*kind, *field, *target));
                false
            } else {
                !(*kind == AssociationKind::Reference && *target == record.0)
            }
        });
        Ok(owned)
    }
}

impl TermStore for InMemoryMetadataStore {
    fn create_term(&self, field: FieldId, kind: TermKind, segment: &str, parent: Option<TermId>) -> StoreResult<TermId> {
        let prefix = match parent {
            Some(parent_id) => {
                let terms = self.terms.read().expect("lock poisoned");
                let parent_row = terms
                    .get(&parent_id)
                    .ok_or(StoreError::TermNotFound(parent_id))?;
                Some(parent_row.name.clone())
            }
            None => None,
        };
        let id = TermId(self.allocate_id(IdSequence::Term, false)?);
        let name = match prefix {
            Some(prefix) => format!("{prefix}{TREE_SEPARATOR}{segment}"),
            None => segment.to_string(),
        };
        let row = TermRow {
            id,
            field,
            kind,
            name,
            segment: segment.to_string(),
            parent,
            qualifier: None,
            variants: Vec::new(),
        };
        self.terms.write().expect("lock poisoned").insert(id, row);
        Ok(id)
    }

    fn term(&self, id: TermId) -> StoreResult<Option<TermRow>> {
        Ok(self.terms.read().expect("lock poisoned").get(&id).cloned())
    }

    fn resolve_term(&self, field: FieldId, name: &str) -> StoreResult<Option<TermId>> {
        let wanted = name.trim().to_lowercase();
        let terms = self.terms.read().expect("lock poisoned");
        let by_name = terms
            .values()
            .find(|t| t.field == field && t.name.to_lowercase() == wanted);
        let found = by_name.or_else(|| {
            terms.values().find(|t| {
                t.field == field && t.variants.iter().any(|v| v.to_lowercase() == wanted)
            })
        });
        Ok(found.map(|t| t.id))
    }

    fn terms_for_field(&self, field: FieldId) -> StoreResult<Vec<TermRow>> {
        let terms = self.terms.read().expect("lock poisoned");
        Ok(terms.values().filter(|t| t.field == field).cloned().collect())
    }

    fn update_term(&self, row: TermRow) -> StoreResult<()> {
        let mut terms = self.terms.write().expect("lock poisoned");
        match terms.get_mut(&row.id) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(StoreError::TermNotFound(row.id)),
        }
    }

    fn delete_term(&self, id: TermId) -> StoreResult<bool> {
        let removed = self.terms.write().expect("lock poisoned").remove(&id).is_some();
        if removed {
            self.caches
                .write()
                .expect("lock poisoned")
                .term_counts
                .remove(&id);
        }
        Ok(removed)
    }

    fn rekey_field_terms(&self, from: FieldId, to: FieldId) -> StoreResult<usize> {
        let mut terms = self.terms.write().expect("lock poisoned");
        let mut moved = 0;
        for term in terms.values_mut().filter(|t| t.field == from) {
            term.field = to;
            moved += 1;
        }
        Ok(moved)
    }

    fn delete_field_terms(&self, field: FieldId) -> StoreResult<Vec<TermId>> {
        let mut terms = self.terms.write().expect("lock poisoned");
        let doomed: Vec<TermId> = terms
            .values()
            .filter(|t| t.field == field)
            .map(|t| t.id)
            .collect();
        for id in &doomed {
            terms.remove(id);
        }
        drop(terms);
        let mut caches = self.caches.write().expect("lock poisoned");
        for id in &doomed {
            caches.term_counts.remove(id);
        }
        Ok(doomed)
    }
}

impl UserDirectory for InMemoryMetadataStore {
    fn register_user(&self, id: UserId, name: &str) -> StoreResult<()> {
        self.users
            .write()
            .expect("lock poisoned")
            .insert(id, name.to_string());
        Ok(())
    }

    fn user_name(&self, id: UserId) -> StoreResult<Option<String>> {
        Ok(self.users.read().expect("lock poisoned").get(&id).cloned())
    }

    fn resolve_user(&self, name: &str) -> StoreResult<Option<UserId>> {
        let wanted = name.trim().to_lowercase();
        let users = self.users.read().expect("lock poisoned");
        Ok(users
            .iter()
            .find(|(_, n)| n.to_lowercase() == wanted)
            .map(|(id, _)| *id))
    }
}

impl RecordExtras for InMemoryMetadataStore {
    fn set_field_stamp(&self, record: RecordId, field: FieldId, stamp: FieldStamp) -> StoreResult<()> {
        self.extras
            .write()
            .expect("lock poisoned")
            .stamps
            .insert((record, field), stamp);
        Ok(())
    }

    fn field_stamp(&self, record: RecordId, field: FieldId) -> StoreResult<Option<FieldStamp>> {
        let extras = self.extras.read().expect("lock poisoned");
        Ok(extras.stamps.get(&(record, field)).copied())
    }

    fn set_record_qualifier(&self, record: RecordId, field: FieldId, qualifier: Option<QualifierId>) -> StoreResult<()> {
        let mut extras = self.extras.write().expect("lock poisoned");
        match qualifier {
            Some(q) => extras.qualifiers.insert((record, field), q),
            None => extras.qualifiers.remove(&(record, field)),
        };
        Ok(())
    }

    fn record_qualifier(&self, record: RecordId, field: FieldId) -> StoreResult<Option<QualifierId>> {
        let extras = self.extras.read().expect("lock poisoned");
        Ok(extras.qualifiers.get(&(record, field)).copied())
    }

    fn set_rating(&self, record: RecordId, user: UserId, score: u8) -> StoreResult<()> {
        self.extras
            .write()
            .expect("lock poisoned")
            .ratings
            .entry(record)
            .or_default()
            .insert(user, score);
        Ok(())
    }

    fn ratings(&self, record: RecordId) -> StoreResult<BTreeMap<UserId, u8>> {
        let extras = self.extras.read().expect("lock poisoned");
        Ok(extras.ratings.get(&record).cloned().unwrap_or_default())
    }

    fn add_comment(&self, record: RecordId, user: UserId, at: DateTime<Utc>, text: &str) -> StoreResult<Comment> {
        let id = self.allocate_id(IdSequence::Comment, false)?;
        let comment = Comment {
            id,
            record,
            user,
            at,
            text: text.to_string(),
        };
        self.extras
            .write()
            .expect("lock poisoned")
            .comments
            .insert(id, comment.clone());
        Ok(comment)
    }

    fn comments(&self, record: RecordId) -> StoreResult<Vec<Comment>> {
        let extras = self.extras.read().expect("lock poisoned");
        Ok(extras
            .comments
            .values()
            .filter(|c| c.record == record)
            .cloned()
            .collect())
    }

    fn delete_field_extras(&self, field: FieldId) -> StoreResult<()> {
        let mut extras = self.extras.write().expect("lock poisoned");
        extras.stamps.retain(|(_, f), _| *f != field);
        extras.qualifiers.retain(|(_, f), _| *f != field);
        Ok(())
    }

    fn rekey_record_extras(&self, from: RecordId, to: RecordId) -> StoreResult<()> {
        let mut extras = self.extras.write().expect("lock poisoned");
        let stamps: Vec<_> = extras
            .stamps
            .iter()
            .filter(|((r, _), _)| *r == from)
            .map(|((_, f), s)| (*f, *s))
            .collect();
        extras.stamps.retain(|(r, _), _| *r != from);
        for (field, stamp) in stamps {
            extras.stamps.insert((to, field), stamp);
        }
        let qualifiers: Vec<_> = extras
            .qualifiers
            .iter()
            .filter(|((r, _), _)| *r == from)
            .map(|((_, f), q)| (*f, *q))
            .collect();
        extras.qualifiers.retain(|(r, _), _| *r != from);
        for (field, qualifier) in qualifiers {
            extras.qualifiers.insert((to, field), qualifier);
        }
        if let Some(ratings) = extras.ratings.remove(&from) {
            extras.ratings.insert(to, ratings);
        }
        for comment in extras.comments.values_mut().filter(|c| c.record == from) {
            comment.record = to;
        }
        Ok(())
    }

    fn delete_record_extras(&self, record: RecordId) -> StoreResult<()> {
        let mut extras = self.extras.write().expect("lock poisoned");
        extras.stamps.retain(|(r, _), _| *r != record);
        extras.qualifiers.retain(|(r, _), _| *r != record);
        extras.ratings.remove(&record);
        extras.comments.retain(|_, c| c.record != record);
        Ok(())
    }
}

impl SharedCaches for InMemoryMetadataStore {
    fn permission(&self, record: RecordId, class_key: &str) -> StoreResult<Option<PermissionRow>> {
        let caches = self.caches.read().expect("lock poisoned");
        Ok(caches
            .permissions
            .get(&(record, class_key.to_string()))
            .copied())
    }

    fn set_permission(&self, record: RecordId, class_key: &str, row: PermissionRow) -> StoreResult<()> {
        self.caches
            .write()
            .expect("lock poisoned")
            .permissions
            .insert((record, class_key.to_string()), row);
        Ok(())
    }

    fn clear_record_permissions(&self, record: RecordId) -> StoreResult<usize> {
        let mut caches = self.caches.write().expect("lock poisoned");
        let before = caches.permissions.len();
        caches.permissions.retain(|(r, _), _| *r != record);
        Ok(before - caches.permissions.len())
    }

    fn clear_all_permissions(&self) -> StoreResult<usize> {
        let mut caches = self.caches.write().expect("lock poisoned");
        let removed = caches.permissions.len();
        caches.permissions.clear();
        Ok(removed)
    }

    fn term_count(&self, term: TermId) -> StoreResult<TermCount> {
        let caches = self.caches.read().expect("lock poisoned");
        Ok(caches.term_counts.get(&term).copied().unwrap_or_default())
    }

    fn set_term_count(&self, term: TermId, count: TermCount) -> StoreResult<()> {
        self.caches
            .write()
            .expect("lock poisoned")
            .term_counts
            .insert(term, count);
        Ok(())
    }
}
