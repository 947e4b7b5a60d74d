//! Field type conversion.
//!
//! A conversion is planned as a [`MigrationPlan`]: an ordered list of
//! [`MigrationStep`]s, each able to undo itself. [`TypeConverter::execute`]
//! runs the main steps, commits the retyped descriptor, then runs the
//! cleanup steps that discard the old layout. If a main step or the commit
//! fails, every completed step is undone in reverse order and the field is
//! left exactly as it was.
//!
//! Supported pairs:
//!
//! | From | To | Migration |
//! |------|----|-----------|
//! | Date | Timestamp | Begin becomes the timestamp |
//! | Timestamp | Date | the timestamp becomes Begin and End |
//! | ControlledName, Option | Tree | terms re-created as tree terms, associations rewritten |
//! | Tree | ControlledName, Option | full tree names become flat terms, associations rewritten |
//! | same storage class | | layout verified, no value migration |
//!
//! Any other pair is rejected before anything is touched.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use folio_store::{
    AssociationStore, Cell, MetadataStore, RecordTable, SharedCaches, TermCount, TermStore,
};
use folio_types::{
    AssociationKind, ColumnType, DatePrecision, FieldId, FieldType, RecordId, SchemaId,
    StorageClass, TermId, TermKind, TREE_SEPARATOR,
};

use crate::descriptor::{DefaultValue, FieldDescriptor};
use crate::error::{SchemaError, SchemaResult};
use crate::names;
use crate::registry::tree_segments;

/// Rough size of one association row in a rewrite statement.
const ASSOCIATION_ROW_BYTES: usize = 48;

/// Bounds on batched rewrites.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Upper bound on the size of one rewrite statement.
    pub max_statement_bytes: usize,
    /// Upper bound on rows touched by one rewrite statement.
    pub max_batch_rows: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            max_statement_bytes: 1 << 20,
            max_batch_rows: 5_000,
        }
    }
}

impl ConverterConfig {
    /// Rows per rewrite batch, never zero.
    pub fn batch_rows(&self) -> usize {
        (self.max_statement_bytes / ASSOCIATION_ROW_BYTES)
            .min(self.max_batch_rows)
            .max(1)
    }
}

/// Which migration a supported pair needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionRule {
    /// Same physical layout; only the type changes.
    Relabel,
    DateToTimestamp,
    TimestampToDate,
    FlatToTree,
    TreeToFlat,
}

impl ConversionRule {
    /// The rule for a pair, or `None` if the pair is unsupported.
    pub fn between(from: FieldType, to: FieldType) -> Option<Self> {
        use FieldType as T;
        match (from, to) {
            (T::Date, T::Timestamp) => Some(Self::DateToTimestamp),
            (T::Timestamp, T::Date) => Some(Self::TimestampToDate),
            (T::ControlledName | T::Option, T::Tree) => Some(Self::FlatToTree),
            (T::Tree, T::ControlledName | T::Option) => Some(Self::TreeToFlat),
            (from, to) => match (from.storage_class(), to.storage_class()) {
                (StorageClass::TextColumn, StorageClass::TextColumn)
                | (StorageClass::FlatTerms, StorageClass::FlatTerms) => Some(Self::Relabel),
                _ => None,
            },
        }
    }
}

/// One reversible step of a conversion.
#[derive(Clone, Debug, PartialEq)]
pub enum MigrationStep {
    /// Check that existing columns have the expected physical types.
    VerifyColumns {
        schema: SchemaId,
        columns: Vec<(String, ColumnType)>,
    },
    /// Allocate the target layout's columns.
    AddColumns {
        schema: SchemaId,
        columns: Vec<(String, ColumnType)>,
    },
    /// Copy each record's date Begin into the new timestamp column.
    CopyDateBegin {
        schema: SchemaId,
        begin_column: String,
        to_column: String,
    },
    /// Write each record's timestamp into the new Begin, End and Precision
    /// columns.
    SpreadTimestamp {
        schema: SchemaId,
        from_column: String,
        storage_name: String,
    },
    /// Create a term of the target kind for every term of the field.
    RecreateTerms { field: FieldId, kind: TermKind },
    /// Point every record at the re-created terms, in bounded batches.
    RewriteTermAssociations { field: FieldId },
    /// Map term ids in the default value to the re-created terms.
    RemapDefault,
    Retype { to: FieldType },
    /// Cleanup: drop the old layout's columns.
    DropColumns { schema: SchemaId, columns: Vec<String> },
    /// Cleanup: delete the terms that were re-created.
    DeleteOldTerms,
}

impl MigrationStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::VerifyColumns { .. } => "verify-columns",
            Self::AddColumns { .. } => "add-columns",
            Self::CopyDateBegin { .. } => "copy-date-begin",
            Self::SpreadTimestamp { .. } => "spread-timestamp",
            Self::RecreateTerms { .. } => "recreate-terms",
            Self::RewriteTermAssociations { .. } => "rewrite-term-associations",
            Self::RemapDefault => "remap-default",
            Self::Retype { .. } => "retype",
            Self::DropColumns { .. } => "drop-columns",
            Self::DeleteOldTerms => "delete-old-terms",
        }
    }

    /// Cleanup steps run after the commit and are never undone.
    pub fn is_cleanup(&self) -> bool {
        matches!(self, Self::DropColumns { .. } | Self::DeleteOldTerms)
    }

    fn apply(&self, ctx: &mut MigrationContext<'_>) -> SchemaResult<()> {
        let store = ctx.store;
        match self {
            Self::VerifyColumns { schema, columns } => {
                for (column, expected) in columns {
                    match store.column_type(*schema, column)? {
                        Some(actual) if actual == *expected => {}
                        other => {
                            return Err(SchemaError::SchemaConflict(format!(
                                "column {column} is {other:?}, expected {expected:?}"
                            )))
                        }
                    }
                }
            }
            Self::AddColumns { schema, columns } => {
                for (column, column_type) in columns {
                    match store.column_type(*schema, column)? {
                        None => {
                            store.add_column(*schema, column, *column_type)?;
                            ctx.created_columns.push((*schema, column.clone()));
                        }
                        // Left behind by an interrupted run; the copy step
                        // overwrites it.
                        Some(existing) if existing == *column_type => {}
                        Some(existing) => {
                            return Err(SchemaError::SchemaConflict(format!(
                                "column {column} already exists as {existing:?}"
                            )))
                        }
                    }
                }
            }
            Self::CopyDateBegin {
                schema,
                begin_column,
                to_column,
            } => {
                for record in store.records_in_schema(*schema)? {
                    let cell = match store.read_cell(record, begin_column)? {
                        Cell::DateTime(at) => Cell::DateTime(at),
                        _ => Cell::Null,
                    };
                    store.write_cell(record, to_column, cell)?;
                }
            }
            Self::SpreadTimestamp {
                schema,
                from_column,
                storage_name,
            } => {
                let columns = names::columns(storage_name, FieldType::Date);
                for record in store.records_in_schema(*schema)? {
                    let cells = match store.read_cell(record, from_column)? {
                        Cell::DateTime(at) => [
                            Cell::DateTime(at),
                            Cell::DateTime(at),
                            Cell::Integer(DatePrecision::Second.code()),
                        ],
                        _ => [Cell::Null, Cell::Null, Cell::Null],
                    };
                    for ((column, _), cell) in columns.iter().zip(cells) {
                        store.write_cell(record, column, cell)?;
                    }
                }
            }
            Self::RecreateTerms { field, kind } => recreate_terms(ctx, *field, *kind)?,
            Self::RewriteTermAssociations { field } => {
                let pending: Vec<(RecordId, TermId, TermId)> = store
                    .field_associations(AssociationKind::Term, *field)?
                    .into_iter()
                    .filter_map(|(record, term)| {
                        ctx.term_map
                            .get(&TermId(term))
                            .map(|new| (record, TermId(term), *new))
                    })
                    .collect();
                for batch in pending.chunks(ctx.batch_rows) {
                    for (record, old, new) in batch {
                        store.add_association(AssociationKind::Term, *record, *field, new.get())?;
                        store.remove_association(AssociationKind::Term, *record, *field, old.get())?;
                        ctx.rewritten.push((*record, *old, *new));
                    }
                    debug!(field = %field, rows = batch.len(), "rewrote term association batch");
                }
            }
            Self::RemapDefault => {
                if let Some(DefaultValue::Terms(ids)) = &ctx.descriptor.default {
                    let mut mapped: Vec<TermId> =
                        ids.iter().filter_map(|id| ctx.term_map.get(id).copied()).collect();
                    mapped.dedup();
                    ctx.descriptor.default = (!mapped.is_empty()).then_some(DefaultValue::Terms(mapped));
                }
            }
            Self::Retype { to } => {
                let from = ctx.descriptor.field_type;
                ctx.descriptor.retype(*to);
                if from.always_multiple() && to.has_configurable_multiplicity() {
                    ctx.descriptor.config.allow_multiple = true;
                }
            }
            Self::DropColumns { schema, columns } => {
                for column in columns {
                    store.drop_column(*schema, column)?;
                }
            }
            Self::DeleteOldTerms => {
                for old in ctx.term_map.keys() {
                    store.delete_term(*old)?;
                }
            }
        }
        Ok(())
    }

    fn undo(&self, ctx: &mut MigrationContext<'_>) -> SchemaResult<()> {
        let store = ctx.store;
        match self {
            Self::AddColumns { .. } => {
                for (schema, column) in ctx.created_columns.drain(..) {
                    store.drop_column(schema, &column)?;
                }
            }
            Self::RecreateTerms { .. } => {
                for term in ctx.created_terms.drain(..) {
                    store.delete_term(term)?;
                }
                ctx.term_map.clear();
            }
            Self::RewriteTermAssociations { field } => {
                for (record, old, new) in ctx.rewritten.drain(..).rev() {
                    store.add_association(AssociationKind::Term, record, *field, old.get())?;
                    store.remove_association(AssociationKind::Term, record, *field, new.get())?;
                }
            }
            Self::RemapDefault => ctx.descriptor.default = ctx.original.default.clone(),
            Self::Retype { .. } => {
                ctx.descriptor.field_type = ctx.original.field_type;
                ctx.descriptor.config = ctx.original.config.clone();
                ctx.descriptor.default = ctx.original.default.clone();
            }
            Self::VerifyColumns { .. }
            | Self::CopyDateBegin { .. }
            | Self::SpreadTimestamp { .. }
            | Self::DropColumns { .. }
            | Self::DeleteOldTerms => {}
        }
        Ok(())
    }
}

/// Working state shared by the steps of one execution.
struct MigrationContext<'a> {
    store: &'a dyn MetadataStore,
    batch_rows: usize,
    original: FieldDescriptor,
    descriptor: FieldDescriptor,
    term_map: BTreeMap<TermId, TermId>,
    created_terms: Vec<TermId>,
    created_columns: Vec<(SchemaId, String)>,
    rewritten: Vec<(RecordId, TermId, TermId)>,
}

fn recreate_terms(ctx: &mut MigrationContext<'_>, field: FieldId, kind: TermKind) -> SchemaResult<()> {
    let store = ctx.store;
    let (reused, old_terms): (Vec<_>, Vec<_>) = store
        .terms_for_field(field)?
        .into_iter()
        .partition(|t| t.kind == kind);
    // Lowercased full name to the re-created term. Terms of the target kind
    // are left over from an interrupted run and are reused, not duplicated.
    let mut created: HashMap<String, TermId> = reused
        .iter()
        .map(|t| (t.name.to_lowercase(), t.id))
        .collect();
    // New terms whose count has been set during this run.
    let mut counted: HashSet<TermId> = HashSet::new();

    for old in old_terms {
        let new = match kind {
            TermKind::Flat => {
                let key = old.name.to_lowercase();
                match created.get(&key) {
                    Some(id) => *id,
                    None => {
                        let id = store.create_term(field, TermKind::Flat, old.name.trim(), None)?;
                        ctx.created_terms.push(id);
                        created.insert(key, id);
                        id
                    }
                }
            }
            TermKind::Hierarchical => {
                let mut segments = tree_segments(&old.name);
                if segments.is_empty() {
                    segments.push(old.name.trim());
                }
                let mut parent = None;
                let mut path = String::new();
                for segment in segments {
                    if !path.is_empty() {
                        path.push_str(TREE_SEPARATOR);
                    }
                    path.push_str(segment);
                    let key = path.to_lowercase();
                    let id = match created.get(&key) {
                        Some(id) => *id,
                        None => {
                            let id = store.create_term(field, TermKind::Hierarchical, segment, parent)?;
                            ctx.created_terms.push(id);
                            created.insert(key, id);
                            id
                        }
                    };
                    parent = Some(id);
                }
                // segments is never empty, so parent is set.
                match parent {
                    Some(id) => id,
                    None => continue,
                }
            }
        };

        if !old.variants.is_empty() || old.qualifier.is_some() {
            if let Some(mut row) = store.term(new)? {
                for variant in old.variants {
                    if !row.variants.iter().any(|v| v.eq_ignore_ascii_case(&variant)) {
                        row.variants.push(variant);
                    }
                }
                row.qualifier = row.qualifier.or(old.qualifier);
                store.update_term(row)?;
            }
        }

        // The first old term overwrites whatever an earlier run merged in.
        let old_count = store.term_count(old.id)?;
        let mut count = if counted.insert(new) {
            TermCount::default()
        } else {
            store.term_count(new)?
        };
        count.total += old_count.total;
        count.public += old_count.public;
        store.set_term_count(new, count)?;
        ctx.term_map.insert(old.id, new);
    }
    debug!(
        field = %field,
        mapped = ctx.term_map.len(),
        created = ctx.created_terms.len(),
        reused = reused.len(),
        "re-created terms"
    );
    Ok(())
}

/// An ordered list of steps converting one field to a new type.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationPlan {
    pub field: FieldId,
    pub from: FieldType,
    pub to: FieldType,
    pub rule: ConversionRule,
    pub steps: Vec<MigrationStep>,
}

/// Plans and runs field type conversions.
#[derive(Clone, Debug, Default)]
pub struct TypeConverter {
    config: ConverterConfig,
}

impl TypeConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Plan a conversion. Fails with `UnsupportedConversion` for pairs
    /// without a rule.
    pub fn plan(&self, field: &FieldDescriptor, to: FieldType) -> SchemaResult<MigrationPlan> {
        let from = field.field_type;
        let rule = ConversionRule::between(from, to)
            .filter(|_| from != to)
            .ok_or(SchemaError::UnsupportedConversion { from, to })?;
        let permanent = !field.is_temporary();
        let schema = field.schema;
        let mut steps = Vec::new();

        match rule {
            ConversionRule::Relabel => {
                let columns = names::columns(&field.storage_name, to);
                if permanent && !columns.is_empty() {
                    steps.push(MigrationStep::VerifyColumns { schema, columns });
                }
                steps.push(MigrationStep::Retype { to });
            }
            ConversionRule::DateToTimestamp | ConversionRule::TimestampToDate => {
                if permanent {
                    let old_columns: Vec<String> =
                        field.columns().into_iter().map(|(c, _)| c).collect();
                    let new_columns = names::columns(&field.storage_name, to);
                    steps.push(MigrationStep::AddColumns {
                        schema,
                        columns: new_columns.clone(),
                    });
                    steps.push(if rule == ConversionRule::DateToTimestamp {
                        MigrationStep::CopyDateBegin {
                            schema,
                            begin_column: old_columns[0].clone(),
                            to_column: new_columns[0].0.clone(),
                        }
                    } else {
                        MigrationStep::SpreadTimestamp {
                            schema,
                            from_column: old_columns[0].clone(),
                            storage_name: field.storage_name.clone(),
                        }
                    });
                    steps.push(MigrationStep::Retype { to });
                    steps.push(MigrationStep::DropColumns {
                        schema,
                        columns: old_columns,
                    });
                } else {
                    steps.push(MigrationStep::Retype { to });
                }
            }
            ConversionRule::FlatToTree | ConversionRule::TreeToFlat => {
                let kind = if rule == ConversionRule::FlatToTree {
                    TermKind::Hierarchical
                } else {
                    TermKind::Flat
                };
                steps.push(MigrationStep::RecreateTerms { field: field.id, kind });
                steps.push(MigrationStep::RewriteTermAssociations { field: field.id });
                steps.push(MigrationStep::RemapDefault);
                steps.push(MigrationStep::Retype { to });
                steps.push(MigrationStep::DeleteOldTerms);
            }
        }

        Ok(MigrationPlan {
            field: field.id,
            from,
            to,
            rule,
            steps,
        })
    }

    /// Run a plan against `field`.
    ///
    /// `commit` persists the converted descriptor. It runs after every main
    /// step has succeeded and before cleanup; if it fails the conversion is
    /// rolled back.
    pub fn execute<F>(
        &self,
        plan: &MigrationPlan,
        store: &dyn MetadataStore,
        field: &FieldDescriptor,
        commit: F,
    ) -> SchemaResult<FieldDescriptor>
    where
        F: FnOnce(&FieldDescriptor) -> SchemaResult<()>,
    {
        info!(
            field = %plan.field,
            from = %plan.from,
            to = %plan.to,
            rule = ?plan.rule,
            steps = plan.steps.len(),
            "converting field type"
        );
        let mut ctx = MigrationContext {
            store,
            batch_rows: self.config.batch_rows(),
            original: field.clone(),
            descriptor: field.clone(),
            term_map: BTreeMap::new(),
            created_terms: Vec::new(),
            created_columns: Vec::new(),
            rewritten: Vec::new(),
        };
        let (main, cleanup): (Vec<&MigrationStep>, Vec<&MigrationStep>) =
            plan.steps.iter().partition(|s| !s.is_cleanup());

        let mut completed: Vec<&MigrationStep> = Vec::with_capacity(main.len());
        let mut outcome = Ok(());
        for step in main {
            debug!(field = %plan.field, step = step.name(), "applying migration step");
            if let Err(e) = step.apply(&mut ctx) {
                outcome = Err(e);
                break;
            }
            completed.push(step);
        }
        if outcome.is_ok() {
            outcome = commit(&ctx.descriptor);
        }
        if let Err(e) = outcome {
            warn!(field = %plan.field, error = %e, undone = completed.len(), "conversion failed, rolling back");
            for step in completed.into_iter().rev() {
                if let Err(undo_err) = step.undo(&mut ctx) {
                    warn!(field = %plan.field, step = step.name(), error = %undo_err, "undo failed");
                }
            }
            return Err(e);
        }

        for step in cleanup {
            debug!(field = %plan.field, step = step.name(), "applying cleanup step");
            // The conversion has committed; leftovers are unreachable.
            if let Err(e) = step.apply(&mut ctx) {
                warn!(field = %plan.field, step = step.name(), error = %e, "cleanup step failed");
            }
        }
        info!(field = %plan.field, to = %plan.to, rewritten = ctx.rewritten.len(), "field type converted");
        Ok(ctx.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use folio_store::InMemoryMetadataStore;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn permanent(id: i32, field_type: FieldType, name: &str) -> FieldDescriptor {
        FieldDescriptor::new_temporary(FieldId(id), SchemaId(0), field_type, name, 1).unwrap()
    }

    fn allocate(store: &InMemoryMetadataStore, field: &FieldDescriptor) {
        for (column, column_type) in field.columns() {
            store.add_column(field.schema, &column, column_type).unwrap();
        }
    }

    fn flat_field_with_values(store: &InMemoryMetadataStore) -> (FieldDescriptor, TermId, TermId) {
        let field = permanent(4, FieldType::ControlledName, "Keywords");
        let alpha = store.create_term(field.id, TermKind::Flat, "Alpha", None).unwrap();
        let beta = store.create_term(field.id, TermKind::Flat, "Beta", None).unwrap();
        store.insert_record(SchemaId(0), RecordId(1)).unwrap();
        store.insert_record(SchemaId(0), RecordId(2)).unwrap();
        store.add_association(AssociationKind::Term, RecordId(1), field.id, alpha.get()).unwrap();
        store.add_association(AssociationKind::Term, RecordId(1), field.id, beta.get()).unwrap();
        store.add_association(AssociationKind::Term, RecordId(2), field.id, beta.get()).unwrap();
        (field, alpha, beta)
    }

    fn names_of(store: &InMemoryMetadataStore, field: FieldId, record: RecordId) -> Vec<String> {
        let mut names: Vec<String> = store
            .associations(AssociationKind::Term, record, field)
            .unwrap()
            .into_iter()
            .map(|id| store.term(TermId(id)).unwrap().unwrap().name)
            .collect();
        names.sort();
        names
    }

    fn convert(
        store: &InMemoryMetadataStore,
        converter: &TypeConverter,
        field: &FieldDescriptor,
        to: FieldType,
    ) -> FieldDescriptor {
        let plan = converter.plan(field, to).unwrap();
        converter.execute(&plan, store, field, |_| Ok(())).unwrap()
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    #[test]
    fn unlisted_pairs_are_unsupported() {
        assert_eq!(ConversionRule::between(FieldType::Text, FieldType::Number), None);
        assert_eq!(ConversionRule::between(FieldType::Timestamp, FieldType::Number), None);
        assert_eq!(ConversionRule::between(FieldType::User, FieldType::Reference), None);
        assert_eq!(
            ConversionRule::between(FieldType::Url, FieldType::Paragraph),
            Some(ConversionRule::Relabel)
        );
        assert_eq!(
            ConversionRule::between(FieldType::Option, FieldType::Tree),
            Some(ConversionRule::FlatToTree)
        );

        let field = permanent(1, FieldType::Text, "Title");
        assert!(matches!(
            TypeConverter::default().plan(&field, FieldType::Number),
            Err(SchemaError::UnsupportedConversion {
                from: FieldType::Text,
                to: FieldType::Number
            })
        ));
    }

    #[test]
    fn batch_rows_respect_both_bounds() {
        let config = ConverterConfig {
            max_statement_bytes: 480,
            max_batch_rows: 100,
        };
        assert_eq!(config.batch_rows(), 10);
        let tiny = ConverterConfig {
            max_statement_bytes: 1,
            max_batch_rows: 100,
        };
        assert_eq!(tiny.batch_rows(), 1);
    }

    // ------------------------------------------------------------------
    // Column migrations
    // ------------------------------------------------------------------

    #[test]
    fn relabel_verifies_layout() {
        let store = InMemoryMetadataStore::new();
        let field = permanent(1, FieldType::Text, "Title");
        let converter = TypeConverter::default();
        let plan = converter.plan(&field, FieldType::Paragraph).unwrap();
        // Column never allocated.
        assert!(matches!(
            converter.execute(&plan, &store, &field, |_| Ok(())),
            Err(SchemaError::SchemaConflict(_))
        ));

        allocate(&store, &field);
        let converted = converter.execute(&plan, &store, &field, |_| Ok(())).unwrap();
        assert_eq!(converted.field_type, FieldType::Paragraph);
    }

    #[test]
    fn date_to_timestamp_moves_begin() {
        let store = InMemoryMetadataStore::new();
        let field = permanent(2, FieldType::Date, "Made");
        allocate(&store, &field);
        store.insert_record(SchemaId(0), RecordId(1)).unwrap();
        store.insert_record(SchemaId(0), RecordId(2)).unwrap();
        let at = Utc.with_ymd_and_hms(1999, 5, 1, 0, 0, 0).unwrap();
        store.write_cell(RecordId(1), "MadeBegin", Cell::DateTime(at)).unwrap();

        let converted = convert(&store, &TypeConverter::default(), &field, FieldType::Timestamp);
        assert_eq!(converted.field_type, FieldType::Timestamp);
        assert_eq!(store.read_cell(RecordId(1), "Made").unwrap(), Cell::DateTime(at));
        assert_eq!(store.read_cell(RecordId(2), "Made").unwrap(), Cell::Null);
        assert_eq!(store.column_type(SchemaId(0), "MadeBegin").unwrap(), None);
        assert_eq!(store.column_type(SchemaId(0), "MadePrecision").unwrap(), None);
    }

    #[test]
    fn timestamp_to_date_fills_all_three_columns() {
        let store = InMemoryMetadataStore::new();
        let field = permanent(3, FieldType::Timestamp, "Seen");
        allocate(&store, &field);
        store.insert_record(SchemaId(0), RecordId(1)).unwrap();
        let at = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        store.write_cell(RecordId(1), "Seen", Cell::DateTime(at)).unwrap();

        convert(&store, &TypeConverter::default(), &field, FieldType::Date);
        assert_eq!(store.read_cell(RecordId(1), "SeenBegin").unwrap(), Cell::DateTime(at));
        assert_eq!(store.read_cell(RecordId(1), "SeenEnd").unwrap(), Cell::DateTime(at));
        assert_eq!(
            store.read_cell(RecordId(1), "SeenPrecision").unwrap(),
            Cell::Integer(DatePrecision::Second.code())
        );
        assert_eq!(store.column_type(SchemaId(0), "Seen").unwrap(), None);
    }

    // ------------------------------------------------------------------
    // Term migrations
    // ------------------------------------------------------------------

    #[test]
    fn controlled_name_to_tree_and_back_keeps_text() {
        let store = InMemoryMetadataStore::new();
        let (field, _, beta) = flat_field_with_values(&store);
        let mut field = field;
        field.default = Some(DefaultValue::Terms(vec![beta]));
        let converter = TypeConverter::new(ConverterConfig {
            max_statement_bytes: 48,
            max_batch_rows: 10,
        });

        let tree = convert(&store, &converter, &field, FieldType::Tree);
        assert_eq!(tree.field_type, FieldType::Tree);
        assert_eq!(names_of(&store, field.id, RecordId(1)), ["Alpha", "Beta"]);
        assert_eq!(names_of(&store, field.id, RecordId(2)), ["Beta"]);
        assert!(store
            .terms_for_field(field.id)
            .unwrap()
            .iter()
            .all(|t| t.kind == TermKind::Hierarchical));
        let Some(DefaultValue::Terms(ids)) = &tree.default else {
            panic!("default lost");
        };
        assert_eq!(store.term(ids[0]).unwrap().unwrap().name, "Beta");

        let back = convert(&store, &converter, &tree, FieldType::ControlledName);
        assert_eq!(back.field_type, FieldType::ControlledName);
        assert_eq!(names_of(&store, field.id, RecordId(1)), ["Alpha", "Beta"]);
        assert_eq!(names_of(&store, field.id, RecordId(2)), ["Beta"]);
        assert_eq!(store.terms_for_field(field.id).unwrap().len(), 2);
    }

    #[test]
    fn flat_names_with_separators_become_paths() {
        let store = InMemoryMetadataStore::new();
        let field = permanent(5, FieldType::Option, "Subject");
        let physics = store
            .create_term(field.id, TermKind::Flat, "Science -- Physics", None)
            .unwrap();
        store.insert_record(SchemaId(0), RecordId(1)).unwrap();
        store.add_association(AssociationKind::Term, RecordId(1), field.id, physics.get()).unwrap();

        convert(&store, &TypeConverter::default(), &field, FieldType::Tree);
        let terms = store.terms_for_field(field.id).unwrap();
        let names: Vec<&str> = terms.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Science", "Science -- Physics"]);
        assert_eq!(names_of(&store, field.id, RecordId(1)), ["Science -- Physics"]);
    }

    #[test]
    fn tree_to_option_keeps_sets() {
        let store = InMemoryMetadataStore::new();
        let field = permanent(6, FieldType::Tree, "Topic");
        let converted = convert(&store, &TypeConverter::default(), &field, FieldType::Option);
        assert!(converted.config.allow_multiple);
        assert!(converted.allows_multiple());
    }

    #[test]
    fn failed_commit_rolls_everything_back() {
        let store = InMemoryMetadataStore::new();
        let (field, alpha, beta) = flat_field_with_values(&store);
        let converter = TypeConverter::default();
        let plan = converter.plan(&field, FieldType::Tree).unwrap();

        let err = converter
            .execute(&plan, &store, &field, |_| {
                Err(SchemaError::SchemaConflict("simulated".into()))
            })
            .unwrap_err();
        assert!(matches!(err, SchemaError::SchemaConflict(_)));

        let terms = store.terms_for_field(field.id).unwrap();
        let ids: Vec<TermId> = terms.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![alpha, beta]);
        assert!(terms.iter().all(|t| t.kind == TermKind::Flat));
        assert_eq!(
            store.associations(AssociationKind::Term, RecordId(1), field.id).unwrap(),
            vec![alpha.get(), beta.get()]
        );
    }

    #[test]
    fn interrupted_conversion_can_be_rerun() {
        let store = InMemoryMetadataStore::new();
        let (field, alpha, _) = flat_field_with_values(&store);
        store.set_term_count(alpha, TermCount { total: 1, public: 1 }).unwrap();

        // A first run gets through the rewrite, then dies before retyping.
        {
            let mut ctx = MigrationContext {
                store: &store,
                batch_rows: 1,
                original: field.clone(),
                descriptor: field.clone(),
                term_map: BTreeMap::new(),
                created_terms: Vec::new(),
                created_columns: Vec::new(),
                rewritten: Vec::new(),
            };
            MigrationStep::RecreateTerms {
                field: field.id,
                kind: TermKind::Hierarchical,
            }
            .apply(&mut ctx)
            .unwrap();
            MigrationStep::RewriteTermAssociations { field: field.id }
                .apply(&mut ctx)
                .unwrap();
        }

        let converter = TypeConverter::new(ConverterConfig {
            max_statement_bytes: 48,
            max_batch_rows: 1,
        });
        let tree = convert(&store, &converter, &field, FieldType::Tree);
        assert_eq!(tree.field_type, FieldType::Tree);

        let terms = store.terms_for_field(field.id).unwrap();
        let names: Vec<&str> = terms.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta"]);
        assert!(terms.iter().all(|t| t.kind == TermKind::Hierarchical));
        assert_eq!(names_of(&store, field.id, RecordId(1)), ["Alpha", "Beta"]);
        assert_eq!(names_of(&store, field.id, RecordId(2)), ["Beta"]);
        assert_eq!(store.term_count(terms[0].id).unwrap(), TermCount { total: 1, public: 1 });
    }

    #[test]
    fn rerunning_term_recreation_reuses_terms() {
        let store = InMemoryMetadataStore::new();
        let (field, _, _) = flat_field_with_values(&store);
        let step = MigrationStep::RecreateTerms {
            field: field.id,
            kind: TermKind::Hierarchical,
        };
        for _ in 0..2 {
            let mut ctx = MigrationContext {
                store: &store,
                batch_rows: 1,
                original: field.clone(),
                descriptor: field.clone(),
                term_map: BTreeMap::new(),
                created_terms: Vec::new(),
                created_columns: Vec::new(),
                rewritten: Vec::new(),
            };
            step.apply(&mut ctx).unwrap();
            assert_eq!(ctx.term_map.len(), 2);
        }
        let hierarchical = store
            .terms_for_field(field.id)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TermKind::Hierarchical)
            .count();
        assert_eq!(hierarchical, 2);
    }
}
