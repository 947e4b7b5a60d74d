//! Physical reads and writes, one strategy per [`StorageShape`].

use chrono::{DateTime, Utc};

use folio_schema::FieldDescriptor;
use folio_store::{
    decode, encode, AssociationStore, Cell, MetadataStore, RecordExtras, RecordTable, TermStore,
    UserDirectory,
};
use folio_types::{
    AssociationKind, ColumnType, DatePrecision, DateRange, FieldValue, FileId, ImageId, Point,
    QualifierId, RecordId, StorageShape, TermId, TermValue, UserId, UserRef,
};

use crate::error::{RecordError, RecordResult};
use crate::record::GetOptions;

/// Read the stored value of a field.
pub(crate) fn read(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
    options: GetOptions,
) -> RecordResult<FieldValue> {
    match field.field_type.shape() {
        StorageShape::Terms | StorageShape::Association(_) => {
            let ids = stored_ids(store, record, field)?;
            hydrate(store, record, field, &ids, options)
        }
        // Temporary fields have no columns yet.
        _ if field.is_temporary() => Ok(FieldValue::empty(field.field_type)),
        StorageShape::Column(column_type) => {
            let cell = store.read_cell(record, &field.storage_name)?;
            column_value(column_type, cell)
        }
        StorageShape::Paired => {
            let columns = field.columns();
            let x = store.read_cell(record, &columns[0].0)?;
            let y = store.read_cell(record, &columns[1].0)?;
            Ok(FieldValue::Point(match (x, y) {
                (Cell::Float(x), Cell::Float(y)) => Some(Point { x, y }),
                _ => None,
            }))
        }
        StorageShape::Ranged => {
            let columns = field.columns();
            let begin = store.read_cell(record, &columns[0].0)?;
            let end = store.read_cell(record, &columns[1].0)?;
            let precision = store.read_cell(record, &columns[2].0)?;
            Ok(FieldValue::Date(date_value(begin, end, precision)))
        }
    }
}

fn column_value(column_type: ColumnType, cell: Cell) -> RecordResult<FieldValue> {
    Ok(match (column_type, cell) {
        (ColumnType::Text, Cell::Text(s)) => FieldValue::Text(Some(s)),
        (ColumnType::Text, _) => FieldValue::Text(None),
        (ColumnType::Integer, Cell::Integer(n)) => FieldValue::Number(Some(n)),
        (ColumnType::Integer, _) => FieldValue::Number(None),
        (ColumnType::Boolean, Cell::Boolean(b)) => FieldValue::Flag(Some(b)),
        (ColumnType::Boolean, _) => FieldValue::Flag(None),
        (ColumnType::DateTime, Cell::DateTime(at)) => FieldValue::Timestamp(Some(at)),
        (ColumnType::DateTime, _) => FieldValue::Timestamp(None),
        (ColumnType::Bytes, Cell::Bytes(bytes)) => FieldValue::SearchParameters(Some(decode(&bytes)?)),
        (ColumnType::Bytes, _) => FieldValue::SearchParameters(None),
        (ColumnType::Float, _) => FieldValue::Point(None),
    })
}

fn date_value(begin: Cell, end: Cell, precision: Cell) -> Option<DateRange> {
    let Cell::DateTime(begin) = begin else {
        return None;
    };
    let end = match end {
        // A stored end equal to the begin marks a single date.
        Cell::DateTime(end) if end != begin => Some(end.naive_utc()),
        _ => None,
    };
    let precision = match precision {
        Cell::Integer(code) => DatePrecision::from_code(code).unwrap_or(DatePrecision::Day),
        _ => DatePrecision::Day,
    };
    Some(DateRange {
        begin: begin.naive_utc(),
        end,
        precision,
    })
}

/// Raw target ids stored for a set-valued field, ascending.
pub(crate) fn stored_ids(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
) -> RecordResult<Vec<i64>> {
    match field.field_type.association_kind() {
        Some(kind) => Ok(store.associations(kind, record, field.id)?),
        None => Ok(Vec::new()),
    }
}

/// Build the value of a set-valued field from target ids.
pub(crate) fn hydrate(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
    ids: &[i64],
    options: GetOptions,
) -> RecordResult<FieldValue> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    let value = match field.field_type.shape() {
        StorageShape::Terms => {
            let record_qualifier = if options.rich_objects {
                field_qualifier(store, record, field)?
            } else {
                None
            };
            let mut terms = Vec::with_capacity(ids.len());
            for id in ids {
                let Some(row) = store.term(TermId(id))? else {
                    continue;
                };
                let mut term = TermValue::new(row.id, row.name);
                if options.rich_objects {
                    term.parent = row.parent;
                    term.qualifier = if item_level(field) {
                        row.qualifier.or(field.config.default_qualifier)
                    } else {
                        record_qualifier
                    };
                    if options.include_variants {
                        term.variants = row.variants;
                    }
                }
                terms.push(term);
            }
            FieldValue::Terms(terms)
        }
        StorageShape::Association(AssociationKind::User) => {
            let mut users = Vec::with_capacity(ids.len());
            for id in ids {
                let name = store.user_name(UserId(id))?.unwrap_or_default();
                users.push(UserRef { id: UserId(id), name });
            }
            FieldValue::Users(users)
        }
        StorageShape::Association(AssociationKind::File) => {
            FieldValue::Files(ids.into_iter().map(FileId).collect())
        }
        StorageShape::Association(AssociationKind::Image) => {
            FieldValue::Images(ids.into_iter().map(ImageId).collect())
        }
        StorageShape::Association(AssociationKind::Reference) => {
            FieldValue::References(ids.into_iter().map(RecordId).collect())
        }
        _ => FieldValue::empty(field.field_type),
    };
    Ok(value)
}

/// Whether qualifiers attach to individual terms rather than to the record.
pub(crate) fn item_level(field: &FieldDescriptor) -> bool {
    field.config.uses_qualifiers
        && field.config.item_level_qualifiers
        && field.field_type.shape() == StorageShape::Terms
}

/// The per-record qualifier of a field, falling back to its default.
pub(crate) fn field_qualifier(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
) -> RecordResult<Option<QualifierId>> {
    if !field.config.uses_qualifiers {
        return Ok(None);
    }
    Ok(store
        .record_qualifier(record, field.id)?
        .or(field.config.default_qualifier))
}

/// Overwrite the columns of a row-stored field.
pub(crate) fn write_columns(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
    value: &FieldValue,
) -> RecordResult<()> {
    if field.is_temporary() {
        return Err(RecordError::invalid(
            field.id,
            "temporary fields have no storage for this type",
        ));
    }
    let columns = field.columns();
    for ((column, _), cell) in columns.iter().zip(cells(value)?) {
        store.write_cell(record, column, cell)?;
    }
    Ok(())
}

fn cells(value: &FieldValue) -> RecordResult<Vec<Cell>> {
    fn at(t: Option<DateTime<Utc>>) -> Cell {
        t.map_or(Cell::Null, Cell::DateTime)
    }
    Ok(match value {
        FieldValue::Text(v) => vec![v.clone().map_or(Cell::Null, Cell::Text)],
        FieldValue::Number(v) => vec![v.map_or(Cell::Null, Cell::Integer)],
        FieldValue::Flag(v) => vec![v.map_or(Cell::Null, Cell::Boolean)],
        FieldValue::Timestamp(v) => vec![at(*v)],
        FieldValue::SearchParameters(v) => vec![match v {
            Some(set) => Cell::Bytes(encode(set)?),
            None => Cell::Null,
        }],
        FieldValue::Point(Some(p)) => vec![Cell::Float(p.x), Cell::Float(p.y)],
        FieldValue::Point(None) => vec![Cell::Null, Cell::Null],
        FieldValue::Date(Some(d)) => vec![
            Cell::DateTime(d.begin_utc()),
            at(d.end.filter(|end| *end != d.begin).map(|end| end.and_utc())),
            Cell::Integer(d.precision.code()),
        ],
        FieldValue::Date(None) => vec![Cell::Null, Cell::Null, Cell::Null],
        FieldValue::Terms(_)
        | FieldValue::Users(_)
        | FieldValue::Files(_)
        | FieldValue::Images(_)
        | FieldValue::References(_) => Vec::new(),
    })
}

/// Apply an association diff for a set-valued field.
pub(crate) fn write_ids(
    store: &dyn MetadataStore,
    record: RecordId,
    field: &FieldDescriptor,
    added: &[i64],
    removed: &[i64],
) -> RecordResult<()> {
    let Some(kind) = field.field_type.association_kind() else {
        return Ok(());
    };
    for target in removed {
        store.remove_association(kind, record, field.id, *target)?;
    }
    for target in added {
        store.add_association(kind, record, field.id, *target)?;
    }
    Ok(())
}
