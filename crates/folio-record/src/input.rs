//! Turning setter input into values a field can hold.
//!
//! Scalars resolve to a [`FieldValue`] built from the first item given.
//! Set-valued fields resolve to raw target ids in input order, deduplicated;
//! the caller decides how many to keep.

use folio_schema::FieldDescriptor;
use folio_store::{MetadataStore, RecordTable, TermStore, UserDirectory};
use folio_types::{
    parse_timestamp, DateRange, FieldType, FieldValue, Point, RecordId, StorageShape, TermId,
    UserId, ValueInput,
};

use crate::error::{RecordError, RecordResult};

pub(crate) enum Resolved {
    Value(FieldValue),
    Ids(Vec<i64>),
}

pub(crate) fn resolve(
    store: &dyn MetadataStore,
    field: &FieldDescriptor,
    input: ValueInput,
) -> RecordResult<Resolved> {
    let items = input.into_items();
    if field.field_type.is_set_valued() {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            if let Some(id) = resolve_target(store, field, item)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        return Ok(Resolved::Ids(ids));
    }

    let value = match items.into_iter().next() {
        Some(item) => resolve_scalar(field, item)?,
        None => FieldValue::empty(field.field_type),
    };
    Ok(Resolved::Value(value))
}

fn resolve_scalar(field: &FieldDescriptor, item: ValueInput) -> RecordResult<FieldValue> {
    let bad = |item: &ValueInput| {
        RecordError::invalid(field.id, format!("cannot store {item:?} in a {} field", field.field_type))
    };
    let value = match field.field_type {
        FieldType::Text | FieldType::Paragraph | FieldType::Url | FieldType::Email => {
            let text = match item {
                ValueInput::Text(s) => s,
                ValueInput::Number(n) => n.to_string(),
                other => return Err(bad(&other)),
            };
            if let Some(max) = field.config.max_length {
                if text.chars().count() > max as usize {
                    return Err(RecordError::invalid(field.id, format!("longer than {max} characters")));
                }
            }
            FieldValue::Text(Some(text).filter(|s| !s.is_empty()))
        }
        FieldType::Number => {
            let n = match item {
                ValueInput::Number(n) => n,
                ValueInput::Text(s) if s.trim().is_empty() => return Ok(FieldValue::Number(None)),
                ValueInput::Text(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| RecordError::invalid(field.id, format!("{s:?} is not a number")))?,
                other => return Err(bad(&other)),
            };
            let below = field.config.min_value.is_some_and(|min| n < min);
            let above = field.config.max_value.is_some_and(|max| n > max);
            if below || above {
                return Err(RecordError::invalid(field.id, format!("{n} is out of range")));
            }
            FieldValue::Number(Some(n))
        }
        FieldType::Flag => {
            let b = match item {
                ValueInput::Flag(b) => b,
                ValueInput::Number(0) => false,
                ValueInput::Number(1) => true,
                ValueInput::Text(s) => match s.trim().to_lowercase().as_str() {
                    "true" | "yes" | "1" => true,
                    "false" | "no" | "0" => false,
                    _ => return Err(RecordError::invalid(field.id, format!("{s:?} is not a flag"))),
                },
                other => return Err(bad(&other)),
            };
            FieldValue::Flag(Some(b))
        }
        FieldType::Point => {
            let p = match item {
                ValueInput::Point(p) => p,
                ValueInput::Text(s) => {
                    Point::parse(&s).map_err(|e| RecordError::invalid(field.id, e.to_string()))?
                }
                other => return Err(bad(&other)),
            };
            FieldValue::Point(Some(p))
        }
        FieldType::Date => {
            let d = match item {
                ValueInput::Date(d) => d,
                ValueInput::Timestamp(t) => DateRange::instant(t),
                ValueInput::Text(s) => s
                    .parse::<DateRange>()
                    .map_err(|e| RecordError::invalid(field.id, e.to_string()))?,
                other => return Err(bad(&other)),
            };
            if d.is_range() && !field.config.allow_ranges {
                return Err(RecordError::invalid(field.id, "date ranges are not allowed"));
            }
            FieldValue::Date(Some(d))
        }
        FieldType::Timestamp => {
            let t = match item {
                ValueInput::Timestamp(t) => t,
                ValueInput::Date(d) => d.begin_utc(),
                ValueInput::Text(s) => {
                    parse_timestamp(&s).map_err(|e| RecordError::invalid(field.id, e.to_string()))?
                }
                other => return Err(bad(&other)),
            };
            FieldValue::Timestamp(Some(t))
        }
        FieldType::SearchParameterSet => match item {
            ValueInput::Structured(set) => FieldValue::SearchParameters(Some(set)),
            other => return Err(bad(&other)),
        },
        FieldType::ControlledName
        | FieldType::Option
        | FieldType::Tree
        | FieldType::User
        | FieldType::File
        | FieldType::Image
        | FieldType::Reference => return Err(bad(&item)),
    };
    Ok(value)
}

/// Resolve one item of a set-valued field. Blank strings resolve to nothing.
fn resolve_target(
    store: &dyn MetadataStore,
    field: &FieldDescriptor,
    item: ValueInput,
) -> RecordResult<Option<i64>> {
    if let ValueInput::Text(s) = &item {
        if s.trim().is_empty() {
            return Ok(None);
        }
    }
    let id = match (field.field_type.shape(), item) {
        (StorageShape::Terms, ValueInput::Id(id)) => {
            if !store.term_exists(field.id, TermId(id))? {
                return Err(RecordError::invalid(field.id, format!("no term {id} in this field")));
            }
            id
        }
        (StorageShape::Terms, ValueInput::Text(name)) => store
            .resolve_term(field.id, name.trim())?
            .ok_or_else(|| RecordError::invalid(field.id, format!("no term named {name:?}")))?
            .get(),
        (StorageShape::Association(_), item) if field.field_type == FieldType::User => match item {
            ValueInput::Id(id) => {
                if store.user_name(UserId(id))?.is_none() {
                    return Err(RecordError::invalid(field.id, format!("no user {id}")));
                }
                id
            }
            ValueInput::Text(name) => store
                .resolve_user(name.trim())?
                .ok_or_else(|| RecordError::invalid(field.id, format!("no user named {name:?}")))?
                .get(),
            other => return Err(RecordError::invalid(field.id, format!("{other:?} is not a user"))),
        },
        (StorageShape::Association(_), item) if field.field_type == FieldType::Reference => {
            let id = match item {
                ValueInput::Id(id) => id,
                ValueInput::Text(s) => s.trim().parse().map_err(|_| {
                    RecordError::invalid(field.id, format!("{s:?} is not a record id"))
                })?,
                other => {
                    return Err(RecordError::invalid(field.id, format!("{other:?} is not a record")))
                }
            };
            let Some(schema) = store.record_schema(RecordId(id))? else {
                return Err(RecordError::invalid(field.id, format!("no record {id}")));
            };
            if field.config.reference_schema.is_some_and(|wanted| wanted != schema) {
                return Err(RecordError::invalid(
                    field.id,
                    format!("record {id} is in {schema}, not the referenced schema"),
                ));
            }
            id
        }
        // Files and images live outside the store; any positive id is accepted.
        (StorageShape::Association(_), ValueInput::Id(id)) if id > 0 => id,
        (_, other) => {
            return Err(RecordError::invalid(
                field.id,
                format!("cannot store {other:?} in a {} field", field.field_type),
            ))
        }
    };
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_schema::FieldConfig;
    use folio_store::InMemoryMetadataStore;
    use folio_types::{FieldId, SchemaId, TermKind};

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn field(field_type: FieldType) -> FieldDescriptor {
        FieldDescriptor::new_temporary(FieldId(4), SchemaId(0), field_type, "Subject", 1).unwrap()
    }

    fn scalar(store: &InMemoryMetadataStore, f: &FieldDescriptor, input: impl Into<ValueInput>) -> RecordResult<FieldValue> {
        match resolve(store, f, input.into())? {
            Resolved::Value(v) => Ok(v),
            Resolved::Ids(_) => panic!("expected a scalar"),
        }
    }

    fn ids(store: &InMemoryMetadataStore, f: &FieldDescriptor, input: impl Into<ValueInput>) -> RecordResult<Vec<i64>> {
        match resolve(store, f, input.into())? {
            Resolved::Ids(ids) => Ok(ids),
            Resolved::Value(_) => panic!("expected ids"),
        }
    }

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    #[test]
    fn text_respects_max_length() {
        let store = InMemoryMetadataStore::new();
        let mut f = field(FieldType::Text);
        f.config = FieldConfig {
            max_length: Some(5),
            ..FieldConfig::default()
        };
        assert_eq!(scalar(&store, &f, "short").unwrap(), FieldValue::Text(Some("short".into())));
        assert!(matches!(scalar(&store, &f, "too long"), Err(RecordError::InvalidValue { .. })));
        assert_eq!(scalar(&store, &f, "").unwrap(), FieldValue::Text(None));
    }

    #[test]
    fn numbers_parse_and_respect_bounds() {
        let store = InMemoryMetadataStore::new();
        let mut f = field(FieldType::Number);
        f.config.min_value = Some(0);
        assert_eq!(scalar(&store, &f, " 42 ").unwrap(), FieldValue::Number(Some(42)));
        assert!(scalar(&store, &f, -1i64).is_err());
        assert!(scalar(&store, &f, "forty").is_err());
    }

    #[test]
    fn scalars_keep_the_first_of_several_values() {
        let store = InMemoryMetadataStore::new();
        let f = field(FieldType::Flag);
        assert_eq!(scalar(&store, &f, vec![false, true]).unwrap(), FieldValue::Flag(Some(false)));
        let n = field(FieldType::Number);
        assert_eq!(scalar(&store, &n, vec![7i64, 8]).unwrap(), FieldValue::Number(Some(7)));
        // Only the kept item is validated.
        assert_eq!(scalar(&store, &n, vec!["3", "x"]).unwrap(), FieldValue::Number(Some(3)));
        assert_eq!(scalar(&store, &f, Vec::<bool>::new()).unwrap(), FieldValue::Flag(None));
        assert_eq!(scalar(&store, &f, "yes").unwrap(), FieldValue::Flag(Some(true)));
    }

    #[test]
    fn point_from_text() {
        let store = InMemoryMetadataStore::new();
        let f = field(FieldType::Point);
        assert_eq!(
            scalar(&store, &f, "1.5, 2.25").unwrap(),
            FieldValue::Point(Some(Point { x: 1.5, y: 2.25 }))
        );
    }

    #[test]
    fn ranges_need_allow_ranges() {
        let store = InMemoryMetadataStore::new();
        let mut f = field(FieldType::Date);
        assert!(scalar(&store, &f, "1990 - 1995").is_err());
        assert!(scalar(&store, &f, "1990-05").is_ok());
        f.config.allow_ranges = true;
        let v = scalar(&store, &f, "1990 - 1995").unwrap();
        assert!(v.as_date().unwrap().is_range());
    }

    #[test]
    fn timestamp_from_date() {
        let store = InMemoryMetadataStore::new();
        let f = field(FieldType::Timestamp);
        let d: DateRange = "2024-03-01".parse().unwrap();
        assert_eq!(scalar(&store, &f, d).unwrap().as_timestamp(), Some(d.begin_utc()));
    }

    // ------------------------------------------------------------------
    // Set-valued fields
    // ------------------------------------------------------------------

    #[test]
    fn terms_by_name_or_id() {
        let store = InMemoryMetadataStore::new();
        let f = field(FieldType::ControlledName);
        let alpha = store.create_term(f.id, TermKind::Flat, "Alpha", None).unwrap();
        let beta = store.create_term(f.id, TermKind::Flat, "Beta", None).unwrap();

        let got = ids(&store, &f, vec![ValueInput::from("beta"), ValueInput::Id(alpha.get()), ValueInput::from("Beta")]).unwrap();
        assert_eq!(got, vec![beta.get(), alpha.get()]);

        assert!(matches!(ids(&store, &f, "Gamma"), Err(RecordError::InvalidValue { .. })));
        assert!(ids(&store, &f, ValueInput::Id(999)).is_err());
        assert!(ids(&store, &f, "  ").unwrap().is_empty());
    }

    #[test]
    fn users_by_name() {
        let store = InMemoryMetadataStore::new();
        store.register_user(UserId(7), "Ada").unwrap();
        let f = field(FieldType::User);
        assert_eq!(ids(&store, &f, "ada").unwrap(), vec![7]);
        assert!(ids(&store, &f, ValueInput::Id(8)).is_err());
    }

    #[test]
    fn references_check_the_target_schema() {
        let store = InMemoryMetadataStore::new();
        store.insert_record(SchemaId(1), RecordId(5)).unwrap();
        let mut f = field(FieldType::Reference);
        assert_eq!(ids(&store, &f, "5").unwrap(), vec![5]);
        f.config.reference_schema = Some(SchemaId(2));
        assert!(ids(&store, &f, ValueInput::Id(5)).is_err());
        assert!(ids(&store, &f, ValueInput::Id(6)).is_err());
    }

    #[test]
    fn files_need_positive_ids() {
        let store = InMemoryMetadataStore::new();
        let f = field(FieldType::File);
        assert_eq!(ids(&store, &f, ValueInput::Id(3)).unwrap(), vec![3]);
        assert!(ids(&store, &f, ValueInput::Id(0)).is_err());
        assert!(ids(&store, &f, "scan.pdf").is_err());
    }
}
