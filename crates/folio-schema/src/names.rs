//! Storage-name derivation.
//!
//! A field's storage name is its name with every non-alphanumeric character
//! removed, suffixed with the schema id unless the field lives in the
//! default schema. Column names are derived from the storage name and the
//! field's storage shape:
//!
//! - column-shaped types use the storage name itself
//! - points use `<name>X` and `<name>Y`
//! - dates use `<name>Begin`, `<name>End` and `<name>Precision`
//! - association-backed types have no columns

use folio_types::{ColumnType, FieldType, SchemaId, StorageShape};

use crate::error::{SchemaError, SchemaResult};

/// Separator between a schema name and a field name in qualified references.
pub const QUALIFIED_SEPARATOR: &str = ": ";

/// Derive the storage name for a field name in a schema.
pub fn storage_name(name: &str, schema: SchemaId) -> SchemaResult<String> {
    let stripped: String = name.chars().filter(|c| c.is_alphanumeric()).collect();
    if stripped.is_empty() {
        return Err(SchemaError::InvalidName(format!(
            "'{name}' has no alphanumeric characters"
        )));
    }
    if schema.is_default() {
        Ok(stripped)
    } else {
        Ok(format!("{stripped}{}", schema.get()))
    }
}

/// Physical columns a field of `field_type` occupies.
pub fn columns(storage_name: &str, field_type: FieldType) -> Vec<(String, ColumnType)> {
    match field_type.shape() {
        StorageShape::Column(column_type) => vec![(storage_name.to_string(), column_type)],
        StorageShape::Paired => vec![
            (format!("{storage_name}X"), ColumnType::Float),
            (format!("{storage_name}Y"), ColumnType::Float),
        ],
        StorageShape::Ranged => vec![
            (format!("{storage_name}Begin"), ColumnType::DateTime),
            (format!("{storage_name}End"), ColumnType::DateTime),
            (format!("{storage_name}Precision"), ColumnType::Integer),
        ],
        StorageShape::Terms | StorageShape::Association(_) => Vec::new(),
    }
}

/// Split `"Schema: Field"` into its parts. Bare names return `None`.
pub fn split_qualified(reference: &str) -> Option<(&str, &str)> {
    reference
        .split_once(QUALIFIED_SEPARATOR)
        .map(|(schema, field)| (schema.trim(), field.trim()))
        .filter(|(schema, field)| !schema.is_empty() && !field.is_empty())
}

/// Case-insensitive comparison used for every name collision check.
pub fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}
