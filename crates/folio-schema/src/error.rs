use folio_store::StoreError;
use folio_types::{FieldId, FieldType, SchemaId, TypeError};

use crate::attributes::AttributeKind;
use crate::descriptor::PrivilegeLevel;

/// Errors produced by schema and field management.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// A field was addressed through a schema it does not belong to.
    #[error("{field} belongs to {actual}, not {expected}")]
    CrossSchema {
        field: FieldId,
        expected: SchemaId,
        actual: SchemaId,
    },

    #[error("attribute {attribute} is not legal for {field_type} fields")]
    IllegalAttribute {
        attribute: AttributeKind,
        field_type: FieldType,
    },

    #[error("cannot convert {from} fields to {to}")]
    UnsupportedConversion { from: FieldType, to: FieldType },

    /// Existing physical storage is incompatible with the field.
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// The field is the target of a standard-name mapping.
    #[error("{field} is mapped as standard name '{std_name}'")]
    MappedField { field: FieldId, std_name: String },

    /// A privilege condition reads the field. `owner` names the schema or
    /// field whose rule holds the condition.
    #[error("{field} is read by the {level:?} rule of {owner}")]
    RuleReferencedField {
        field: FieldId,
        owner: String,
        level: PrivilegeLevel,
    },

    #[error("name already in use: {0}")]
    DuplicateName(String),

    #[error("invalid field type: {0}")]
    InvalidType(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A default value or attribute value could not be interpreted.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("interchange document error: {0}")]
    Interchange(String),

    /// An import failed and undoing it failed too. `leftovers` describes
    /// what could not be removed.
    #[error("{source}; rollback left behind: {}", .leftovers.join("; "))]
    IncompleteRollback {
        source: Box<SchemaError>,
        leftovers: Vec<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Convenience alias used throughout the schema crate.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
