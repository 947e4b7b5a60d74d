use folio_types::{ColumnType, RecordId, SchemaId, TermId};

/// Errors from storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A column already exists with a different physical type.
    #[error("column {column} in schema {schema} is {existing:?}, cannot use it as {requested:?}")]
    ColumnConflict {
        schema: SchemaId,
        column: String,
        existing: ColumnType,
        requested: ColumnType,
    },

    /// The column has not been allocated.
    #[error("unknown column {column} in schema {schema}")]
    UnknownColumn { schema: SchemaId, column: String },

    /// A cell was written with a value of the wrong physical type.
    #[error("column {column} holds {expected:?} values")]
    CellTypeMismatch { column: String, expected: ColumnType },

    /// The record row does not exist.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The record row already exists.
    #[error("record already exists: {0}")]
    RecordExists(RecordId),

    /// The term row does not exist.
    #[error("term not found: {0}")]
    TermNotFound(TermId),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
