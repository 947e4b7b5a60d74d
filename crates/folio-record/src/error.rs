use folio_access::AccessError;
use folio_events::EventError;
use folio_schema::SchemaError;
use folio_store::StoreError;
use folio_types::{FieldId, RecordId, SchemaId};

use crate::record::RecordState;

/// Errors produced by the record value store.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// No record row exists under this id.
    #[error("unknown record: {0}")]
    UnknownRecord(RecordId),

    /// The record has been destroyed; only its id remains.
    #[error("record {0} has been destroyed")]
    Destroyed(RecordId),

    /// The field belongs to a different schema than the record.
    #[error("{field} belongs to {actual}, record is in {expected}")]
    CrossSchema {
        field: FieldId,
        expected: SchemaId,
        actual: SchemaId,
    },

    /// An input could not be turned into a value for the field.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: FieldId, reason: String },

    /// The record lifecycle does not allow this move.
    #[error("record {record} cannot go from {from:?} to {to:?}")]
    IllegalTransition {
        record: RecordId,
        from: RecordState,
        to: RecordState,
    },

    /// Ratings run from 0 to 100.
    #[error("rating out of range: {0}")]
    InvalidRating(u8),

    #[error("schema error: {0}")]
    Schema(SchemaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("event error: {0}")]
    Event(#[from] EventError),
}

impl From<SchemaError> for RecordError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::CrossSchema {
                field,
                expected,
                actual,
            } => Self::CrossSchema {
                field,
                expected,
                actual,
            },
            other => Self::Schema(other),
        }
    }
}

impl RecordError {
    pub(crate) fn invalid(field: FieldId, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the record crate.
pub type RecordResult<T> = std::result::Result<T, RecordError>;
