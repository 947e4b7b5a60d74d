use folio_store::StoreError;
use folio_types::FieldId;

/// Errors produced while evaluating privileges.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// A rule needed a field value the record could not supply.
    #[error("cannot read {field} for privilege evaluation: {reason}")]
    FieldUnavailable { field: FieldId, reason: String },

    /// Reading or writing the persisted permission rows failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the access crate.
pub type AccessResult<T> = std::result::Result<T, AccessError>;
