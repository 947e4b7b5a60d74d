use thiserror::Error;

use folio_types::SchemaId;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{user} may not create records in schema {schema}")]
    AuthoringDenied { user: String, schema: SchemaId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema error: {0}")]
    Schema(#[from] folio_schema::SchemaError),

    #[error("record error: {0}")]
    Record(#[from] folio_record::RecordError),

    #[error("access error: {0}")]
    Access(#[from] folio_access::AccessError),

    #[error("store error: {0}")]
    Store(#[from] folio_store::StoreError),
}

pub type SdkResult<T> = Result<T, SdkError>;
