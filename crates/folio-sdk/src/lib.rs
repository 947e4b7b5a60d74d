//! High-level API for Folio.
//!
//! A [`Collection`] owns one metadata store and wires the schema registry,
//! permission evaluator, change bus, housekeeping queue and search indexer
//! around it. This is the entry point for applications embedding Folio.

pub mod collection;
pub mod config;
pub mod error;

pub use collection::Collection;
pub use config::CollectionConfig;
pub use error::{SdkError, SdkResult};

// Re-export the types most callers touch.
pub use folio_access::{Condition, PrivilegeSet, User};
pub use folio_events::{ChangeEvent, ChangeFilter, ChangeKind, ChangeStream};
pub use folio_record::{GetOptions, Qualifiers, Record, RecordState};
pub use folio_schema::{Attribute, FieldDescriptor, FieldQuery, FieldRef, PrivilegeLevel, Schema};
pub use folio_types::{FieldId, FieldType, FieldValue, RecordId, SchemaId, UserId, ValueInput};
