//! Foundation types for Folio, a typed-metadata value store.
//!
//! Every other Folio crate depends on `folio-types`.
//!
//! # Key Types
//!
//! - [`FieldType`]: the 17 value types a field can carry
//! - [`StorageShape`]: physical layout chosen by a field type
//! - [`FieldValue`]: canonical value read from a record
//! - [`ValueInput`]: what callers may hand to a setter
//! - [`DateRange`], [`Point`], [`SearchParameterSet`]: structured values
//! - [`SchemaId`], [`FieldId`], [`RecordId`], [`TermId`], [`UserId`]: identifiers

pub mod date;
pub mod error;
pub mod field_type;
pub mod ids;
pub mod value;

pub use date::{parse_timestamp, DatePrecision, DateRange};
pub use error::TypeError;
pub use field_type::{
    AssociationKind, ColumnType, FieldType, StorageClass, StorageShape, TermKind, TREE_SEPARATOR,
};
pub use ids::{FieldId, FileId, ImageId, QualifierId, RecordId, SchemaId, TermId, UserId};
pub use value::{
    FieldValue, Point, SearchLogic, SearchParameter, SearchParameterSet, TermValue, UserRef,
    ValueInput,
};
