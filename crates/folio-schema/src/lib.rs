//! Field descriptors, the schema registry and type conversion for Folio.
//!
//! - [`FieldDescriptor`] describes one typed field; [`AttributeKind`] and
//!   its legality table decide which configuration a type may carry.
//! - [`SchemaRegistry`] owns schemas and the field lifecycle (create, make
//!   permanent, rename, convert, drop), standard-name mappings and bulk
//!   import from interchange documents.
//! - [`TypeConverter`] plans and runs conversions as reversible
//!   [`MigrationPlan`]s.
//! - [`RegistryCache`] memoizes lookups behind one `invalidate(scope)`
//!   entry point.

pub mod attributes;
pub mod cache;
pub mod convert;
pub mod descriptor;
pub mod error;
pub mod interchange;
pub mod names;
pub mod registry;
pub mod schema;

pub use attributes::{supports_default, Attribute, AttributeKind, AutoValue, FieldConfig, UpdateMethod};
pub use cache::{CacheScope, RegistryCache};
pub use convert::{ConversionRule, ConverterConfig, MigrationPlan, MigrationStep, TypeConverter};
pub use descriptor::{DefaultValue, FieldDescriptor, PrivilegeLevel};
pub use error::{SchemaError, SchemaResult};
pub use interchange::read_vocabulary;
pub use names::{storage_name, QUALIFIED_SEPARATOR};
pub use registry::{FieldOrder, FieldQuery, FieldRef, SchemaRegistry};
pub use schema::{OrderKind, Schema};
