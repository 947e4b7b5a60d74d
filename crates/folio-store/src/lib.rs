//! Storage backends for folio.
//!
//! The metadata core never touches a concrete database. It talks to the
//! traits in [`traits`]:
//!
//! - [`CatalogStore`]: serialized schema and field rows, identifier sequences
//! - [`RecordTable`]: record rows with per-field columns
//! - [`AssociationStore`]: record-to-target links (terms, users, files, ...)
//! - [`TermStore`]: vocabulary and hierarchical terms
//! - [`UserDirectory`]: user names
//! - [`RecordExtras`]: field timestamps, qualifiers, ratings, comments
//! - [`SharedCaches`]: permission rows and term counts
//!
//! [`InMemoryMetadataStore`] implements all of them.

pub mod error;
pub mod memory;
pub mod row;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryMetadataStore;
pub use row::{
    decode, encode, Cell, Comment, FieldStamp, IdSequence, PermissionRow, RowKind, TermCount,
    TermRow,
};
pub use traits::{
    AssociationStore, CatalogStore, MetadataStore, RecordExtras, RecordTable, SharedCaches,
    TermStore, UserDirectory,
};
