//! The Folio value store.
//!
//! A [`Record`] reads and writes typed field values for one record
//! identity. Writes stamp the field, publish on the change bus, drop cached
//! permissions the change affects, and queue a coalesced
//! [housekeeping](housekeeping::run) unit for the record.
//!
//! Records start temporary, become permanent once, and may be destroyed
//! from either state; see [`RecordState`].

pub mod config;
pub mod error;
pub mod housekeeping;
pub mod indexer;
pub mod record;
pub mod services;

mod input;
mod shape;

#[cfg(test)]
mod testing;

pub use config::RecordConfig;
pub use error::{RecordError, RecordResult};
pub use housekeeping::{HousekeepingReport, HousekeepingState};
pub use indexer::{InMemorySearchIndexer, SearchIndexer};
pub use record::{GetOptions, Qualifiers, Record, RecordState};
pub use services::RecordServices;
