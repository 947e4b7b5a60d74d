//! Change notification and deferred work for Folio.
//!
//! [`ChangeNotifier`] is the one bus every field-value change goes through:
//! stream subscribers receive a broadcast channel, observers get a
//! synchronous callback. [`TaskQueue`] is the contract for deferred,
//! per-key coalesced work, with [`InMemoryTaskQueue`] as the embedded
//! implementation.

pub mod error;
pub mod event;
pub mod notifier;
pub mod queue;

pub use error::{EventError, EventResult};
pub use event::{ChangeEvent, ChangeKind, ChangeScope};
pub use notifier::{ChangeFilter, ChangeNotifier, ChangeStream, NotifierConfig, ObserverId};
pub use queue::{DeferredWork, InMemoryTaskQueue, RunReport, TaskQueue};
