//! Deferred per-record upkeep.
//!
//! Every caller write to a permanent record queues one housekeeping unit
//! under the record's key, replacing any unit still pending for it. A run
//! re-evaluates change-triggered auto-updates, fires release updates the
//! first time the record is publicly visible, keeps term counts current and
//! asks the indexer to reindex. Bookkeeping that must survive between runs
//! lives in a [`HousekeepingState`] row so that a retried unit picks up
//! where the failed one left off.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use folio_access::User;
use folio_events::EventError;
use folio_schema::{FieldQuery, UpdateMethod};
use folio_store::{
    decode, encode, AssociationStore, CatalogStore, MetadataStore, RecordTable, RowKind,
    SharedCaches, TermCount, TermStore, UserDirectory,
};
use folio_types::{AssociationKind, RecordId, StorageShape, TermId, UserId};

use crate::error::RecordResult;
use crate::record::{Record, WriteOrigin};
use crate::services::RecordServices;
use crate::shape;

/// Persisted bookkeeping for one record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingState {
    /// Anonymous visibility as of the last run.
    pub public: Option<bool>,
    /// Release updates have fired.
    pub released: bool,
    /// A field that triggers auto-updates changed since the last run.
    pub auto_update_pending: bool,
    /// Who made that change.
    pub acting_user: Option<UserId>,
    /// Terms whose counts need recomputing.
    pub stale_terms: Vec<TermId>,
}

impl HousekeepingState {
    pub fn load(store: &dyn MetadataStore, record: RecordId) -> RecordResult<Self> {
        match store.read_row(RowKind::RecordState, record.get())? {
            Some(bytes) => Ok(decode(&bytes)?),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn MetadataStore, record: RecordId) -> RecordResult<()> {
        store.write_row(RowKind::RecordState, record.get(), encode(self)?)?;
        Ok(())
    }

    pub(crate) fn note_terms(&mut self, terms: impl IntoIterator<Item = TermId>) {
        for term in terms {
            if !self.stale_terms.contains(&term) {
                self.stale_terms.push(term);
            }
        }
    }
}

/// What one run did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub auto_updated: usize,
    pub released: usize,
    pub recounted_terms: usize,
    pub visibility_changed: bool,
}

pub(crate) fn rekey_state(store: &dyn MetadataStore, from: RecordId, to: RecordId) -> RecordResult<()> {
    if let Some(bytes) = store.read_row(RowKind::RecordState, from.get())? {
        store.write_row(RowKind::RecordState, to.get(), bytes)?;
        store.delete_row(RowKind::RecordState, from.get())?;
    }
    Ok(())
}

pub(crate) fn delete_state(store: &dyn MetadataStore, record: RecordId) -> RecordResult<()> {
    store.delete_row(RowKind::RecordState, record.get())?;
    Ok(())
}

/// Queue a housekeeping run for a record, coalescing with any pending one.
pub(crate) fn enqueue(services: &RecordServices, record: RecordId) -> RecordResult<bool> {
    let key = services.config.housekeeping_key(record);
    let unit_services = services.clone();
    let unit_key = key.clone();
    let replaced = services.queue.enqueue_unique(
        &key,
        Box::new(move || {
            run(&unit_services, record)
                .map(|_| ())
                .map_err(|e| EventError::WorkFailed {
                    key: unit_key.clone(),
                    reason: e.to_string(),
                })
        }),
    )?;
    debug!(record = %record, replaced, "housekeeping queued");
    Ok(replaced)
}

/// Run housekeeping for a record now. Destroyed records are skipped.
pub fn run(services: &RecordServices, id: RecordId) -> RecordResult<HousekeepingReport> {
    let store = services.store.as_ref();
    let mut report = HousekeepingReport::default();
    if store.record_schema(id)?.is_none() {
        debug!(record = %id, "housekeeping skipped, record is gone");
        return Ok(report);
    }

    let before = HousekeepingState::load(store, id)?;
    let acting = match before.acting_user {
        Some(user) => User::logged_in(user, store.user_name(user)?.unwrap_or_default()),
        None => User::anonymous(),
    };
    let record = Record::load(services.clone(), id)?.with_user(acting);

    if before.auto_update_pending {
        report.auto_updated =
            record.apply_auto_updates(UpdateMethod::OnRecordChange, WriteOrigin::Housekeeping)?;
    }
    let public = record.can_view(&User::anonymous())?;
    let release = public && !before.released;
    if release {
        report.released =
            record.apply_auto_updates(UpdateMethod::OnRecordRelease, WriteOrigin::Housekeeping)?;
    }

    // Writes above may have added stale terms.
    let mut state = HousekeepingState::load(store, id)?;
    state.auto_update_pending = false;
    state.released |= release;
    report.visibility_changed = state.public != Some(public);
    let mut terms: BTreeSet<TermId> = state.stale_terms.drain(..).collect();
    if services.config.track_term_counts {
        if report.visibility_changed {
            terms.extend(current_terms(services, &record)?);
        }
        report.recounted_terms = terms.len();
        recount_terms(services, terms)?;
    }
    state.public = Some(public);
    state.save(store, id)?;

    if services.config.reindex_on_change {
        services.indexer.queue_reindex(id)?;
    }
    debug!(
        record = %id,
        auto_updated = report.auto_updated,
        released = report.released,
        recounted = report.recounted_terms,
        public,
        "housekeeping ran"
    );
    Ok(report)
}

fn current_terms(services: &RecordServices, record: &Record) -> RecordResult<Vec<TermId>> {
    let query = FieldQuery::new().with_disabled();
    let mut terms = Vec::new();
    for field in services.registry.get_fields(record.schema(), &query)? {
        if field.field_type.shape() == StorageShape::Terms {
            let ids = shape::stored_ids(services.store.as_ref(), record.id(), &field)?;
            terms.extend(ids.into_iter().map(TermId));
        }
    }
    Ok(terms)
}

/// Recompute usage counts for terms. Temporary records are not counted.
pub(crate) fn recount_terms(
    services: &RecordServices,
    terms: impl IntoIterator<Item = TermId>,
) -> RecordResult<()> {
    let store = services.store.as_ref();
    let anonymous = User::anonymous();
    for term in terms {
        let Some(row) = store.term(term)? else {
            continue;
        };
        let mut count = TermCount::default();
        for holder in store.records_with_target(AssociationKind::Term, Some(row.field), term.get())? {
            if holder.is_temporary() {
                continue;
            }
            count.total += 1;
            if Record::load(services.clone(), holder)?.can_view(&anonymous)? {
                count.public += 1;
            }
        }
        store.set_term_count(term, count)?;
    }
    Ok(())
}
