//! The record handle: typed field values for one record identity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use folio_access::{AccessError, RecordView, User};
use folio_events::{ChangeKind, ChangeScope};
use folio_schema::{AutoValue, DefaultValue, FieldDescriptor, FieldQuery, FieldRef, UpdateMethod};
use folio_store::{
    AssociationStore, CatalogStore, Comment, FieldStamp, IdSequence, RecordExtras, RecordTable,
    TermStore,
};
use folio_types::{
    AssociationKind, DateRange, FieldId, FieldType, FieldValue, QualifierId, RecordId, SchemaId,
    StorageShape, TermId, UserId, ValueInput,
};

use crate::error::{RecordError, RecordResult};
use crate::housekeeping::{self, HousekeepingState};
use crate::input::{self, Resolved};
use crate::services::RecordServices;
use crate::shape;

/// Where a record is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    /// Negative id, not yet visible or indexed.
    Temporary,
    Permanent,
    Destroyed,
}

impl RecordState {
    fn of(id: RecordId) -> Self {
        if id.is_temporary() {
            Self::Temporary
        } else {
            Self::Permanent
        }
    }

    /// Temporary records may become permanent; either may be destroyed.
    pub fn can_become(self, to: RecordState) -> bool {
        matches!(
            (self, to),
            (Self::Temporary, Self::Permanent)
                | (Self::Temporary, Self::Destroyed)
                | (Self::Permanent, Self::Destroyed)
        )
    }
}

/// How much detail [`Record::get`] returns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GetOptions {
    /// Fill in term qualifiers and parents.
    pub rich_objects: bool,
    /// With `rich_objects`, also return term variant spellings.
    pub include_variants: bool,
}

impl GetOptions {
    pub fn rich() -> Self {
        Self {
            rich_objects: true,
            include_variants: false,
        }
    }

    pub fn with_variants(mut self) -> Self {
        self.include_variants = true;
        self
    }
}

/// Qualifiers attached to a field's value on one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Qualifiers {
    /// One qualifier for the whole value.
    Field(Option<QualifierId>),
    /// One qualifier per term currently held.
    Items(BTreeMap<TermId, Option<QualifierId>>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteOrigin {
    /// A caller's write: full side effects.
    Caller,
    /// Defaults and creation-time updates: stamps only.
    Creation,
    /// Auto-updates run by housekeeping: no new housekeeping is queued.
    Housekeeping,
}

struct Change {
    kind: ChangeKind,
    payload: FieldValue,
    /// Term ids added or removed, for term-count upkeep.
    touched_terms: Vec<i64>,
}

/// Typed access to one record.
///
/// Reads are memoized per field and option set for the life of the
/// handle; every write through the handle drops the affected entries.
pub struct Record {
    id: RecordId,
    schema: SchemaId,
    state: RecordState,
    acting: User,
    services: RecordServices,
    reads: RwLock<HashMap<(FieldId, GetOptions), FieldValue>>,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .field("state", &self.state)
            .field("acting", &self.acting.id)
            .finish()
    }
}

impl Record {
    fn handle(services: RecordServices, id: RecordId, schema: SchemaId, acting: User) -> Self {
        Self {
            id,
            schema,
            state: RecordState::of(id),
            acting,
            services,
            reads: RwLock::new(HashMap::new()),
        }
    }

    /// Create a temporary record with field defaults and creation-time
    /// auto-updates applied.
    pub fn create(services: RecordServices, schema: SchemaId, acting: User) -> RecordResult<Self> {
        services.registry.schema(schema)?;
        let id = RecordId(services.store.allocate_id(IdSequence::Record, true)?);
        services.store.insert_record(schema, id)?;
        let record = Self::handle(services, id, schema, acting);

        let fields = record
            .services
            .registry
            .get_fields(schema, &FieldQuery::new())?;
        for field in &fields {
            if let Some(default) = &field.default {
                record.write(field, default_input(default), true, WriteOrigin::Creation)?;
            }
        }
        record.apply_auto_updates(UpdateMethod::OnRecordCreate, WriteOrigin::Creation)?;
        info!(record = %id, schema = %schema, "record created");
        Ok(record)
    }

    /// Open an existing record.
    pub fn load(services: RecordServices, id: RecordId) -> RecordResult<Self> {
        let schema = services
            .store
            .record_schema(id)?
            .ok_or(RecordError::UnknownRecord(id))?;
        Ok(Self::handle(services, id, schema, User::anonymous()))
    }

    /// Act as `user` for stamps, events and user-valued auto-updates.
    pub fn with_user(mut self, user: User) -> Self {
        self.acting = user;
        self
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn schema(&self) -> SchemaId {
        self.schema
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn acting_user(&self) -> &User {
        &self.acting
    }

    pub fn services(&self) -> &RecordServices {
        &self.services
    }

    fn ensure_live(&self) -> RecordResult<()> {
        if self.state == RecordState::Destroyed {
            return Err(RecordError::Destroyed(self.id));
        }
        Ok(())
    }

    fn check_transition(&self, to: RecordState) -> RecordResult<()> {
        if !self.state.can_become(to) {
            return Err(RecordError::IllegalTransition {
                record: self.id,
                from: self.state,
                to,
            });
        }
        Ok(())
    }

    /// Resolve a field reference within this record's schema.
    pub fn field(&self, field: impl Into<FieldRef>) -> RecordResult<Arc<FieldDescriptor>> {
        Ok(self.services.registry.get_field(field, Some(self.schema))?)
    }

    fn forget_reads(&self, field: FieldId) {
        self.reads
            .write()
            .expect("lock poisoned")
            .retain(|(f, _), _| *f != field);
    }

    // ---- Lifecycle ----

    /// Give a temporary record its permanent identity. Permanent records
    /// are left alone.
    pub fn make_permanent(&mut self) -> RecordResult<RecordId> {
        if self.state == RecordState::Permanent {
            return Ok(self.id);
        }
        self.check_transition(RecordState::Permanent)?;
        let store = self.services.store.as_ref();
        let old = self.id;
        let new = RecordId(store.allocate_id(IdSequence::Record, false)?);
        store.rekey_record(old, new)?;
        let links = store.rekey_record_associations(old, new)?;
        store.rekey_record_extras(old, new)?;
        housekeeping::rekey_state(store, old, new)?;
        self.services.evaluator.invalidate_record(old)?;

        self.id = new;
        self.state = RecordState::Permanent;
        self.reads.write().expect("lock poisoned").clear();
        housekeeping::enqueue(&self.services, new)?;
        info!(from = %old, record = %new, links, "record made permanent");
        Ok(new)
    }

    /// Remove the record and everything hanging off it.
    ///
    /// Cascades to associations (including inbound references from other
    /// records), owned file and image links, qualifiers, ratings, comments,
    /// field timestamps, the search index, cached permissions and pending
    /// housekeeping.
    pub fn destroy(&mut self) -> RecordResult<()> {
        self.check_transition(RecordState::Destroyed)?;
        let services = &self.services;
        let store = services.store.as_ref();
        let id = self.id;

        services.queue.cancel(&services.config.housekeeping_key(id))?;
        let owned = store.delete_record_associations(id)?;
        let terms: Vec<TermId> = owned
            .iter()
            .filter(|(kind, _, _)| *kind == AssociationKind::Term)
            .map(|(_, _, target)| TermId(*target))
            .collect();
        let children = owned
            .iter()
            .filter(|(kind, _, _)| matches!(kind, AssociationKind::File | AssociationKind::Image))
            .count();
        store.delete_record_extras(id)?;
        services.evaluator.invalidate_record(id)?;
        services.indexer.remove_from_index(id)?;
        housekeeping::delete_state(store, id)?;
        store.delete_record(id)?;
        if services.config.track_term_counts && !id.is_temporary() {
            housekeeping::recount_terms(services, terms)?;
        }

        self.state = RecordState::Destroyed;
        self.reads.write().expect("lock poisoned").clear();
        info!(record = %id, links = owned.len(), children, "record destroyed");
        Ok(())
    }

    // ---- Values ----

    /// The current value of a field. Unset fields read as the type's empty
    /// form.
    pub fn get(&self, field: impl Into<FieldRef>, options: GetOptions) -> RecordResult<FieldValue> {
        self.ensure_live()?;
        let field = self.field(field)?;
        if let Some(hit) = self
            .reads
            .read()
            .expect("lock poisoned")
            .get(&(field.id, options))
        {
            return Ok(hit.clone());
        }
        let value = shape::read(self.services.store.as_ref(), self.id, &field, options)?;
        self.reads
            .write()
            .expect("lock poisoned")
            .insert((field.id, options), value.clone());
        Ok(value)
    }

    /// Write a field. Returns `false` when the stored value was already
    /// equal, in which case nothing is stamped, published or queued.
    ///
    /// Multi-valued fields append unless `reset` is set; single-valued
    /// set fields keep the first of several inputs.
    pub fn set(
        &self,
        field: impl Into<FieldRef>,
        value: impl Into<ValueInput>,
        reset: bool,
    ) -> RecordResult<bool> {
        self.ensure_live()?;
        let field = self.field(field)?;
        self.write(&field, value.into(), reset, WriteOrigin::Caller)
    }

    /// Clear a field, or only the given items of a set-valued field.
    /// Scalar fields ignore `subset` and are cleared entirely.
    pub fn clear(&self, field: impl Into<FieldRef>, subset: Option<ValueInput>) -> RecordResult<bool> {
        self.ensure_live()?;
        let field = self.field(field)?;
        let store = self.services.store.as_ref();

        let change = if field.field_type.is_set_valued() {
            let current = shape::stored_ids(store, self.id, &field)?;
            let (kind, removed) = match subset {
                None => (ChangeKind::Clear, current),
                Some(items) => {
                    let Resolved::Ids(wanted) = input::resolve(store, &field, items)? else {
                        return Ok(false);
                    };
                    let removed: Vec<i64> = current.into_iter().filter(|id| wanted.contains(id)).collect();
                    (ChangeKind::Remove, removed)
                }
            };
            if removed.is_empty() {
                return Ok(false);
            }
            shape::write_ids(store, self.id, &field, &[], &removed)?;
            Change {
                kind,
                payload: shape::hydrate(store, self.id, &field, &removed, GetOptions::default())?,
                touched_terms: term_ids(&field, &removed),
            }
        } else {
            let current = shape::read(store, self.id, &field, GetOptions::default())?;
            if current.is_empty() {
                return Ok(false);
            }
            shape::write_columns(store, self.id, &field, &FieldValue::empty(field.field_type))?;
            Change {
                kind: ChangeKind::Clear,
                payload: current,
                touched_terms: Vec::new(),
            }
        };
        self.after_write(&field, change, WriteOrigin::Caller)?;
        Ok(true)
    }

    pub(crate) fn write(
        &self,
        field: &FieldDescriptor,
        value: ValueInput,
        reset: bool,
        origin: WriteOrigin,
    ) -> RecordResult<bool> {
        let store = self.services.store.as_ref();
        let change = match input::resolve(store, field, value)? {
            Resolved::Value(value) => {
                let current = shape::read(store, self.id, field, GetOptions::default())?;
                if current == value {
                    return Ok(false);
                }
                shape::write_columns(store, self.id, field, &value)?;
                if value.is_empty() {
                    Change {
                        kind: ChangeKind::Clear,
                        payload: current,
                        touched_terms: Vec::new(),
                    }
                } else {
                    Change {
                        kind: ChangeKind::Set,
                        payload: value,
                        touched_terms: Vec::new(),
                    }
                }
            }
            Resolved::Ids(mut ids) => {
                let multiple = field.allows_multiple();
                if !multiple {
                    ids.truncate(1);
                }
                let current = shape::stored_ids(store, self.id, field)?;
                let appending = multiple && !reset;
                let target: Vec<i64> = if appending {
                    let mut all = current.clone();
                    all.extend(ids.iter().filter(|id| !current.contains(*id)));
                    all
                } else {
                    ids
                };
                let added: Vec<i64> = target.iter().filter(|id| !current.contains(*id)).copied().collect();
                let removed: Vec<i64> = current.iter().filter(|id| !target.contains(*id)).copied().collect();
                if added.is_empty() && removed.is_empty() {
                    return Ok(false);
                }
                shape::write_ids(store, self.id, field, &added, &removed)?;

                let (kind, shown) = if appending {
                    (ChangeKind::Add, &added)
                } else if target.is_empty() {
                    (ChangeKind::Clear, &removed)
                } else {
                    (ChangeKind::Set, &target)
                };
                let mut touched = added.clone();
                touched.extend(&removed);
                Change {
                    kind,
                    payload: shape::hydrate(store, self.id, field, shown, GetOptions::default())?,
                    touched_terms: term_ids(field, &touched),
                }
            }
        };
        self.after_write(field, change, origin)?;
        Ok(true)
    }

    fn after_write(&self, field: &FieldDescriptor, change: Change, origin: WriteOrigin) -> RecordResult<()> {
        let services = &self.services;
        let store = services.store.as_ref();
        self.forget_reads(field.id);
        store.set_field_stamp(
            self.id,
            field.id,
            FieldStamp {
                at: Utc::now(),
                user: self.acting.id,
            },
        )?;
        debug!(record = %self.id, field = %field.id, kind = %change.kind, ?origin, "field written");
        if origin == WriteOrigin::Creation {
            return Ok(());
        }

        services.notifier.publish(
            change.kind,
            ChangeScope::new(self.schema, field.id, self.id),
            change.payload,
            self.acting.id,
        );
        if services.registry.viewing_rule_references(self.schema, field.id)? {
            services.evaluator.invalidate_record(self.id)?;
        }

        let triggers = origin == WriteOrigin::Caller && field.config.triggers_auto_updates;
        if triggers || !change.touched_terms.is_empty() {
            let mut state = HousekeepingState::load(store, self.id)?;
            state.note_terms(change.touched_terms.into_iter().map(TermId));
            if triggers {
                state.auto_update_pending = true;
                state.acting_user = self.acting.id;
            }
            state.save(store, self.id)?;
        }
        if origin == WriteOrigin::Caller && self.state == RecordState::Permanent {
            housekeeping::enqueue(services, self.id)?;
        }
        Ok(())
    }

    // ---- Qualifiers ----

    pub fn get_qualifier(&self, field: impl Into<FieldRef>) -> RecordResult<Qualifiers> {
        self.ensure_live()?;
        let field = self.field(field)?;
        let store = self.services.store.as_ref();
        if shape::item_level(&field) {
            let mut items = BTreeMap::new();
            for id in shape::stored_ids(store, self.id, &field)? {
                let qualifier = store
                    .term(TermId(id))?
                    .and_then(|row| row.qualifier)
                    .or(field.config.default_qualifier);
                items.insert(TermId(id), qualifier);
            }
            return Ok(Qualifiers::Items(items));
        }
        Ok(Qualifiers::Field(shape::field_qualifier(store, self.id, &field)?))
    }

    /// Set a qualifier. Item-level fields qualify one term (shared by every
    /// record holding it) and need `item`; other fields qualify this
    /// record's value.
    pub fn set_qualifier(
        &self,
        field: impl Into<FieldRef>,
        item: Option<TermId>,
        qualifier: Option<QualifierId>,
    ) -> RecordResult<()> {
        self.ensure_live()?;
        let field = self.field(field)?;
        let store = self.services.store.as_ref();
        if !field.config.uses_qualifiers {
            return Err(RecordError::invalid(field.id, "field does not use qualifiers"));
        }
        if let Some(q) = qualifier {
            let allowed = &field.config.allowed_qualifiers;
            if !allowed.is_empty() && !allowed.contains(&q) {
                return Err(RecordError::invalid(field.id, format!("{q} is not an allowed qualifier")));
            }
        }
        if shape::item_level(&field) {
            let term = item.ok_or_else(|| RecordError::invalid(field.id, "item-level qualifiers need a term"))?;
            let mut row = store
                .term(term)?
                .filter(|row| row.field == field.id)
                .ok_or_else(|| RecordError::invalid(field.id, format!("no term {term} in this field")))?;
            row.qualifier = qualifier;
            store.update_term(row)?;
        } else {
            store.set_record_qualifier(self.id, field.id, qualifier)?;
        }
        self.forget_reads(field.id);
        Ok(())
    }

    /// Who last changed a field, and when.
    pub fn field_timestamp(&self, field: impl Into<FieldRef>) -> RecordResult<Option<FieldStamp>> {
        self.ensure_live()?;
        let field = self.field(field)?;
        Ok(self.services.store.field_stamp(self.id, field.id)?)
    }

    // ---- Auto-updates ----

    /// Run the edit-time updates, as done when a record is saved from an
    /// edit form. Returns how many fields changed.
    pub fn apply_edit_updates(&self) -> RecordResult<usize> {
        self.ensure_live()?;
        self.apply_auto_updates(UpdateMethod::OnRecordEdit, WriteOrigin::Caller)
    }

    /// Run the update of a field whose update method is `Button`.
    pub fn apply_manual_update(&self, field: impl Into<FieldRef>) -> RecordResult<bool> {
        self.ensure_live()?;
        let field = self.field(field)?;
        if field.config.update_method != UpdateMethod::Button {
            return Err(RecordError::invalid(field.id, "field is not updated on request"));
        }
        self.apply_auto_value(&field, WriteOrigin::Caller)
    }

    pub(crate) fn apply_auto_updates(&self, method: UpdateMethod, origin: WriteOrigin) -> RecordResult<usize> {
        let fields = self
            .services
            .registry
            .get_fields(self.schema, &FieldQuery::new())?;
        let mut changed = 0;
        for field in fields.iter().filter(|f| f.config.update_method == method) {
            if self.apply_auto_value(field, origin)? {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(record = %self.id, ?method, changed, "auto-updates applied");
        }
        Ok(changed)
    }

    fn apply_auto_value(&self, field: &FieldDescriptor, origin: WriteOrigin) -> RecordResult<bool> {
        let Some(auto) = field.config.auto_value else {
            return Ok(false);
        };
        let value = match auto {
            AutoValue::Now => {
                let now = Utc::now();
                if field.field_type == FieldType::Date {
                    ValueInput::Date(DateRange::instant(now))
                } else {
                    ValueInput::Timestamp(now)
                }
            }
            AutoValue::ActingUser => match self.acting.id {
                Some(user) => ValueInput::Id(user.get()),
                None => return Ok(false),
            },
            AutoValue::Increment => {
                let current = shape::read(self.services.store.as_ref(), self.id, field, GetOptions::default())?;
                ValueInput::Number(current.as_number().unwrap_or(0) + 1)
            }
            AutoValue::Default => match &field.default {
                Some(default) => default_input(default),
                None => return Ok(false),
            },
        };
        self.write(field, value, true, origin)
    }

    // ---- Ratings and comments ----

    /// Record one user's rating, replacing any earlier one.
    pub fn rate(&self, user: UserId, score: u8) -> RecordResult<()> {
        self.ensure_live()?;
        if score > 100 {
            return Err(RecordError::InvalidRating(score));
        }
        self.services.store.set_rating(self.id, user, score)?;
        debug!(record = %self.id, user = %user, score, "record rated");
        Ok(())
    }

    /// Mean of all ratings, rounded. `None` until someone rates.
    pub fn cumulative_rating(&self) -> RecordResult<Option<u8>> {
        self.ensure_live()?;
        let ratings = self.services.store.ratings(self.id)?;
        if ratings.is_empty() {
            return Ok(None);
        }
        let n = ratings.len() as u32;
        let sum: u32 = ratings.values().map(|s| u32::from(*s)).sum();
        Ok(Some(((sum + n / 2) / n) as u8))
    }

    pub fn rating_count(&self) -> RecordResult<usize> {
        self.ensure_live()?;
        Ok(self.services.store.ratings(self.id)?.len())
    }

    pub fn add_comment(&self, user: UserId, text: &str) -> RecordResult<Comment> {
        self.ensure_live()?;
        Ok(self.services.store.add_comment(self.id, user, Utc::now(), text)?)
    }

    pub fn comments(&self) -> RecordResult<Vec<Comment>> {
        self.ensure_live()?;
        Ok(self.services.store.comments(self.id)?)
    }

    // ---- Permissions ----

    pub fn can_view(&self, user: &User) -> RecordResult<bool> {
        let schema = self.services.registry.schema(self.schema)?;
        Ok(self.services.evaluator.can_view_record(user, &schema.rules(), self)?)
    }

    pub fn can_edit(&self, user: &User) -> RecordResult<bool> {
        let schema = self.services.registry.schema(self.schema)?;
        Ok(self.services.evaluator.can_edit_record(user, &schema.rules(), self)?)
    }

    pub fn can_view_field(&self, user: &User, field: impl Into<FieldRef>) -> RecordResult<bool> {
        let field = self.field(field)?;
        let schema = self.services.registry.schema(self.schema)?;
        Ok(self
            .services
            .evaluator
            .can_view_field(user, &schema.rules(), &field.rules(), self)?)
    }

    pub fn can_edit_field(&self, user: &User, field: impl Into<FieldRef>) -> RecordResult<bool> {
        let field = self.field(field)?;
        let schema = self.services.registry.schema(self.schema)?;
        Ok(self
            .services
            .evaluator
            .can_edit_field(user, &schema.rules(), &field.rules(), self)?)
    }
}

impl RecordView for Record {
    fn record_id(&self) -> RecordId {
        self.id
    }

    fn schema_id(&self) -> SchemaId {
        self.schema
    }

    fn field_value(&self, field: FieldId) -> Result<FieldValue, AccessError> {
        self.get(field, GetOptions::default())
            .map_err(|e| AccessError::FieldUnavailable {
                field,
                reason: e.to_string(),
            })
    }
}

fn term_ids(field: &FieldDescriptor, ids: &[i64]) -> Vec<i64> {
    if field.field_type.shape() == StorageShape::Terms {
        ids.to_vec()
    } else {
        Vec::new()
    }
}

fn default_input(default: &DefaultValue) -> ValueInput {
    match default {
        DefaultValue::Text(s) => ValueInput::Text(s.clone()),
        DefaultValue::Number(n) => ValueInput::Number(*n),
        DefaultValue::Flag(b) => ValueInput::Flag(*b),
        DefaultValue::Point(p) => ValueInput::Point(*p),
        DefaultValue::Terms(ids) => ValueInput::Many(ids.iter().map(|t| ValueInput::Id(t.get())).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use folio_access::{Condition, PrivilegeSet};
    use folio_events::{ChangeEvent, ChangeFilter, TaskQueue};
    use folio_schema::{Attribute, PrivilegeLevel};
    use folio_store::UserDirectory;
    use folio_types::{FileId, Point, TermKind};

    use crate::testing::Fixture;

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn permanent(fx: &Fixture) -> Record {
        let mut record = Record::create(fx.services.clone(), fx.schema, User::anonymous()).unwrap();
        record.make_permanent().unwrap();
        record
    }

    fn capture(fx: &Fixture, record: RecordId) -> Arc<Mutex<Vec<ChangeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        fx.services
            .notifier
            .observe(ChangeFilter::record(record), move |e| sink.lock().unwrap().push(e.clone()));
        seen
    }

    fn terms(fx: &Fixture, field: &FieldDescriptor, names: &[&str]) -> Vec<TermId> {
        names
            .iter()
            .map(|n| fx.store.create_term(field.id, TermKind::Flat, n, None).unwrap())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[test]
    fn state_machine_is_one_way() {
        use RecordState::*;
        assert!(Temporary.can_become(Permanent));
        assert!(Temporary.can_become(Destroyed));
        assert!(Permanent.can_become(Destroyed));
        assert!(!Permanent.can_become(Temporary));
        assert!(!Destroyed.can_become(Permanent));
        assert!(!Destroyed.can_become(Destroyed));
    }

    #[test]
    fn make_permanent_keeps_values() {
        let fx = Fixture::new();
        let title = fx.field(FieldType::Text, "Title");
        let subject = fx.field(FieldType::ControlledName, "Subject");
        terms(&fx, &subject, &["Alpha"]);

        let mut record = Record::create(fx.services.clone(), fx.schema, User::anonymous()).unwrap();
        assert_eq!(record.state(), RecordState::Temporary);
        assert!(record.id().is_temporary());
        record.set(title.id, "Draft", false).unwrap();
        record.set(subject.id, "Alpha", false).unwrap();
        let old = record.id();

        let new = record.make_permanent().unwrap();
        assert!(!new.is_temporary());
        assert_eq!(record.state(), RecordState::Permanent);
        assert_eq!(record.get("Title", GetOptions::default()).unwrap().as_text(), Some("Draft"));
        assert_eq!(
            record.get("Subject", GetOptions::default()).unwrap().term_names(),
            BTreeSet::from(["Alpha".to_string()])
        );
        assert!(matches!(
            Record::load(fx.services.clone(), old),
            Err(RecordError::UnknownRecord(_))
        ));
        // Permanent records stay put.
        assert_eq!(record.make_permanent().unwrap(), new);
        assert_eq!(fx.queue.keys(), vec![fx.services.config.housekeeping_key(new)]);
    }

    #[test]
    fn destroy_cascades() {
        let fx = Fixture::new();
        let scans = fx.field(FieldType::File, "Scans");
        let related = fx.field(FieldType::Reference, "Related");
        let subject = fx.field(FieldType::ControlledName, "Subject");
        terms(&fx, &subject, &["Alpha"]);

        let mut doomed = permanent(&fx);
        doomed.set(scans.id, ValueInput::Id(40), false).unwrap();
        doomed.set(subject.id, "Alpha", false).unwrap();
        doomed.rate(UserId(1), 80).unwrap();
        doomed.add_comment(UserId(1), "nice").unwrap();

        let other = permanent(&fx);
        other.set(related.id, ValueInput::Id(doomed.id().get()), false).unwrap();
        assert_eq!(other.get(related.id, GetOptions::default()).unwrap().ids(), vec![doomed.id().get()]);

        let id = doomed.id();
        doomed.destroy().unwrap();
        assert_eq!(doomed.state(), RecordState::Destroyed);
        assert!(fx.store.record_schema(id).unwrap().is_none());
        assert!(fx.store.comments(id).unwrap().is_empty());
        assert!(fx.store.ratings(id).unwrap().is_empty());
        assert!(!fx.queue.is_pending(&fx.services.config.housekeeping_key(id)));
        assert_eq!(fx.indexer.removed(), vec![id]);

        // Inbound references are gone too.
        let reopened = Record::load(fx.services.clone(), other.id()).unwrap();
        assert!(reopened.get(related.id, GetOptions::default()).unwrap().is_empty());

        assert!(matches!(doomed.get(scans.id, GetOptions::default()), Err(RecordError::Destroyed(_))));
        assert!(matches!(doomed.destroy(), Err(RecordError::IllegalTransition { .. })));
        assert!(matches!(doomed.make_permanent(), Err(RecordError::IllegalTransition { .. })));
    }

    #[test]
    fn creation_applies_defaults_and_create_updates() {
        let fx = Fixture::new();
        let registry = &fx.services.registry;
        let status = registry
            .create_field(fx.schema, FieldType::Text, "Status", true, Some("Draft".into()))
            .unwrap();
        registry.make_permanent(status.id).unwrap();
        let added = fx.field_with(
            FieldType::Timestamp,
            "Date Added",
            vec![
                Attribute::AutoValue(Some(AutoValue::Now)),
                Attribute::UpdateMethod(UpdateMethod::OnRecordCreate),
            ],
        );
        let creator = fx.field_with(
            FieldType::User,
            "Added By",
            vec![
                Attribute::AutoValue(Some(AutoValue::ActingUser)),
                Attribute::UpdateMethod(UpdateMethod::OnRecordCreate),
            ],
        );
        fx.store.register_user(UserId(5), "Ada").unwrap();

        let seen_before = fx.store.permission_row_count();
        let record = Record::create(fx.services.clone(), fx.schema, User::logged_in(UserId(5), "Ada")).unwrap();
        assert_eq!(record.get("Status", GetOptions::default()).unwrap().as_text(), Some("Draft"));
        assert!(record.get(added.id, GetOptions::default()).unwrap().as_timestamp().is_some());
        assert!(record.get(creator.id, GetOptions::default()).unwrap().contains_user(UserId(5)));
        assert_eq!(record.field_timestamp("Status").unwrap().unwrap().user, Some(UserId(5)));
        // Creation writes stay quiet.
        assert!(fx.queue.is_empty());
        assert_eq!(fx.store.permission_row_count(), seen_before);
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    #[test]
    fn point_round_trip() {
        let fx = Fixture::new();
        let place = fx.field(FieldType::Point, "Location");
        let record = permanent(&fx);
        let p = Point { x: 1.5, y: 2.25 };
        assert!(record.set(place.id, p, false).unwrap());
        assert_eq!(record.get(place.id, GetOptions::default()).unwrap(), FieldValue::Point(Some(p)));
    }

    #[test]
    fn unchanged_value_is_a_no_op() {
        let fx = Fixture::new();
        let title = fx.field(FieldType::Text, "Title");
        let record = permanent(&fx);
        record.set(title.id, "Same", false).unwrap();
        let stamp = record.field_timestamp(title.id).unwrap();
        fx.queue.drain();
        let seen = capture(&fx, record.id());

        assert!(!record.set(title.id, "Same", false).unwrap());
        assert!(seen.lock().unwrap().is_empty());
        assert!(fx.queue.is_empty());
        assert_eq!(record.field_timestamp(title.id).unwrap(), stamp);
    }

    #[test]
    fn single_valued_set_keeps_first() {
        let fx = Fixture::new();
        let kind = fx.field(FieldType::Option, "Kind");
        let ids = terms(&fx, &kind, &["Alpha", "Beta"]);
        let record = permanent(&fx);

        record.set(kind.id, vec!["Beta", "Alpha"], false).unwrap();
        assert_eq!(record.get(kind.id, GetOptions::default()).unwrap().ids(), vec![ids[1].get()]);
        record.set(kind.id, "Alpha", false).unwrap();
        assert_eq!(record.get(kind.id, GetOptions::default()).unwrap().ids(), vec![ids[0].get()]);
    }

    #[test]
    fn scalar_set_keeps_first() {
        let fx = Fixture::new();
        let year = fx.field(FieldType::Number, "Year");
        let title = fx.field(FieldType::Text, "Title");
        let record = permanent(&fx);

        assert!(record.set(year.id, vec![1999i64, 2004], false).unwrap());
        assert_eq!(record.get(year.id, GetOptions::default()).unwrap().as_number(), Some(1999));
        record.set(title.id, vec!["First", "Second"], true).unwrap();
        assert_eq!(record.get(title.id, GetOptions::default()).unwrap().as_text(), Some("First"));
    }

    #[test]
    fn append_reset_and_events() {
        let fx = Fixture::new();
        let subject = fx.field(FieldType::ControlledName, "Subject");
        let ids = terms(&fx, &subject, &["Alpha", "Beta", "Gamma"]);
        let record = permanent(&fx);
        let seen = capture(&fx, record.id());

        record.set(subject.id, vec!["Alpha", "Beta"], false).unwrap();
        record.set(subject.id, "Gamma", false).unwrap();
        assert_eq!(record.get(subject.id, GetOptions::default()).unwrap().ids().len(), 3);
        record.set(subject.id, "Beta", true).unwrap();
        assert_eq!(record.get(subject.id, GetOptions::default()).unwrap().ids(), vec![ids[1].get()]);

        let events = seen.lock().unwrap();
        let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Add, ChangeKind::Add, ChangeKind::Set]);
        assert_eq!(events[1].payload.term_names(), BTreeSet::from(["Gamma".to_string()]));
    }

    #[test]
    fn clear_all_or_subset() {
        let fx = Fixture::new();
        let subject = fx.field(FieldType::ControlledName, "Subject");
        let title = fx.field(FieldType::Text, "Title");
        terms(&fx, &subject, &["Alpha", "Beta"]);
        let record = permanent(&fx);
        record.set(subject.id, vec!["Alpha", "Beta"], false).unwrap();
        record.set(title.id, "Hello", false).unwrap();
        let seen = capture(&fx, record.id());

        assert!(record.clear(subject.id, Some("Alpha".into())).unwrap());
        assert_eq!(
            record.get(subject.id, GetOptions::default()).unwrap().term_names(),
            BTreeSet::from(["Beta".to_string()])
        );
        assert!(record.clear(title.id, None).unwrap());
        assert!(!record.clear(title.id, None).unwrap());
        assert_eq!(record.get(title.id, GetOptions::default()).unwrap(), FieldValue::Text(None));

        let events = seen.lock().unwrap();
        assert_eq!(events[0].kind, ChangeKind::Remove);
        assert_eq!(events[1].kind, ChangeKind::Clear);
        assert_eq!(events[1].payload.as_text(), Some("Hello"));
    }

    #[test]
    fn foreign_fields_and_bad_input_are_rejected() {
        let fx = Fixture::new();
        let photos = fx.services.registry.create_schema("Photos").unwrap();
        let caption = fx.services.registry.create_field(photos.id, FieldType::Text, "Caption", true, None).unwrap();
        let subject = fx.field(FieldType::ControlledName, "Subject");
        let record = permanent(&fx);

        assert!(matches!(
            record.get(caption.id, GetOptions::default()),
            Err(RecordError::CrossSchema { .. })
        ));
        assert!(matches!(
            record.set(subject.id, "Nowhere", false),
            Err(RecordError::InvalidValue { .. })
        ));
        assert!(matches!(
            record.get("Missing", GetOptions::default()),
            Err(RecordError::Schema(_))
        ));
    }

    #[test]
    fn temporary_fields_store_associations_only() {
        let fx = Fixture::new();
        let registry = &fx.services.registry;
        let draft_text = registry.create_field(fx.schema, FieldType::Text, "Draft Note", true, None).unwrap();
        let draft_files = registry.create_field(fx.schema, FieldType::File, "Draft Files", true, None).unwrap();
        let record = permanent(&fx);

        assert!(matches!(
            record.set(draft_text.id, "x", false),
            Err(RecordError::InvalidValue { .. })
        ));
        record.set(draft_files.id, ValueInput::Id(3), false).unwrap();
        assert_eq!(
            record.get(draft_files.id, GetOptions::default()).unwrap(),
            FieldValue::Files(vec![FileId(3)])
        );
    }

    #[test]
    fn reads_are_memoized_until_written() {
        let fx = Fixture::new();
        let count = fx.field(FieldType::Number, "Count");
        let record = permanent(&fx);
        record.set(count.id, 1i64, false).unwrap();
        assert_eq!(record.get(count.id, GetOptions::default()).unwrap().as_number(), Some(1));

        // A write that bypasses the handle is not seen.
        fx.store.write_cell(record.id(), &count.storage_name, folio_store::Cell::Integer(9)).unwrap();
        assert_eq!(record.get(count.id, GetOptions::default()).unwrap().as_number(), Some(1));

        record.set(count.id, 2i64, false).unwrap();
        assert_eq!(record.get(count.id, GetOptions::default()).unwrap().as_number(), Some(2));
    }

    // ------------------------------------------------------------------
    // Qualifiers
    // ------------------------------------------------------------------

    #[test]
    fn record_level_qualifiers() {
        let fx = Fixture::new();
        let title = fx.field_with(
            FieldType::Text,
            "Title",
            vec![
                Attribute::UsesQualifiers(true),
                Attribute::DefaultQualifier(Some(QualifierId(1))),
                Attribute::AllowedQualifiers(vec![QualifierId(1), QualifierId(2)]),
            ],
        );
        let plain = fx.field(FieldType::Text, "Plain");
        let record = permanent(&fx);

        assert_eq!(record.get_qualifier(title.id).unwrap(), Qualifiers::Field(Some(QualifierId(1))));
        record.set_qualifier(title.id, None, Some(QualifierId(2))).unwrap();
        assert_eq!(record.get_qualifier(title.id).unwrap(), Qualifiers::Field(Some(QualifierId(2))));
        assert!(record.set_qualifier(title.id, None, Some(QualifierId(3))).is_err());
        assert!(record.set_qualifier(plain.id, None, Some(QualifierId(1))).is_err());
    }

    #[test]
    fn item_level_qualifiers() {
        let fx = Fixture::new();
        let subject = fx.field_with(
            FieldType::ControlledName,
            "Subject",
            vec![Attribute::UsesQualifiers(true), Attribute::ItemLevelQualifiers(true)],
        );
        let ids = terms(&fx, &subject, &["Alpha", "Beta"]);
        let record = permanent(&fx);
        record.set(subject.id, vec!["Alpha", "Beta"], false).unwrap();

        record.set_qualifier(subject.id, Some(ids[0]), Some(QualifierId(7))).unwrap();
        let Qualifiers::Items(items) = record.get_qualifier(subject.id).unwrap() else {
            panic!("expected per-item qualifiers");
        };
        assert_eq!(items[&ids[0]], Some(QualifierId(7)));
        assert_eq!(items[&ids[1]], None);
        assert!(record.set_qualifier(subject.id, None, Some(QualifierId(7))).is_err());

        let FieldValue::Terms(rich) = record.get(subject.id, GetOptions::rich()).unwrap() else {
            panic!("expected terms");
        };
        assert_eq!(rich[0].qualifier, Some(QualifierId(7)));
    }

    // ------------------------------------------------------------------
    // Auto-updates, ratings, comments, permissions
    // ------------------------------------------------------------------

    #[test]
    fn edit_and_manual_updates() {
        let fx = Fixture::new();
        let edited = fx.field_with(
            FieldType::Number,
            "Edits",
            vec![
                Attribute::AutoValue(Some(AutoValue::Increment)),
                Attribute::UpdateMethod(UpdateMethod::OnRecordEdit),
            ],
        );
        let button = fx.field_with(
            FieldType::Number,
            "Clicks",
            vec![
                Attribute::AutoValue(Some(AutoValue::Increment)),
                Attribute::UpdateMethod(UpdateMethod::Button),
            ],
        );
        let record = permanent(&fx);

        assert_eq!(record.apply_edit_updates().unwrap(), 1);
        assert_eq!(record.apply_edit_updates().unwrap(), 1);
        assert_eq!(record.get(edited.id, GetOptions::default()).unwrap().as_number(), Some(2));

        assert!(record.apply_manual_update(button.id).unwrap());
        assert_eq!(record.get(button.id, GetOptions::default()).unwrap().as_number(), Some(1));
        assert!(matches!(
            record.apply_manual_update(edited.id),
            Err(RecordError::InvalidValue { .. })
        ));
    }

    #[test]
    fn ratings_and_comments() {
        let fx = Fixture::new();
        let record = permanent(&fx);
        assert_eq!(record.cumulative_rating().unwrap(), None);
        record.rate(UserId(1), 80).unwrap();
        record.rate(UserId(2), 61).unwrap();
        record.rate(UserId(1), 90).unwrap();
        assert_eq!(record.rating_count().unwrap(), 2);
        assert_eq!(record.cumulative_rating().unwrap(), Some(76));
        assert!(matches!(record.rate(UserId(3), 101), Err(RecordError::InvalidRating(101))));

        record.add_comment(UserId(2), "first").unwrap();
        record.add_comment(UserId(1), "second").unwrap();
        let texts: Vec<String> = record.comments().unwrap().into_iter().map(|c| c.text).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[test]
    fn viewing_rule_field_change_drops_cached_rows() {
        let fx = Fixture::new();
        let published = fx.field(FieldType::Flag, "Published");
        let title = fx.field(FieldType::Text, "Title");
        fx.services
            .registry
            .set_schema_privileges(
                fx.schema,
                PrivilegeLevel::Viewing,
                PrivilegeSet::open().with(Condition::FieldFlag {
                    field: published.id,
                    expected: true,
                }),
            )
            .unwrap();
        let record = permanent(&fx);
        let anonymous = User::anonymous();

        assert!(!record.can_view(&anonymous).unwrap());
        assert_eq!(fx.store.permission_row_count(), 1);

        record.set(title.id, "Unrelated", false).unwrap();
        assert_eq!(fx.store.permission_row_count(), 1);

        record.set(published.id, true, false).unwrap();
        assert_eq!(fx.store.permission_row_count(), 0);
        assert!(record.can_view(&anonymous).unwrap());
        assert!(record.can_view_field(&anonymous, title.id).unwrap());
    }
}
