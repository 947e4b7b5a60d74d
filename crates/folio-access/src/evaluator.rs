use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use folio_store::{MetadataStore, PermissionRow, SharedCaches};
use folio_types::{FieldId, RecordId, SchemaId};

use crate::error::AccessResult;
use crate::privilege::{PrivilegeRequirements, RecordView};
use crate::user::{User, UserClass};

/// Configuration for the [`PermissionEvaluator`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Persist class-keyed view results in the shared permission table.
    pub persist_view_results: bool,
    /// Upper bound on the lifetime of a persisted row, in seconds. Rows also
    /// expire earlier when a time-based rule says so.
    pub max_row_age_secs: Option<u64>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            persist_view_results: true,
            max_row_age_secs: None,
        }
    }
}

/// The schema-level rules a check cascades from.
#[derive(Clone, Copy)]
pub struct SchemaRules<'a> {
    pub schema: SchemaId,
    pub viewing: &'a dyn PrivilegeRequirements,
    pub editing: &'a dyn PrivilegeRequirements,
    pub authoring: &'a dyn PrivilegeRequirements,
}

/// The field-level rules and switches layered on top of [`SchemaRules`].
#[derive(Clone, Copy)]
pub struct FieldRules<'a> {
    pub field: FieldId,
    pub viewing: &'a dyn PrivilegeRequirements,
    pub editing: &'a dyn PrivilegeRequirements,
    pub authoring: &'a dyn PrivilegeRequirements,
    pub enabled: bool,
    pub editable: bool,
}

/// Counters exposed for diagnostics and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvaluatorStats {
    /// View checks answered from a persisted row.
    pub shared_hits: u64,
    /// View checks answered from the per-user batch cache.
    pub batch_hits: u64,
    /// View checks that evaluated the rule.
    pub evaluations: u64,
}

/// Cascading view/edit/author checks with class-keyed caching.
///
/// Record view results are the expensive, frequently repeated question, so
/// they are cached: per user class in the store's shared permission table,
/// or per user in a process-local batch cache when the viewing rule
/// compares against the acting user. The batch cache lives until
/// [`PermissionEvaluator::end_batch`].
pub struct PermissionEvaluator {
    store: Arc<dyn MetadataStore>,
    config: AccessConfig,
    batch: RwLock<HashMap<(RecordId, String), bool>>,
    shared_hits: AtomicU64,
    batch_hits: AtomicU64,
    evaluations: AtomicU64,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn MetadataStore>, config: AccessConfig) -> Self {
        Self {
            store,
            config,
            batch: RwLock::new(HashMap::new()),
            shared_hits: AtomicU64::new(0),
            batch_hits: AtomicU64::new(0),
            evaluations: AtomicU64::new(0),
        }
    }

    /// The class a user falls into for a schema's viewing rule.
    pub fn user_class(&self, user: &User, schema: SchemaId, viewing: &dyn PrivilegeRequirements) -> UserClass {
        if viewing.compares_user() {
            return UserClass::PerUser(user.id);
        }
        let flags: BTreeSet<String> = viewing.required_flags();
        UserClass::derive(schema, user, &flags, viewing.checks_login())
    }

    pub fn can_view_record(&self, user: &User, rules: &SchemaRules<'_>, record: &dyn RecordView) -> AccessResult<bool> {
        let now = Utc::now();
        let class = self.user_class(user, rules.schema, rules.viewing);
        let key = class.key();
        let id = record.record_id();

        if class.is_per_user() {
            if let Some(hit) = self.batch.read().expect("lock poisoned").get(&(id, key.clone())) {
                self.batch_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(*hit);
            }
        } else if self.config.persist_view_results {
            if let Some(row) = self.store.permission(id, &key)? {
                if row.is_live_at(now) {
                    self.shared_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(row.can_view);
                }
            }
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let can_view = rules.viewing.meets_requirements(user, Some(record), now)?;
        if class.is_per_user() {
            self.batch
                .write()
                .expect("lock poisoned")
                .insert((id, key), can_view);
        } else if self.config.persist_view_results {
            let expires_at = self.row_expiry(rules.viewing, record, now)?;
            self.store.set_permission(id, &key, PermissionRow { can_view, expires_at })?;
            debug!(record = %id, class = %key, can_view, ?expires_at, "view permission cached");
        }
        Ok(can_view)
    }

    /// Editing a record also requires being able to view it.
    pub fn can_edit_record(&self, user: &User, rules: &SchemaRules<'_>, record: &dyn RecordView) -> AccessResult<bool> {
        Ok(self.can_view_record(user, rules, record)?
            && rules.editing.meets_requirements(user, Some(record), Utc::now())?)
    }

    /// Whether the user may create records in the schema.
    pub fn can_author(&self, user: &User, rules: &SchemaRules<'_>) -> AccessResult<bool> {
        rules.authoring.meets_requirements(user, None, Utc::now())
    }

    pub fn can_view_field(
        &self,
        user: &User,
        rules: &SchemaRules<'_>,
        field: &FieldRules<'_>,
        record: &dyn RecordView,
    ) -> AccessResult<bool> {
        if !field.enabled || !self.can_view_record(user, rules, record)? {
            return Ok(false);
        }
        field.viewing.meets_requirements(user, Some(record), Utc::now())
    }

    pub fn can_edit_field(
        &self,
        user: &User,
        rules: &SchemaRules<'_>,
        field: &FieldRules<'_>,
        record: &dyn RecordView,
    ) -> AccessResult<bool> {
        if !field.enabled || !field.editable || !self.can_edit_record(user, rules, record)? {
            return Ok(false);
        }
        field.editing.meets_requirements(user, Some(record), Utc::now())
    }

    pub fn can_author_field(&self, user: &User, rules: &SchemaRules<'_>, field: &FieldRules<'_>) -> AccessResult<bool> {
        if !field.enabled || !field.editable || !self.can_author(user, rules)? {
            return Ok(false);
        }
        field.authoring.meets_requirements(user, None, Utc::now())
    }

    /// Drop cached view results for one record when a changed field feeds
    /// the viewing rule. Returns the number of rows removed.
    pub fn invalidate_for_field_change(
        &self,
        record: RecordId,
        field: FieldId,
        viewing: &dyn PrivilegeRequirements,
    ) -> AccessResult<usize> {
        if !viewing.references_field(field) {
            return Ok(0);
        }
        self.invalidate_record(record)
    }

    /// Drop every cached view result for one record.
    pub fn invalidate_record(&self, record: RecordId) -> AccessResult<usize> {
        let removed = self.store.clear_record_permissions(record)?;
        self.batch
            .write()
            .expect("lock poisoned")
            .retain(|(r, _), _| *r != record);
        debug!(%record, removed, "record permission rows cleared");
        Ok(removed)
    }

    /// Drop every cached view result, e.g. after a schema's rules changed.
    pub fn invalidate_all(&self) -> AccessResult<usize> {
        let removed = self.store.clear_all_permissions()?;
        self.end_batch();
        debug!(removed, "all permission rows cleared");
        Ok(removed)
    }

    /// Forget per-user results computed during the current batch.
    pub fn end_batch(&self) {
        self.batch.write().expect("lock poisoned").clear();
    }

    pub fn stats(&self) -> EvaluatorStats {
        EvaluatorStats {
            shared_hits: self.shared_hits.load(Ordering::Relaxed),
            batch_hits: self.batch_hits.load(Ordering::Relaxed),
            evaluations: self.evaluations.load(Ordering::Relaxed),
        }
    }

    fn row_expiry(
        &self,
        viewing: &dyn PrivilegeRequirements,
        record: &dyn RecordView,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<DateTime<Utc>>> {
        let rule_expiry = viewing.expires_at(Some(record), now)?;
        let cap = self
            .config
            .max_row_age_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));
        Ok(match (rule_expiry, cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        })
    }
}

impl std::fmt::Debug for PermissionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionEvaluator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use folio_store::InMemoryMetadataStore;
    use folio_types::{FieldValue, UserId, UserRef};

    use crate::error::AccessError;
    use crate::privilege::{Condition, PrivilegeSet, TimeRelation, UserComparison};

    struct FakeRecord {
        id: RecordId,
        values: HashMap<FieldId, FieldValue>,
    }

    impl RecordView for FakeRecord {
        fn record_id(&self) -> RecordId {
            self.id
        }

        fn schema_id(&self) -> SchemaId {
            SchemaId(0)
        }

        fn field_value(&self, field: FieldId) -> AccessResult<FieldValue> {
            self.values.get(&field).cloned().ok_or(AccessError::FieldUnavailable {
                field,
                reason: "missing".into(),
            })
        }
    }

    fn record(id: i64, values: Vec<(i32, FieldValue)>) -> FakeRecord {
        FakeRecord {
            id: RecordId(id),
            values: values.into_iter().map(|(f, v)| (FieldId(f), v)).collect(),
        }
    }

    fn evaluator() -> (Arc<InMemoryMetadataStore>, PermissionEvaluator) {
        let store = Arc::new(InMemoryMetadataStore::new());
        let eval = PermissionEvaluator::new(store.clone(), AccessConfig::default());
        (store, eval)
    }

    fn rules<'a>(viewing: &'a PrivilegeSet, open: &'a PrivilegeSet) -> SchemaRules<'a> {
        SchemaRules {
            schema: SchemaId(0),
            viewing,
            editing: open,
            authoring: open,
        }
    }

    // -----------------------------------------------------------------------
    // Class caching
    // -----------------------------------------------------------------------

    #[test]
    fn users_with_same_relevant_flags_share_one_row() {
        let (store, eval) = evaluator();
        let viewing = PrivilegeSet::open().with(Condition::Flag("Reader".into()));
        let open = PrivilegeSet::open();
        let r = record(1, vec![]);
        let a = User::logged_in(UserId(1), "a").with_flag("Reader");
        let b = User::logged_in(UserId(2), "b").with_flag("Reader").with_flag("Unrelated");

        assert!(eval.can_view_record(&a, &rules(&viewing, &open), &r).unwrap());
        assert!(eval.can_view_record(&b, &rules(&viewing, &open), &r).unwrap());

        assert_eq!(store.permission_row_count(), 1);
        let stats = eval.stats();
        assert_eq!(stats.evaluations, 1);
        assert_eq!(stats.shared_hits, 1);
    }

    #[test]
    fn owner_comparison_forces_per_user_evaluation() {
        let (store, eval) = evaluator();
        let viewing = PrivilegeSet::open().with(Condition::FieldUser {
            field: FieldId(3),
            comparison: UserComparison::Equal,
        });
        let open = PrivilegeSet::open();
        let r = record(
            1,
            vec![(
                3,
                FieldValue::Users(vec![UserRef {
                    id: UserId(1),
                    name: "owner".into(),
                }]),
            )],
        );
        let owner = User::logged_in(UserId(1), "owner").with_flag("Reader");
        let other = User::logged_in(UserId(2), "other").with_flag("Reader");

        assert!(eval.can_view_record(&owner, &rules(&viewing, &open), &r).unwrap());
        assert!(!eval.can_view_record(&other, &rules(&viewing, &open), &r).unwrap());
        assert!(eval.can_view_record(&owner, &rules(&viewing, &open), &r).unwrap());

        assert_eq!(store.permission_row_count(), 0);
        assert_eq!(eval.stats().evaluations, 2);
        assert_eq!(eval.stats().batch_hits, 1);

        eval.end_batch();
        assert!(eval.can_view_record(&owner, &rules(&viewing, &open), &r).unwrap());
        assert_eq!(eval.stats().evaluations, 3);
    }

    #[test]
    fn expired_rows_are_recomputed() {
        let (store, eval) = evaluator();
        let viewing = PrivilegeSet::open().with(Condition::FieldTime {
            field: FieldId(5),
            relation: TimeRelation::After,
        });
        let open = PrivilegeSet::open();
        let release = Utc::now() + Duration::hours(1);
        let r = record(2, vec![(5, FieldValue::Timestamp(Some(release)))]);

        assert!(!eval.can_view_record(&User::anonymous(), &rules(&viewing, &open), &r).unwrap());
        let key = eval.user_class(&User::anonymous(), SchemaId(0), &viewing).key();
        let row = store.permission(RecordId(2), &key).unwrap().unwrap();
        assert_eq!(row.expires_at, Some(release));
    }

    #[test]
    fn max_row_age_caps_expiry() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let eval = PermissionEvaluator::new(
            store.clone(),
            AccessConfig {
                max_row_age_secs: Some(60),
                ..Default::default()
            },
        );
        let open = PrivilegeSet::open();
        let r = record(3, vec![]);
        eval.can_view_record(&User::anonymous(), &rules(&open, &open), &r).unwrap();
        let key = eval.user_class(&User::anonymous(), SchemaId(0), &open).key();
        let row = store.permission(RecordId(3), &key).unwrap().unwrap();
        assert!(row.expires_at.is_some());
    }

    // -----------------------------------------------------------------------
    // Cascade
    // -----------------------------------------------------------------------

    #[test]
    fn field_checks_cascade_from_record() {
        let (_store, eval) = evaluator();
        let members = PrivilegeSet::open().with(Condition::LoggedIn);
        let open = PrivilegeSet::open();
        let schema = rules(&members, &open);
        let field = FieldRules {
            field: FieldId(1),
            viewing: &open,
            editing: &open,
            authoring: &open,
            enabled: true,
            editable: true,
        };
        let r = record(1, vec![]);
        let member = User::logged_in(UserId(1), "m");

        assert!(eval.can_view_field(&member, &schema, &field, &r).unwrap());
        assert!(!eval.can_view_field(&User::anonymous(), &schema, &field, &r).unwrap());
        assert!(eval.can_edit_field(&member, &schema, &field, &r).unwrap());

        let disabled = FieldRules { enabled: false, ..field };
        assert!(!eval.can_view_field(&member, &schema, &disabled, &r).unwrap());
        let locked = FieldRules { editable: false, ..field };
        assert!(eval.can_view_field(&member, &schema, &locked, &r).unwrap());
        assert!(!eval.can_edit_field(&member, &schema, &locked, &r).unwrap());
        assert!(!eval.can_author_field(&member, &schema, &locked).unwrap());
    }

    #[test]
    fn authoring_uses_schema_rule_without_record() {
        let (_store, eval) = evaluator();
        let open = PrivilegeSet::open();
        let editors = PrivilegeSet::open().with(Condition::Flag("Editor".into()));
        let schema = SchemaRules {
            schema: SchemaId(0),
            viewing: &open,
            editing: &open,
            authoring: &editors,
        };
        assert!(!eval.can_author(&User::anonymous(), &schema).unwrap());
        assert!(eval.can_author(&User::anonymous().with_flag("Editor"), &schema).unwrap());
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    #[test]
    fn field_change_invalidates_only_that_record() {
        let (store, eval) = evaluator();
        let viewing = PrivilegeSet::open().with(Condition::FieldFlag {
            field: FieldId(2),
            expected: true,
        });
        let open = PrivilegeSet::open();
        let r1 = record(1, vec![(2, FieldValue::Flag(Some(true)))]);
        let r2 = record(2, vec![(2, FieldValue::Flag(Some(true)))]);
        let anon = User::anonymous();
        eval.can_view_record(&anon, &rules(&viewing, &open), &r1).unwrap();
        eval.can_view_record(&anon, &rules(&viewing, &open), &r2).unwrap();
        assert_eq!(store.permission_row_count(), 2);

        assert_eq!(eval.invalidate_for_field_change(RecordId(1), FieldId(9), &viewing).unwrap(), 0);
        assert_eq!(eval.invalidate_for_field_change(RecordId(1), FieldId(2), &viewing).unwrap(), 1);
        assert_eq!(store.permission_row_count(), 1);
        assert!(store.permission(RecordId(2), &eval.user_class(&anon, SchemaId(0), &viewing).key()).unwrap().is_some());
    }

    #[test]
    fn invalidate_all_clears_rows() {
        let (store, eval) = evaluator();
        let open = PrivilegeSet::open();
        eval.can_view_record(&User::anonymous(), &rules(&open, &open), &record(1, vec![])).unwrap();
        assert_eq!(eval.invalidate_all().unwrap(), 1);
        assert_eq!(store.permission_row_count(), 0);
    }
}
