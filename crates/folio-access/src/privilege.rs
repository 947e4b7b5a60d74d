use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use folio_types::{FieldId, FieldValue, RecordId, SchemaId};

use crate::error::AccessResult;
use crate::user::User;

/// Read access to a record, as needed by rules that inspect field values.
pub trait RecordView {
    fn record_id(&self) -> RecordId;

    fn schema_id(&self) -> SchemaId;

    /// The current value of a field, without any permission check.
    fn field_value(&self, field: FieldId) -> AccessResult<FieldValue>;
}

/// How a rule compares a user-valued field against the acting user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserComparison {
    /// The field holds the acting user.
    Equal,
    /// The field does not hold the acting user.
    NotEqual,
}

/// Evaluation contract for a set of privilege requirements.
pub trait PrivilegeRequirements: Send + Sync {
    /// Whether `user` satisfies the requirements, optionally in the context
    /// of a record.
    fn meets_requirements(
        &self,
        user: &User,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<bool>;

    /// Returns `true` if any condition reads the given field.
    fn references_field(&self, field: FieldId) -> bool;

    /// Fields compared against the acting user with the given comparison.
    fn fields_with_user_comparison(&self, kind: UserComparison) -> BTreeSet<FieldId>;

    /// Every user flag the requirements can observe.
    fn required_flags(&self) -> BTreeSet<String>;

    /// Returns `true` if the outcome depends on whether the user is logged in.
    fn checks_login(&self) -> bool;

    /// The instant at which a result computed at `now` may change because a
    /// time-based condition flips.
    fn expires_at(
        &self,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<DateTime<Utc>>>;

    /// Returns `true` if any condition compares against the acting user.
    fn compares_user(&self) -> bool {
        !self.fields_with_user_comparison(UserComparison::Equal).is_empty()
            || !self.fields_with_user_comparison(UserComparison::NotEqual).is_empty()
    }
}

/// How the results of a set's members combine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleLogic {
    #[default]
    All,
    Any,
}

/// Direction of a time-based condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRelation {
    /// Holds while the current time is before the field's instant.
    Before,
    /// Holds once the current time is at or after the field's instant.
    After,
}

/// One condition inside a [`PrivilegeSet`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// The user holds a flag.
    Flag(String),
    /// The user is logged in.
    LoggedIn,
    /// A user-valued field holds (or does not hold) the acting user.
    FieldUser {
        field: FieldId,
        comparison: UserComparison,
    },
    /// A flag field has the given value.
    FieldFlag { field: FieldId, expected: bool },
    /// A date or timestamp field relative to now.
    FieldTime {
        field: FieldId,
        relation: TimeRelation,
    },
}

impl Condition {
    fn field(&self) -> Option<FieldId> {
        match self {
            Self::FieldUser { field, .. }
            | Self::FieldFlag { field, .. }
            | Self::FieldTime { field, .. } => Some(*field),
            Self::Flag(_) | Self::LoggedIn => None,
        }
    }

    /// `None` when the condition needs a record and none was given. An empty
    /// field value never satisfies a field condition's positive form.
    fn evaluate(
        &self,
        user: &User,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<bool>> {
        let value = match (self.field(), record) {
            (None, _) => None,
            (Some(_), None) => return Ok(None),
            (Some(field), Some(record)) => Some(record.field_value(field)?),
        };
        let outcome = match (self, value) {
            (Self::Flag(flag), _) => Some(user.has_flag(flag)),
            (Self::LoggedIn, _) => Some(user.is_logged_in()),
            (Self::FieldUser { comparison, .. }, Some(value)) => {
                let holds = user.id.is_some_and(|id| value.contains_user(id));
                Some(match comparison {
                    UserComparison::Equal => holds,
                    UserComparison::NotEqual => !holds,
                })
            }
            (Self::FieldFlag { expected, .. }, Some(value)) => {
                Some(value.as_flag() == Some(*expected))
            }
            (Self::FieldTime { relation, .. }, Some(value)) => {
                Some(value.instant().is_some_and(|at| match relation {
                    TimeRelation::Before => now < at,
                    TimeRelation::After => now >= at,
                }))
            }
            (_, None) => None,
        };
        Ok(outcome)
    }
}

/// Rule-based privilege requirements.
///
/// An empty set admits everyone. Field conditions checked without a record
/// are ignored; a set none of whose members could be evaluated admits too.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrivilegeSet {
    pub logic: RuleLogic,
    pub conditions: Vec<Condition>,
    pub subsets: Vec<PrivilegeSet>,
}

impl PrivilegeSet {
    /// A set that admits everyone.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn any() -> Self {
        Self {
            logic: RuleLogic::Any,
            ..Default::default()
        }
    }

    /// Builder-style helper that appends a condition.
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Builder-style helper that appends a nested set.
    pub fn with_subset(mut self, subset: PrivilegeSet) -> Self {
        self.subsets.push(subset);
        self
    }

    pub fn is_open(&self) -> bool {
        self.conditions.is_empty() && self.subsets.iter().all(PrivilegeSet::is_open)
    }

    fn evaluate(
        &self,
        user: &User,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<bool>> {
        let mut outcomes = Vec::with_capacity(self.conditions.len() + self.subsets.len());
        for condition in &self.conditions {
            outcomes.extend(condition.evaluate(user, record, now)?);
        }
        for subset in &self.subsets {
            outcomes.extend(subset.evaluate(user, record, now)?);
        }
        if outcomes.is_empty() {
            return Ok(None);
        }
        Ok(Some(match self.logic {
            RuleLogic::All => outcomes.iter().all(|o| *o),
            RuleLogic::Any => outcomes.iter().any(|o| *o),
        }))
    }

    fn all_conditions(&self) -> Box<dyn Iterator<Item = &Condition> + '_> {
        Box::new(
            self.conditions
                .iter()
                .chain(self.subsets.iter().flat_map(|s| s.all_conditions())),
        )
    }
}

impl PrivilegeRequirements for PrivilegeSet {
    fn meets_requirements(
        &self,
        user: &User,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<bool> {
        Ok(self.evaluate(user, record, now)?.unwrap_or(true))
    }

    fn references_field(&self, field: FieldId) -> bool {
        self.all_conditions().any(|c| c.field() == Some(field))
    }

    fn fields_with_user_comparison(&self, kind: UserComparison) -> BTreeSet<FieldId> {
        self.all_conditions()
            .filter_map(|c| match c {
                Condition::FieldUser { field, comparison } if *comparison == kind => Some(*field),
                _ => None,
            })
            .collect()
    }

    fn required_flags(&self) -> BTreeSet<String> {
        self.all_conditions()
            .filter_map(|c| match c {
                Condition::Flag(flag) => Some(flag.clone()),
                _ => None,
            })
            .collect()
    }

    fn checks_login(&self) -> bool {
        self.all_conditions().any(|c| matches!(c, Condition::LoggedIn))
    }

    fn expires_at(
        &self,
        record: Option<&dyn RecordView>,
        now: DateTime<Utc>,
    ) -> AccessResult<Option<DateTime<Utc>>> {
        let Some(record) = record else {
            return Ok(None);
        };
        let mut earliest: Option<DateTime<Utc>> = None;
        for condition in self.all_conditions() {
            if let Condition::FieldTime { field, .. } = condition {
                let at = record.field_value(*field)?.instant();
                if let Some(at) = at.filter(|at| *at > now) {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
            }
        }
        Ok(earliest)
    }
}
