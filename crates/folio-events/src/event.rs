use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_types::{FieldId, FieldValue, RecordId, SchemaId, UserId};

/// What happened to a field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The value was replaced.
    Set,
    /// The value was removed entirely.
    Clear,
    /// Items were appended to a set-valued field.
    Add,
    /// Items were removed from a set-valued field.
    Remove,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Set => "SET",
            Self::Clear => "CLEAR",
            Self::Add => "ADD",
            Self::Remove => "REMOVE",
        };
        f.write_str(s)
    }
}

/// Where a change happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeScope {
    pub schema: SchemaId,
    pub field: FieldId,
    pub record: RecordId,
}

impl ChangeScope {
    pub fn new(schema: SchemaId, field: FieldId, record: RecordId) -> Self {
        Self {
            schema,
            field,
            record,
        }
    }
}

/// A published field-value change.
///
/// For `Set` the payload is the new value, for `Clear` the removed value,
/// and for `Add`/`Remove` only the items that were added or removed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Time-ordered unique id (UUID v7).
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: ChangeKind,
    pub scope: ChangeScope,
    pub payload: FieldValue,
    /// The acting user, when known.
    pub user: Option<UserId>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, scope: ChangeScope, payload: FieldValue, user: Option<UserId>) -> Self {
        Self {
            id: Uuid::now_v7(),
            at: Utc::now(),
            kind,
            scope,
            payload,
            user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_are_unique_and_time_ordered() {
        let scope = ChangeScope::new(SchemaId(0), FieldId(1), RecordId(1));
        let a = ChangeEvent::new(ChangeKind::Set, scope, FieldValue::Number(Some(1)), None);
        let b = ChangeEvent::new(ChangeKind::Set, scope, FieldValue::Number(Some(2)), None);
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
    }

    #[test]
    fn kind_display() {
        assert_eq!(ChangeKind::Set.to_string(), "SET");
        assert_eq!(ChangeKind::Remove.to_string(), "REMOVE");
    }
}
