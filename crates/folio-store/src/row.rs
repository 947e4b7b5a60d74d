//! Row and cell types shared by every storage backend.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use folio_types::{ColumnType, FieldId, QualifierId, RecordId, TermId, TermKind, UserId};

use crate::error::{StoreError, StoreResult};

/// Kind of serialized catalogue row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKind {
    Schema,
    Field,
    /// Per-record housekeeping bookkeeping.
    RecordState,
}

/// Identifier sequences handed out under the exclusive allocation lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdSequence {
    Schema,
    Field,
    Record,
    Term,
    Comment,
}

/// One cell of a record row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    Float(f64),
    DateTime(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Cell {
    /// Returns `true` if this cell may be stored in a column of `column_type`.
    pub fn fits(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Cell::Null, _)
                | (Cell::Text(_), ColumnType::Text)
                | (Cell::Integer(_), ColumnType::Integer)
                | (Cell::Boolean(_), ColumnType::Boolean)
                | (Cell::Float(_), ColumnType::Float)
                | (Cell::DateTime(_), ColumnType::DateTime)
                | (Cell::Bytes(_), ColumnType::Bytes)
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }
}

/// A vocabulary or hierarchical term.
///
/// Hierarchical terms keep their full name (`A -- B -- C`) in `name` and
/// the last segment in `segment`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRow {
    pub id: TermId,
    pub field: FieldId,
    pub kind: TermKind,
    pub name: String,
    pub segment: String,
    pub parent: Option<TermId>,
    pub qualifier: Option<QualifierId>,
    /// Alternate spellings that resolve to this term.
    pub variants: Vec<String>,
}

/// Who last changed a field on a record, and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStamp {
    pub at: DateTime<Utc>,
    pub user: Option<UserId>,
}

/// Persisted permission cache row, keyed by record and user class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRow {
    pub can_view: bool,
    /// After this instant the row must be recomputed.
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionRow {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Usage counts for a term, shared across processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCount {
    /// Records associated with the term.
    pub total: u64,
    /// Associated records visible to anonymous users.
    pub public: u64,
}

/// A comment left on a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub record: RecordId,
    pub user: UserId,
    pub at: DateTime<Utc>,
    pub text: String,
}

/// Serialize a row with bincode.
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Deserialize a row written by [`encode`].
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_fit_matching_columns() {
        assert!(Cell::Text("x".into()).fits(ColumnType::Text));
        assert!(Cell::Null.fits(ColumnType::Bytes));
        assert!(!Cell::Integer(1).fits(ColumnType::Float));
        assert!(!Cell::Boolean(true).fits(ColumnType::Text));
    }

    #[test]
    fn permission_row_expiry() {
        let now = Utc::now();
        let row = PermissionRow {
            can_view: true,
            expires_at: Some(now),
        };
        assert!(!row.is_live_at(now));
        assert!(row.is_live_at(now - chrono::Duration::seconds(1)));
        let forever = PermissionRow {
            can_view: false,
            expires_at: None,
        };
        assert!(forever.is_live_at(now));
    }

    #[test]
    fn encode_decode_term_row() {
        let row = TermRow {
            id: TermId(4),
            field: FieldId(2),
            kind: TermKind::Hierarchical,
            name: "Science -- Physics".into(),
            segment: "Physics".into(),
            parent: Some(TermId(3)),
            qualifier: None,
            variants: vec![],
        };
        let back: TermRow = decode(&encode(&row).unwrap()).unwrap();
        assert_eq!(back, row);
    }
}
