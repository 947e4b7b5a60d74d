use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::date::DateRange;
use crate::error::TypeError;
use crate::field_type::FieldType;
use crate::ids::{FieldId, FileId, ImageId, QualifierId, RecordId, TermId, UserId};

/// A paired X/Y value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Parse `"x,y"`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| TypeError::parse("point", s))?;
        let x = x.trim().parse().map_err(|_| TypeError::parse("point", s))?;
        let y = y.trim().parse().map_err(|_| TypeError::parse("point", s))?;
        Ok(Self { x, y })
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Boolean connective inside a [`SearchParameterSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchLogic {
    All,
    Any,
}

/// One search condition: text matched against a field, or against
/// everything when `field` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParameter {
    pub field: Option<FieldId>,
    pub text: String,
}

/// A stored structured search expression.
///
/// Opaque to the value store: it is serialized into a single bytes column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchParameterSet {
    pub logic: SearchLogic,
    pub parameters: Vec<SearchParameter>,
    pub subgroups: Vec<SearchParameterSet>,
}

impl SearchParameterSet {
    pub fn new(logic: SearchLogic) -> Self {
        Self {
            logic,
            parameters: Vec::new(),
            subgroups: Vec::new(),
        }
    }

    /// Builder-style helper that appends a condition.
    pub fn with_parameter(mut self, field: Option<FieldId>, text: impl Into<String>) -> Self {
        self.parameters.push(SearchParameter {
            field,
            text: text.into(),
        });
        self
    }

    /// Returns `true` when there are no conditions at any depth.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.subgroups.iter().all(SearchParameterSet::is_empty)
    }

    /// Every field referenced at any depth.
    pub fn referenced_fields(&self) -> BTreeSet<FieldId> {
        let mut out: BTreeSet<FieldId> = self.parameters.iter().filter_map(|p| p.field).collect();
        for group in &self.subgroups {
            out.extend(group.referenced_fields());
        }
        out
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TypeError> {
        bincode::serialize(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        bincode::deserialize(bytes).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

/// A term as returned from a term-backed field.
///
/// `qualifier`, `parent` and `variants` are only populated when the caller
/// asks for rich objects (variants additionally need `include_variants`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermValue {
    pub id: TermId,
    pub name: String,
    pub qualifier: Option<QualifierId>,
    pub parent: Option<TermId>,
    pub variants: Vec<String>,
}

impl TermValue {
    pub fn new(id: TermId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            qualifier: None,
            parent: None,
            variants: Vec::new(),
        }
    }
}

/// A user reference with the display name known at read time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
}

/// The canonical value of one field on one record.
///
/// Every variant has an explicit empty form (`None` or an empty list) so no
/// data value ever stands in for "unset".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(Option<String>),
    Number(Option<i64>),
    Flag(Option<bool>),
    Point(Option<Point>),
    Date(Option<DateRange>),
    Timestamp(Option<DateTime<Utc>>),
    /// Terms ordered by id.
    Terms(Vec<TermValue>),
    /// Users ordered by id.
    Users(Vec<UserRef>),
    Files(Vec<FileId>),
    Images(Vec<ImageId>),
    References(Vec<RecordId>),
    SearchParameters(Option<SearchParameterSet>),
}

impl FieldValue {
    /// The empty form for a field type.
    pub fn empty(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text | FieldType::Paragraph | FieldType::Url | FieldType::Email => {
                Self::Text(None)
            }
            FieldType::Number => Self::Number(None),
            FieldType::Flag => Self::Flag(None),
            FieldType::Point => Self::Point(None),
            FieldType::Date => Self::Date(None),
            FieldType::Timestamp => Self::Timestamp(None),
            FieldType::ControlledName | FieldType::Option | FieldType::Tree => {
                Self::Terms(Vec::new())
            }
            FieldType::User => Self::Users(Vec::new()),
            FieldType::File => Self::Files(Vec::new()),
            FieldType::Image => Self::Images(Vec::new()),
            FieldType::Reference => Self::References(Vec::new()),
            FieldType::SearchParameterSet => Self::SearchParameters(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(v) => v.is_none(),
            Self::Number(v) => v.is_none(),
            Self::Flag(v) => v.is_none(),
            Self::Point(v) => v.is_none(),
            Self::Date(v) => v.is_none(),
            Self::Timestamp(v) => v.is_none(),
            Self::Terms(v) => v.is_empty(),
            Self::Users(v) => v.is_empty(),
            Self::Files(v) => v.is_empty(),
            Self::Images(v) => v.is_empty(),
            Self::References(v) => v.is_empty(),
            Self::SearchParameters(v) => v.is_none(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(v) => *v,
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => *v,
            _ => None,
        }
    }

    pub fn as_point(&self) -> Option<Point> {
        match self {
            Self::Point(v) => *v,
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateRange> {
        match self {
            Self::Date(v) => *v,
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => *v,
            _ => None,
        }
    }

    /// Term names, for vocabulary-backed values.
    pub fn term_names(&self) -> BTreeSet<String> {
        match self {
            Self::Terms(terms) => terms.iter().map(|t| t.name.clone()).collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Raw ids held by a set-valued value, in order.
    pub fn ids(&self) -> Vec<i64> {
        match self {
            Self::Terms(v) => v.iter().map(|t| t.id.0).collect(),
            Self::Users(v) => v.iter().map(|u| u.id.0).collect(),
            Self::Files(v) => v.iter().map(|f| f.0).collect(),
            Self::Images(v) => v.iter().map(|i| i.0).collect(),
            Self::References(v) => v.iter().map(|r| r.0).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the value mentions the given user.
    pub fn contains_user(&self, user: UserId) -> bool {
        matches!(self, Self::Users(users) if users.iter().any(|u| u.id == user))
    }

    /// The instant a date or timestamp value refers to.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(v) => *v,
            Self::Date(v) => v.map(|d| d.begin_utc()),
            _ => None,
        }
    }
}

/// Input accepted by the value store's setter.
///
/// Literal strings are resolved according to the target field type: parsed
/// for scalars and dates, resolved through the term store for vocabulary
/// fields, matched against user names for user fields.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueInput {
    Text(String),
    Number(i64),
    Flag(bool),
    Point(Point),
    Date(DateRange),
    Timestamp(DateTime<Utc>),
    /// A raw id (term, user, file, image, or record).
    Id(i64),
    Structured(SearchParameterSet),
    Many(Vec<ValueInput>),
}

impl ValueInput {
    /// Flatten nested lists into a single list of leaf inputs.
    pub fn into_items(self) -> Vec<ValueInput> {
        match self {
            Self::Many(items) => items.into_iter().flat_map(ValueInput::into_items).collect(),
            other => vec![other],
        }
    }
}

impl From<&str> for ValueInput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ValueInput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ValueInput {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ValueInput {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

impl From<Point> for ValueInput {
    fn from(p: Point) -> Self {
        Self::Point(p)
    }
}

impl From<DateRange> for ValueInput {
    fn from(d: DateRange) -> Self {
        Self::Date(d)
    }
}

impl From<DateTime<Utc>> for ValueInput {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl From<SearchParameterSet> for ValueInput {
    fn from(s: SearchParameterSet) -> Self {
        Self::Structured(s)
    }
}

macro_rules! id_input {
    ($($id:ty),*) => {
        $(impl From<$id> for ValueInput {
            fn from(id: $id) -> Self {
                Self::Id(id.0)
            }
        })*
    };
}

id_input!(TermId, UserId, FileId, ImageId, RecordId);

impl From<&TermValue> for ValueInput {
    fn from(t: &TermValue) -> Self {
        Self::Id(t.id.0)
    }
}

impl<T: Into<ValueInput>> From<Vec<T>> for ValueInput {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items.into_iter().map(Into::into).collect())
    }
}

impl From<FieldValue> for ValueInput {
    /// Turn a read value back into setter input. Empty values become an
    /// empty list.
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(Some(s)) => Self::Text(s),
            FieldValue::Number(Some(n)) => Self::Number(n),
            FieldValue::Flag(Some(b)) => Self::Flag(b),
            FieldValue::Point(Some(p)) => Self::Point(p),
            FieldValue::Date(Some(d)) => Self::Date(d),
            FieldValue::Timestamp(Some(t)) => Self::Timestamp(t),
            FieldValue::SearchParameters(Some(s)) => Self::Structured(s),
            other => Self::Many(other.ids().into_iter().map(Self::Id).collect()),
        }
    }
}
