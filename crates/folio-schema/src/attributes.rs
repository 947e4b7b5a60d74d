//! Configuration attributes and the table deciding which field types may
//! carry them.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use folio_types::{FieldType, QualifierId, SchemaId, StorageClass};

use crate::error::{SchemaError, SchemaResult};

/// When a field's value is recomputed automatically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateMethod {
    #[default]
    NoAutoUpdate,
    /// When a record is created.
    OnRecordCreate,
    /// Only when explicitly requested.
    Button,
    /// Whenever a record is saved from an edit form.
    OnRecordEdit,
    /// Whenever a field marked as triggering auto-updates changes.
    OnRecordChange,
    /// Once, when a record first becomes publicly visible.
    OnRecordRelease,
}

/// What an auto-updating field is set to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AutoValue {
    /// The current time (date and timestamp fields).
    Now,
    /// The acting user (user fields).
    ActingUser,
    /// The current number plus one (number fields).
    Increment,
    /// The field's default value.
    Default,
}

impl AutoValue {
    pub fn is_legal_for(self, field_type: FieldType) -> bool {
        match self {
            Self::Now => matches!(field_type, FieldType::Date | FieldType::Timestamp),
            Self::ActingUser => field_type == FieldType::User,
            Self::Increment => field_type == FieldType::Number,
            Self::Default => supports_default(field_type),
        }
    }
}

/// Types that accept a default value.
pub fn supports_default(field_type: FieldType) -> bool {
    matches!(
        field_type.storage_class(),
        StorageClass::TextColumn | StorageClass::FlatTerms
    ) || matches!(
        field_type,
        FieldType::Number | FieldType::Flag | FieldType::Point | FieldType::Tree
    )
}

/// Every configurable attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    Label,
    Description,
    Optional,
    Enabled,
    Editable,
    Owner,
    TriggersAutoUpdates,
    MaxLength,
    MinValue,
    MaxValue,
    AllowRanges,
    AllowMultiple,
    UsesQualifiers,
    ItemLevelQualifiers,
    DefaultQualifier,
    AllowedQualifiers,
    UpdateMethod,
    AutoValue,
    ReferenceSchema,
    /// The stored default value, set through its own setter.
    DefaultValue,
}

impl AttributeKind {
    /// Key used in interchange documents.
    pub fn key(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Description => "description",
            Self::Optional => "optional",
            Self::Enabled => "enabled",
            Self::Editable => "editable",
            Self::Owner => "owner",
            Self::TriggersAutoUpdates => "triggers_auto_updates",
            Self::MaxLength => "max_length",
            Self::MinValue => "min_value",
            Self::MaxValue => "max_value",
            Self::AllowRanges => "allow_ranges",
            Self::AllowMultiple => "allow_multiple",
            Self::UsesQualifiers => "uses_qualifiers",
            Self::ItemLevelQualifiers => "item_level_qualifiers",
            Self::DefaultQualifier => "default_qualifier",
            Self::AllowedQualifiers => "allowed_qualifiers",
            Self::UpdateMethod => "update_method",
            Self::AutoValue => "auto_value",
            Self::ReferenceSchema => "reference_schema",
            Self::DefaultValue => "default",
        }
    }

    pub const ALL: [AttributeKind; 20] = [
        Self::Label,
        Self::Description,
        Self::Optional,
        Self::Enabled,
        Self::Editable,
        Self::Owner,
        Self::TriggersAutoUpdates,
        Self::MaxLength,
        Self::MinValue,
        Self::MaxValue,
        Self::AllowRanges,
        Self::AllowMultiple,
        Self::UsesQualifiers,
        Self::ItemLevelQualifiers,
        Self::DefaultQualifier,
        Self::AllowedQualifiers,
        Self::UpdateMethod,
        Self::AutoValue,
        Self::ReferenceSchema,
        Self::DefaultValue,
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    /// The legality table: whether a field of `field_type` may carry this
    /// attribute.
    pub fn is_legal_for(self, field_type: FieldType) -> bool {
        use FieldType as T;
        match self {
            Self::Label
            | Self::Description
            | Self::Optional
            | Self::Enabled
            | Self::Editable
            | Self::Owner
            | Self::TriggersAutoUpdates => true,
            Self::MaxLength => field_type.storage_class() == StorageClass::TextColumn,
            Self::MinValue | Self::MaxValue => field_type == T::Number,
            Self::AllowRanges => field_type == T::Date,
            Self::AllowMultiple => field_type.has_configurable_multiplicity(),
            Self::UsesQualifiers | Self::DefaultQualifier | Self::AllowedQualifiers => {
                field_type.storage_class() == StorageClass::TextColumn
                    || matches!(
                        field_type,
                        T::Number
                            | T::Date
                            | T::ControlledName
                            | T::Option
                            | T::Tree
                            | T::User
                            | T::Reference
                    )
            }
            Self::ItemLevelQualifiers => field_type.term_kind().is_some(),
            Self::UpdateMethod | Self::AutoValue => [
                AutoValue::Now,
                AutoValue::ActingUser,
                AutoValue::Increment,
                AutoValue::Default,
            ]
            .into_iter()
            .any(|v| v.is_legal_for(field_type)),
            Self::ReferenceSchema => field_type == T::Reference,
            Self::DefaultValue => supports_default(field_type),
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An attribute together with its new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Label(Option<String>),
    Description(Option<String>),
    Optional(bool),
    Enabled(bool),
    Editable(bool),
    Owner(Option<String>),
    TriggersAutoUpdates(bool),
    MaxLength(Option<u32>),
    MinValue(Option<i64>),
    MaxValue(Option<i64>),
    AllowRanges(bool),
    AllowMultiple(bool),
    UsesQualifiers(bool),
    ItemLevelQualifiers(bool),
    DefaultQualifier(Option<QualifierId>),
    AllowedQualifiers(Vec<QualifierId>),
    UpdateMethod(UpdateMethod),
    AutoValue(Option<AutoValue>),
    ReferenceSchema(Option<SchemaId>),
}

impl Attribute {
    pub fn kind(&self) -> AttributeKind {
        match self {
            Self::Label(_) => AttributeKind::Label,
            Self::Description(_) => AttributeKind::Description,
            Self::Optional(_) => AttributeKind::Optional,
            Self::Enabled(_) => AttributeKind::Enabled,
            Self::Editable(_) => AttributeKind::Editable,
            Self::Owner(_) => AttributeKind::Owner,
            Self::TriggersAutoUpdates(_) => AttributeKind::TriggersAutoUpdates,
            Self::MaxLength(_) => AttributeKind::MaxLength,
            Self::MinValue(_) => AttributeKind::MinValue,
            Self::MaxValue(_) => AttributeKind::MaxValue,
            Self::AllowRanges(_) => AttributeKind::AllowRanges,
            Self::AllowMultiple(_) => AttributeKind::AllowMultiple,
            Self::UsesQualifiers(_) => AttributeKind::UsesQualifiers,
            Self::ItemLevelQualifiers(_) => AttributeKind::ItemLevelQualifiers,
            Self::DefaultQualifier(_) => AttributeKind::DefaultQualifier,
            Self::AllowedQualifiers(_) => AttributeKind::AllowedQualifiers,
            Self::UpdateMethod(_) => AttributeKind::UpdateMethod,
            Self::AutoValue(_) => AttributeKind::AutoValue,
            Self::ReferenceSchema(_) => AttributeKind::ReferenceSchema,
        }
    }

    /// Interpret an interchange key/value pair.
    pub fn from_json(key: &str, value: &serde_json::Value) -> SchemaResult<Self> {
        let kind = AttributeKind::from_key(key)
            .ok_or_else(|| SchemaError::Interchange(format!("unknown attribute '{key}'")))?;
        fn typed<T: DeserializeOwned>(key: &str, value: &serde_json::Value) -> SchemaResult<T> {
            serde_json::from_value(value.clone())
                .map_err(|e| SchemaError::InvalidValue(format!("attribute '{key}': {e}")))
        }
        Ok(match kind {
            AttributeKind::Label => Self::Label(typed(key, value)?),
            AttributeKind::Description => Self::Description(typed(key, value)?),
            AttributeKind::Optional => Self::Optional(typed(key, value)?),
            AttributeKind::Enabled => Self::Enabled(typed(key, value)?),
            AttributeKind::Editable => Self::Editable(typed(key, value)?),
            AttributeKind::Owner => Self::Owner(typed(key, value)?),
            AttributeKind::TriggersAutoUpdates => Self::TriggersAutoUpdates(typed(key, value)?),
            AttributeKind::MaxLength => Self::MaxLength(typed(key, value)?),
            AttributeKind::MinValue => Self::MinValue(typed(key, value)?),
            AttributeKind::MaxValue => Self::MaxValue(typed(key, value)?),
            AttributeKind::AllowRanges => Self::AllowRanges(typed(key, value)?),
            AttributeKind::AllowMultiple => Self::AllowMultiple(typed(key, value)?),
            AttributeKind::UsesQualifiers => Self::UsesQualifiers(typed(key, value)?),
            AttributeKind::ItemLevelQualifiers => Self::ItemLevelQualifiers(typed(key, value)?),
            AttributeKind::DefaultQualifier => {
                Self::DefaultQualifier(typed::<Option<i64>>(key, value)?.map(QualifierId))
            }
            AttributeKind::AllowedQualifiers => Self::AllowedQualifiers(
                typed::<Vec<i64>>(key, value)?.into_iter().map(QualifierId).collect(),
            ),
            AttributeKind::UpdateMethod => Self::UpdateMethod(typed(key, value)?),
            AttributeKind::AutoValue => Self::AutoValue(typed(key, value)?),
            AttributeKind::ReferenceSchema => {
                Self::ReferenceSchema(typed::<Option<i32>>(key, value)?.map(SchemaId))
            }
            AttributeKind::DefaultValue => {
                return Err(SchemaError::Interchange(
                    "default values are resolved against the field, not set as attributes".into(),
                ))
            }
        })
    }
}

/// Type-gated configuration of a field.
///
/// Values for attributes that are illegal for the field's current type stay
/// at their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub triggers_auto_updates: bool,
    pub max_length: Option<u32>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub allow_ranges: bool,
    pub allow_multiple: bool,
    pub uses_qualifiers: bool,
    pub item_level_qualifiers: bool,
    pub default_qualifier: Option<QualifierId>,
    pub allowed_qualifiers: Vec<QualifierId>,
    pub update_method: UpdateMethod,
    pub auto_value: Option<AutoValue>,
    pub reference_schema: Option<SchemaId>,
}

impl FieldConfig {
    /// Reset every gated attribute that `field_type` does not allow.
    pub fn retain_legal(&mut self, field_type: FieldType) {
        let defaults = FieldConfig::default();
        let legal = |kind: AttributeKind| kind.is_legal_for(field_type);
        if !legal(AttributeKind::MaxLength) {
            self.max_length = defaults.max_length;
        }
        if !legal(AttributeKind::MinValue) {
            self.min_value = defaults.min_value;
            self.max_value = defaults.max_value;
        }
        if !legal(AttributeKind::AllowRanges) {
            self.allow_ranges = defaults.allow_ranges;
        }
        if !legal(AttributeKind::AllowMultiple) {
            self.allow_multiple = defaults.allow_multiple;
        }
        if !legal(AttributeKind::UsesQualifiers) {
            self.uses_qualifiers = defaults.uses_qualifiers;
            self.default_qualifier = defaults.default_qualifier;
            self.allowed_qualifiers = defaults.allowed_qualifiers;
        }
        if !legal(AttributeKind::ItemLevelQualifiers) {
            self.item_level_qualifiers = defaults.item_level_qualifiers;
        }
        if self.auto_value.is_some_and(|v| !v.is_legal_for(field_type)) {
            self.auto_value = None;
        }
        if !legal(AttributeKind::UpdateMethod) || self.auto_value.is_none() {
            self.update_method = UpdateMethod::NoAutoUpdate;
        }
        if !legal(AttributeKind::ReferenceSchema) {
            self.reference_schema = defaults.reference_schema;
        }
    }
}
