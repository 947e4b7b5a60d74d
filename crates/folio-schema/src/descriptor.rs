use serde::{Deserialize, Serialize};

use folio_access::{FieldRules, PrivilegeSet};
use folio_types::{ColumnType, FieldId, FieldType, Point, SchemaId, StorageClass, TermId};

use crate::attributes::{supports_default, Attribute, AttributeKind, FieldConfig};
use crate::error::{SchemaError, SchemaResult};
use crate::names;

/// Which of the three privilege sets an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    Viewing,
    Editing,
    Authoring,
}

impl PrivilegeLevel {
    pub const ALL: [PrivilegeLevel; 3] = [Self::Viewing, Self::Editing, Self::Authoring];
}

/// A field's stored default value.
///
/// Term defaults hold term ids of the field's own vocabulary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DefaultValue {
    Text(String),
    Number(i64),
    Flag(bool),
    Point(Point),
    Terms(Vec<TermId>),
}

/// A typed, named slot in a schema's records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Negative while the field is temporary.
    pub id: FieldId,
    pub schema: SchemaId,
    pub name: String,
    pub storage_name: String,
    pub field_type: FieldType,
    pub label: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
    pub enabled: bool,
    pub editable: bool,
    /// Free-form tag naming the component that owns the field.
    pub owner: Option<String>,
    pub viewing: PrivilegeSet,
    pub editing: PrivilegeSet,
    pub authoring: PrivilegeSet,
    pub config: FieldConfig,
    pub default: Option<DefaultValue>,
    /// Position in creation order within the schema.
    pub sequence: u64,
}

impl FieldDescriptor {
    /// Build a new temporary descriptor. Storage is not allocated.
    pub fn new_temporary(
        id: FieldId,
        schema: SchemaId,
        field_type: FieldType,
        name: &str,
        sequence: u64,
    ) -> SchemaResult<Self> {
        let name = name.trim();
        let storage_name = names::storage_name(name, schema)?;
        Ok(Self {
            id,
            schema,
            name: name.to_string(),
            storage_name,
            field_type,
            label: None,
            description: None,
            optional: true,
            enabled: true,
            editable: true,
            owner: None,
            viewing: PrivilegeSet::open(),
            editing: PrivilegeSet::open(),
            authoring: PrivilegeSet::open(),
            config: FieldConfig::default(),
            default: None,
            sequence,
        })
    }

    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// Label if set, otherwise the name.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// `"Schema: Name"`-style reference for messages.
    pub fn qualified_name(&self, schema_name: &str) -> String {
        format!("{schema_name}{}{}", names::QUALIFIED_SEPARATOR, self.name)
    }

    /// Whether the field holds a set of values rather than at most one.
    pub fn allows_multiple(&self) -> bool {
        self.field_type.always_multiple()
            || (self.field_type.has_configurable_multiplicity() && self.config.allow_multiple)
    }

    /// Physical columns occupied once the field is permanent.
    pub fn columns(&self) -> Vec<(String, ColumnType)> {
        names::columns(&self.storage_name, self.field_type)
    }

    pub fn privileges(&self, level: PrivilegeLevel) -> &PrivilegeSet {
        match level {
            PrivilegeLevel::Viewing => &self.viewing,
            PrivilegeLevel::Editing => &self.editing,
            PrivilegeLevel::Authoring => &self.authoring,
        }
    }

    pub fn set_privileges(&mut self, level: PrivilegeLevel, set: PrivilegeSet) {
        match level {
            PrivilegeLevel::Viewing => self.viewing = set,
            PrivilegeLevel::Editing => self.editing = set,
            PrivilegeLevel::Authoring => self.authoring = set,
        }
    }

    /// Rules view for the permission evaluator.
    pub fn rules(&self) -> FieldRules<'_> {
        FieldRules {
            field: self.id,
            viewing: &self.viewing,
            editing: &self.editing,
            authoring: &self.authoring,
            enabled: self.enabled,
            editable: self.editable,
        }
    }

    /// Apply one attribute, rejecting it if the current type does not
    /// allow it.
    pub fn set_attribute(&mut self, attribute: Attribute) -> SchemaResult<()> {
        let kind = attribute.kind();
        if !kind.is_legal_for(self.field_type) {
            return Err(SchemaError::IllegalAttribute {
                attribute: kind,
                field_type: self.field_type,
            });
        }
        match attribute {
            Attribute::Label(v) => self.label = v,
            Attribute::Description(v) => self.description = v,
            Attribute::Optional(v) => self.optional = v,
            Attribute::Enabled(v) => self.enabled = v,
            Attribute::Editable(v) => self.editable = v,
            Attribute::Owner(v) => self.owner = v,
            Attribute::TriggersAutoUpdates(v) => self.config.triggers_auto_updates = v,
            Attribute::MaxLength(v) => self.config.max_length = v,
            Attribute::MinValue(v) => self.config.min_value = v,
            Attribute::MaxValue(v) => self.config.max_value = v,
            Attribute::AllowRanges(v) => self.config.allow_ranges = v,
            Attribute::AllowMultiple(v) => self.config.allow_multiple = v,
            Attribute::UsesQualifiers(v) => self.config.uses_qualifiers = v,
            Attribute::ItemLevelQualifiers(v) => self.config.item_level_qualifiers = v,
            Attribute::DefaultQualifier(v) => self.config.default_qualifier = v,
            Attribute::AllowedQualifiers(v) => self.config.allowed_qualifiers = v,
            Attribute::UpdateMethod(v) => self.config.update_method = v,
            Attribute::AutoValue(v) => {
                if let Some(value) = v.filter(|value| !value.is_legal_for(self.field_type)) {
                    return Err(SchemaError::InvalidValue(format!(
                        "{value:?} cannot fill {} fields",
                        self.field_type
                    )));
                }
                self.config.auto_value = v;
            }
            Attribute::ReferenceSchema(v) => self.config.reference_schema = v,
        }
        Ok(())
    }

    /// Set the stored default, checking it matches the field's type.
    pub fn set_default(&mut self, default: Option<DefaultValue>) -> SchemaResult<()> {
        let Some(value) = default else {
            self.default = None;
            return Ok(());
        };
        if !AttributeKind::DefaultValue.is_legal_for(self.field_type) {
            return Err(SchemaError::IllegalAttribute {
                attribute: AttributeKind::DefaultValue,
                field_type: self.field_type,
            });
        }
        let fits = match (&value, self.field_type) {
            (DefaultValue::Text(_), t) => t.storage_class() == StorageClass::TextColumn,
            (DefaultValue::Number(_), t) => t == FieldType::Number,
            (DefaultValue::Flag(_), t) => t == FieldType::Flag,
            (DefaultValue::Point(_), t) => t == FieldType::Point,
            (DefaultValue::Terms(_), t) => t.term_kind().is_some(),
        };
        if !fits {
            return Err(SchemaError::InvalidValue(format!(
                "{value:?} is not a {} default",
                self.field_type
            )));
        }
        self.default = Some(value);
        Ok(())
    }

    /// Switch to a new type, dropping configuration the new type does not
    /// allow.
    pub(crate) fn retype(&mut self, to: FieldType) {
        self.field_type = to;
        self.config.retain_legal(to);
        if self.default.is_some() && !supports_default(to) {
            self.default = None;
        }
    }
}
