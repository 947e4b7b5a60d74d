use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use folio_access::{PrivilegeSet, SchemaRules};
use folio_types::{FieldId, SchemaId};

use crate::descriptor::PrivilegeLevel;

/// Which of the two independently maintained field orderings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Display,
    Edit,
}

/// A named collection of fields plus the access policy for its records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub id: SchemaId,
    pub name: String,
    /// What one record is called ("Photo", "Resource").
    pub item_name: String,
    pub abbreviation: String,
    pub viewing: PrivilegeSet,
    pub editing: PrivilegeSet,
    pub authoring: PrivilegeSet,
    pub default_sort_field: Option<FieldId>,
    pub view_template: Option<String>,
    pub edit_template: Option<String>,
    pub display_order: Vec<FieldId>,
    pub edit_order: Vec<FieldId>,
    /// Standard name to field. Targets always belong to this schema.
    pub std_names: BTreeMap<String, FieldId>,
}

impl Schema {
    pub fn new(id: SchemaId, name: &str) -> Self {
        let name = name.trim().to_string();
        let abbreviation = name.chars().filter(|c| c.is_alphanumeric()).take(8).collect();
        Self {
            id,
            item_name: name.clone(),
            name,
            abbreviation,
            viewing: PrivilegeSet::open(),
            editing: PrivilegeSet::open(),
            authoring: PrivilegeSet::open(),
            default_sort_field: None,
            view_template: None,
            edit_template: None,
            display_order: Vec::new(),
            edit_order: Vec::new(),
            std_names: BTreeMap::new(),
        }
    }

    /// Rules view for the permission evaluator.
    pub fn rules(&self) -> SchemaRules<'_> {
        SchemaRules {
            schema: self.id,
            viewing: &self.viewing,
            editing: &self.editing,
            authoring: &self.authoring,
        }
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

    pub fn order(&self, kind: OrderKind) -> &[FieldId] {
        match kind {
            OrderKind::Display => &self.display_order,
            OrderKind::Edit => &self.edit_order,
        }
    }

    pub fn order_mut(&mut self, kind: OrderKind) -> &mut Vec<FieldId> {
        match kind {
            OrderKind::Display => &mut self.display_order,
            OrderKind::Edit => &mut self.edit_order,
        }
    }

    /// The standard name a field is mapped under, if any.
    pub fn std_name_of(&self, field: FieldId) -> Option<&str> {
        self.std_names
            .iter()
            .find(|(_, id)| **id == field)
            .map(|(name, _)| name.as_str())
    }

    /// Look up a standard name, ignoring case.
    pub fn std_name_target(&self, std_name: &str) -> Option<FieldId> {
        self.std_names
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(std_name))
            .map(|(_, id)| *id)
    }

    /// Append a field to both orderings.
    pub(crate) fn push_field(&mut self, field: FieldId) {
        self.display_order.push(field);
        self.edit_order.push(field);
    }

    /// Replace every mention of a field id, as done when a temporary field
    /// becomes permanent.
    pub(crate) fn replace_field(&mut self, from: FieldId, to: FieldId) {
        for id in self.display_order.iter_mut().chain(self.edit_order.iter_mut()) {
            if *id == from {
                *id = to;
            }
        }
        for id in self.std_names.values_mut() {
            if *id == from {
                *id = to;
            }
        }
        if self.default_sort_field == Some(from) {
            self.default_sort_field = Some(to);
        }
    }

    /// Forget a dropped field.
    pub(crate) fn remove_field(&mut self, field: FieldId) {
        self.display_order.retain(|id| *id != field);
        self.edit_order.retain(|id| *id != field);
        self.std_names.retain(|_, id| *id != field);
        if self.default_sort_field == Some(field) {
            self.default_sort_field = None;
        }
    }
}
