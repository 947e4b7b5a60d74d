//! Bulk field creation from a TOML interchange document.
//!
//! ```toml
//! [std_names]
//! Subject = "Topic"
//!
//! [[field]]
//! name = "Topic"
//! type = "Tree"
//! vocabulary = "topics.txt"
//! default = "Science -- Physics"
//! label = "Subject heading"
//!
//! [field.privileges.viewing]
//! logic = "any"
//! flags = ["staff"]
//! user_fields = ["Added By"]
//! ```
//!
//! Every key of a `[[field]]` table other than `name`, `type`, `optional`,
//! `default`, `vocabulary` and `privileges` is an attribute key. Vocabulary
//! files hold one term per line; blank lines and lines starting with `#`
//! are skipped. Import is all-or-nothing: if anything fails, the fields
//! created so far are dropped and the schema row is restored.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use folio_access::{Condition, PrivilegeSet, RuleLogic, TimeRelation, UserComparison};
use folio_types::{FieldId, SchemaId, ValueInput};

use crate::attributes::Attribute;
use crate::descriptor::{FieldDescriptor, PrivilegeLevel};
use crate::error::{SchemaError, SchemaResult};
use crate::registry::{FieldRef, SchemaRegistry};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InterchangeDocument {
    #[serde(default, rename = "field")]
    fields: Vec<FieldEntry>,
    #[serde(default)]
    std_names: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FieldEntry {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    optional: Option<bool>,
    #[serde(default)]
    default: Option<toml::Value>,
    #[serde(default)]
    vocabulary: Option<PathBuf>,
    #[serde(default)]
    privileges: PrivilegeSections,
    #[serde(flatten)]
    attributes: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrivilegeSections {
    viewing: Option<PrivilegeSection>,
    editing: Option<PrivilegeSection>,
    authoring: Option<PrivilegeSection>,
}

/// A privilege rule as written in a document. Field references are names
/// within the importing schema.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PrivilegeSection {
    /// `"all"` (default) or `"any"`.
    logic: Option<String>,
    flags: Vec<String>,
    logged_in: bool,
    user_fields: Vec<String>,
    not_user_fields: Vec<String>,
    flag_fields: BTreeMap<String, bool>,
    after_fields: Vec<String>,
    before_fields: Vec<String>,
}

impl PrivilegeSection {
    fn build(&self, registry: &SchemaRegistry, schema: SchemaId) -> SchemaResult<PrivilegeSet> {
        let logic = match self.logic.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("all") => RuleLogic::All,
            Some("any") => RuleLogic::Any,
            Some(other) => {
                return Err(SchemaError::Interchange(format!("unknown rule logic '{other}'")))
            }
        };
        let field = |name: &str| -> SchemaResult<FieldId> {
            Ok(registry.get_field(name, Some(schema))?.id)
        };

        let mut set = PrivilegeSet {
            logic,
            ..PrivilegeSet::default()
        };
        set.conditions
            .extend(self.flags.iter().map(|f| Condition::Flag(f.clone())));
        if self.logged_in {
            set.conditions.push(Condition::LoggedIn);
        }
        for (names, comparison) in [
            (&self.user_fields, UserComparison::Equal),
            (&self.not_user_fields, UserComparison::NotEqual),
        ] {
            for name in names {
                set.conditions.push(Condition::FieldUser {
                    field: field(name.as_str())?,
                    comparison,
                });
            }
        }
        for (name, expected) in &self.flag_fields {
            set.conditions.push(Condition::FieldFlag {
                field: field(name.as_str())?,
                expected: *expected,
            });
        }
        for (names, relation) in [
            (&self.after_fields, TimeRelation::After),
            (&self.before_fields, TimeRelation::Before),
        ] {
            for name in names {
                set.conditions.push(Condition::FieldTime {
                    field: field(name.as_str())?,
                    relation,
                });
            }
        }
        Ok(set)
    }
}

fn value_input(value: &toml::Value) -> SchemaResult<ValueInput> {
    Ok(match value {
        toml::Value::String(s) => ValueInput::Text(s.clone()),
        toml::Value::Integer(n) => ValueInput::Number(*n),
        toml::Value::Boolean(b) => ValueInput::Flag(*b),
        toml::Value::Array(items) => {
            ValueInput::Many(items.iter().map(value_input).collect::<SchemaResult<_>>()?)
        }
        other => {
            return Err(SchemaError::Interchange(format!(
                "unsupported default value {other}"
            )))
        }
    })
}

/// Terms listed in a vocabulary file.
pub fn read_vocabulary(path: &Path) -> SchemaResult<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// The error an import reports once its rollback has run.
fn rollback_error(error: SchemaError, leftovers: Vec<String>) -> SchemaError {
    if leftovers.is_empty() {
        error
    } else {
        SchemaError::IncompleteRollback {
            source: Box::new(error),
            leftovers,
        }
    }
}

impl SchemaRegistry {
    /// Create every field described in an interchange file. Vocabulary
    /// paths are relative to the file's directory.
    pub fn add_fields_from_interchange_file(
        &self,
        schema: SchemaId,
        path: &Path,
    ) -> SchemaResult<Vec<Arc<FieldDescriptor>>> {
        let text = std::fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        self.add_fields_from_interchange_document(schema, &text, base_dir)
    }

    /// Create every field described in an interchange document, making
    /// each permanent. Nothing is left behind if any entry fails.
    pub fn add_fields_from_interchange_document(
        &self,
        schema: SchemaId,
        text: &str,
        base_dir: &Path,
    ) -> SchemaResult<Vec<Arc<FieldDescriptor>>> {
        let document: InterchangeDocument =
            toml::from_str(text).map_err(|e| SchemaError::Interchange(e.to_string()))?;
        let snapshot = (*self.schema(schema)?).clone();
        let mut created: Vec<FieldId> = Vec::new();

        match self.import(schema, &document, base_dir, &mut created) {
            Ok(fields) => {
                info!(schema = %schema, fields = fields.len(), "interchange document imported");
                Ok(fields)
            }
            Err(e) => {
                warn!(schema = %schema, error = %e, rolled_back = created.len(), "interchange import failed");
                let mut leftovers = Vec::new();
                for id in created.iter().rev() {
                    if let Ok(field) = self.get_field(*id, None) {
                        if let Err(cleanup) = self.remove_field(&field) {
                            warn!(field = %id, error = %cleanup, "rollback could not remove field");
                            leftovers.push(format!("{id} '{}': {cleanup}", field.name));
                        }
                    }
                }
                if let Err(cleanup) = self.restore_schema(&snapshot) {
                    leftovers.push(format!("schema {schema}: {cleanup}"));
                }
                Err(rollback_error(e, leftovers))
            }
        }
    }

    fn import(
        &self,
        schema: SchemaId,
        document: &InterchangeDocument,
        base_dir: &Path,
        created: &mut Vec<FieldId>,
    ) -> SchemaResult<Vec<Arc<FieldDescriptor>>> {
        let mut fields = Vec::with_capacity(document.fields.len());
        for entry in &document.fields {
            let field = self.create_field_of_type_name(
                schema,
                &entry.field_type,
                &entry.name,
                entry.optional.unwrap_or(true),
                None,
            )?;
            created.push(field.id);

            for (key, value) in &entry.attributes {
                let json = serde_json::to_value(value)
                    .map_err(|e| SchemaError::Interchange(format!("attribute '{key}': {e}")))?;
                self.set_field_attribute(field.id, Attribute::from_json(key, &json)?)?;
            }
            if let Some(vocabulary) = &entry.vocabulary {
                let path = base_dir.join(vocabulary);
                for term in read_vocabulary(&path)? {
                    self.add_term(field.id, &term)?;
                }
            }
            if let Some(default) = &entry.default {
                self.set_field_default(field.id, Some(value_input(default)?))?;
            }

            let permanent = self.make_permanent(field.id)?;
            if let Some(last) = created.last_mut() {
                *last = permanent.id;
            }
            fields.push(permanent);
        }

        // Rules and mappings may name any field of the document.
        for (entry, field) in document.fields.iter().zip(fields.iter_mut()) {
            let sections = [
                (PrivilegeLevel::Viewing, &entry.privileges.viewing),
                (PrivilegeLevel::Editing, &entry.privileges.editing),
                (PrivilegeLevel::Authoring, &entry.privileges.authoring),
            ];
            for (level, section) in sections {
                if let Some(section) = section {
                    let set = section.build(self, schema)?;
                    *field = self.set_field_privileges(field.id, level, set)?;
                }
            }
        }
        for (std_name, field_name) in &document.std_names {
            self.map_std_name(schema, std_name, FieldRef::Name(field_name.clone()))?;
        }
        Ok(fields)
    }
}
