use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// The value type assigned to a field.
///
/// The type alone determines the field's storage shape, which attributes
/// are legal on it, and which conversions it can take part in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Paragraph,
    Url,
    Email,
    Number,
    Flag,
    Point,
    Date,
    Timestamp,
    ControlledName,
    Option,
    Tree,
    User,
    File,
    Image,
    Reference,
    SearchParameterSet,
}

/// Physical storage layout used by a field type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageShape {
    /// One column on the record row.
    Column(ColumnType),
    /// Two float columns holding X and Y.
    Paired,
    /// Begin, End and Precision columns.
    Ranged,
    /// Record-to-term association rows.
    Terms,
    /// Record-to-target association rows of the given kind.
    Association(AssociationKind),
}

/// Physical type of a record-row column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Boolean,
    Float,
    DateTime,
    Bytes,
}

/// Kind of association row linking a record to something outside its row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AssociationKind {
    Term,
    User,
    File,
    Image,
    Reference,
}

/// Whether a term-backed field stores flat or hierarchical terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TermKind {
    /// Flat vocabulary term with optional variant spellings.
    Flat,
    /// Node in a tree; full names join ancestors with [`TREE_SEPARATOR`].
    Hierarchical,
}

/// Separator between levels of a hierarchical term's full name.
pub const TREE_SEPARATOR: &str = " -- ";

impl FieldType {
    /// Every field type, in declaration order.
    pub const ALL: [FieldType; 17] = [
        FieldType::Text,
        FieldType::Paragraph,
        FieldType::Url,
        FieldType::Email,
        FieldType::Number,
        FieldType::Flag,
        FieldType::Point,
        FieldType::Date,
        FieldType::Timestamp,
        FieldType::ControlledName,
        FieldType::Option,
        FieldType::Tree,
        FieldType::User,
        FieldType::File,
        FieldType::Image,
        FieldType::Reference,
        FieldType::SearchParameterSet,
    ];

    /// The storage layout for this type.
    pub fn shape(self) -> StorageShape {
        match self {
            Self::Text | Self::Paragraph | Self::Url | Self::Email => {
                StorageShape::Column(ColumnType::Text)
            }
            Self::Number => StorageShape::Column(ColumnType::Integer),
            Self::Flag => StorageShape::Column(ColumnType::Boolean),
            Self::Timestamp => StorageShape::Column(ColumnType::DateTime),
            Self::SearchParameterSet => StorageShape::Column(ColumnType::Bytes),
            Self::Point => StorageShape::Paired,
            Self::Date => StorageShape::Ranged,
            Self::ControlledName | Self::Option | Self::Tree => StorageShape::Terms,
            Self::User => StorageShape::Association(AssociationKind::User),
            Self::File => StorageShape::Association(AssociationKind::File),
            Self::Image => StorageShape::Association(AssociationKind::Image),
            Self::Reference => StorageShape::Association(AssociationKind::Reference),
        }
    }

    /// Association kind used by set-shaped types, `None` for row-stored types.
    pub fn association_kind(self) -> Option<AssociationKind> {
        match self.shape() {
            StorageShape::Terms => Some(AssociationKind::Term),
            StorageShape::Association(kind) => Some(kind),
            _ => None,
        }
    }

    /// Term kind for term-backed types.
    pub fn term_kind(self) -> Option<TermKind> {
        match self {
            Self::ControlledName | Self::Option => Some(TermKind::Flat),
            Self::Tree => Some(TermKind::Hierarchical),
            _ => None,
        }
    }

    /// Types whose value is a set of ids rather than a scalar.
    pub fn is_set_valued(self) -> bool {
        self.association_kind().is_some()
    }

    /// Set-valued types that always hold many values regardless of
    /// configuration.
    pub fn always_multiple(self) -> bool {
        matches!(
            self,
            Self::ControlledName | Self::Tree | Self::File | Self::Reference
        )
    }

    /// Set-valued types whose multiplicity is chosen by the allow-multiple
    /// attribute.
    pub fn has_configurable_multiplicity(self) -> bool {
        matches!(self, Self::Option | Self::User | Self::Image)
    }

    /// Conversion class: types sharing a class share a physical layout, so
    /// moving between them needs no value migration.
    pub fn storage_class(self) -> StorageClass {
        match self {
            Self::Text | Self::Paragraph | Self::Url | Self::Email => StorageClass::TextColumn,
            Self::ControlledName | Self::Option => StorageClass::FlatTerms,
            other => StorageClass::Singular(other),
        }
    }

    /// The canonical name used in interchange documents.
    pub fn name(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Paragraph => "Paragraph",
            Self::Url => "Url",
            Self::Email => "Email",
            Self::Number => "Number",
            Self::Flag => "Flag",
            Self::Point => "Point",
            Self::Date => "Date",
            Self::Timestamp => "Timestamp",
            Self::ControlledName => "ControlledName",
            Self::Option => "Option",
            Self::Tree => "Tree",
            Self::User => "User",
            Self::File => "File",
            Self::Image => "Image",
            Self::Reference => "Reference",
            Self::SearchParameterSet => "SearchParameterSet",
        }
    }
}

/// Grouping of field types by physical layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageClass {
    TextColumn,
    FlatTerms,
    Singular(FieldType),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldType {
    type Err = TypeError;

    /// Parse a type name, ignoring case, spaces and underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| TypeError::UnknownFieldType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_has_a_shape_and_name() {
        for t in FieldType::ALL {
            let _ = t.shape();
            assert_eq!(t.name().parse::<FieldType>().unwrap(), t);
        }
    }

    #[test]
    fn parse_is_lenient() {
        assert_eq!("controlled name".parse::<FieldType>().unwrap(), FieldType::ControlledName);
        assert_eq!("SEARCH_PARAMETER_SET".parse::<FieldType>().unwrap(), FieldType::SearchParameterSet);
        assert!("Blob".parse::<FieldType>().is_err());
    }

    #[test]
    fn text_like_types_share_a_class() {
        assert_eq!(FieldType::Url.storage_class(), FieldType::Paragraph.storage_class());
        assert_eq!(FieldType::Option.storage_class(), FieldType::ControlledName.storage_class());
        assert_ne!(FieldType::Tree.storage_class(), FieldType::ControlledName.storage_class());
    }

    #[test]
    fn multiplicity_rules() {
        assert!(FieldType::Tree.always_multiple());
        assert!(FieldType::Option.has_configurable_multiplicity());
        assert!(!FieldType::Text.is_set_valued());
        assert!(FieldType::User.is_set_valued());
    }

    #[test]
    fn term_kinds() {
        assert_eq!(FieldType::Tree.term_kind(), Some(TermKind::Hierarchical));
        assert_eq!(FieldType::Option.term_kind(), Some(TermKind::Flat));
        assert_eq!(FieldType::Number.term_kind(), None);
    }
}
