use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty), $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// The raw numeric value.
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a schema. The first schema created (id 0) is the
    /// default schema.
    SchemaId(i32),
    "schema"
);

numeric_id!(
    /// Identifier of a field. Negative values are temporary fields that have
    /// not been made permanent yet.
    FieldId(i32),
    "field"
);

numeric_id!(
    /// Identifier of a record. Negative values are temporary records.
    RecordId(i64),
    "record"
);

numeric_id!(
    /// Identifier of a user known to the enclosing application.
    UserId(i64),
    "user"
);

numeric_id!(
    /// Identifier of a vocabulary or hierarchical term row.
    TermId(i64),
    "term"
);

numeric_id!(
    /// Identifier of an externally stored file.
    FileId(i64),
    "file"
);

numeric_id!(
    /// Identifier of an externally stored image.
    ImageId(i64),
    "image"
);

numeric_id!(
    /// Identifier of a qualifier (provenance or scheme modifier).
    QualifierId(i64),
    "qualifier"
);

impl SchemaId {
    /// The default schema. Its storage names carry no schema suffix.
    pub const DEFAULT: SchemaId = SchemaId(0);

    /// Returns `true` for the default schema.
    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

impl FieldId {
    /// Returns `true` if the field has not been made permanent.
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}

impl RecordId {
    /// Returns `true` if the record has not been made permanent.
    pub fn is_temporary(self) -> bool {
        self.0 < 0
    }
}
