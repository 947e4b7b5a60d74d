use thiserror::Error;

/// Errors produced by type-level parsing and encoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("cannot parse {kind} from {input:?}")]
    Parse { kind: &'static str, input: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TypeError {
    pub(crate) fn parse(kind: &'static str, input: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            input: input.into(),
        }
    }
}
