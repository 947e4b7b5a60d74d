use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use folio_types::{SchemaId, UserId};

/// The acting user as seen by privilege rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// `None` for anonymous visitors.
    pub id: Option<UserId>,
    pub name: String,
    pub flags: BTreeSet<String>,
}

impl User {
    pub fn anonymous() -> Self {
        Self {
            id: None,
            name: "anonymous".into(),
            flags: BTreeSet::new(),
        }
    }

    pub fn logged_in(id: UserId, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
            flags: BTreeSet::new(),
        }
    }

    /// Builder-style helper that grants a privilege flag.
    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.id.is_some()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

/// Cache key for permission results.
///
/// Users holding the same schema-relevant flags share a class. Rules that
/// compare a field against the acting user make results depend on the
/// individual, so those users each get their own class.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UserClass {
    Shared(String),
    PerUser(Option<UserId>),
}

impl UserClass {
    /// Derive the shared class for a user from the flags a schema's rules
    /// can observe.
    pub fn derive(
        schema: SchemaId,
        user: &User,
        relevant_flags: &BTreeSet<String>,
        login_relevant: bool,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&schema.get().to_le_bytes());
        for flag in relevant_flags.iter().filter(|f| user.has_flag(f)) {
            hasher.update(flag.as_bytes());
            hasher.update(&[0]);
        }
        if login_relevant && user.is_logged_in() {
            hasher.update(b"\x01logged-in");
        }
        let hash = hasher.finalize();
        Self::Shared(hex::encode(&hash.as_bytes()[..16]))
    }

    /// Key under which results for this class are stored.
    pub fn key(&self) -> String {
        match self {
            Self::Shared(hash) => format!("cls:{hash}"),
            Self::PerUser(Some(id)) => format!("usr:{}", id.get()),
            Self::PerUser(None) => "usr:anonymous".into(),
        }
    }

    pub fn is_per_user(&self) -> bool {
        matches!(self, Self::PerUser(_))
    }
}

impl std::fmt::Display for UserClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}
