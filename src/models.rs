use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the reserved tag that means "no filter".
pub const ALL_TAG_NAME: &str = "all";

/// A bookmark label. Two tags are the same tag when their names are equal
/// (case-sensitive).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The `all` sentinel.
    pub fn all() -> Self {
        Self::new(ALL_TAG_NAME)
    }

    pub fn is_all(&self) -> bool {
        self.name == ALL_TAG_NAME
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: i32,
    pub url: String,
    pub host: String,
    pub title: String,
    pub note: Option<String>,
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<Tag>,
}

/// Identity-provider credential. The identifier is a secret and is never
/// written to logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub identifier: String,
    pub name: String,
}

impl Credential {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identifier", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum LoginState {
    #[default]
    LoggedOut,
    LoggedIn { credential: Credential },
}

impl LoginState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, LoginState::LoggedIn { .. })
    }

    pub fn credential(&self) -> Option<&Credential> {
        match self {
            LoginState::LoggedIn { credential } => Some(credential),
            LoginState::LoggedOut => None,
        }
    }
}
