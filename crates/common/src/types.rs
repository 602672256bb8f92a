// Core domain types shared across all Quill crates.

use serde::{Deserialize, Serialize};

/// Numeric identifier of a document, as assigned by the document API.
pub type DocumentId = i64;

/// Numeric identifier of a user account.
pub type UserId = i64;

/// The locally signed-in user who is viewing a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CurrentUser {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

impl CurrentUser {
    pub fn new(id: UserId, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id, name: name.into(), email: email.into() }
    }
}

/// One active viewer of a document, as broadcast by the presence server.
///
/// Snapshots are immutable; a new broadcast replaces the whole list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUser {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
}
