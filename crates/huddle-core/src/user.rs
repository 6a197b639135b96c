use serde::{Deserialize, Serialize};

/// Role of a chat participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Registered,
    System,
}

/// Immutable identity snapshot of a participant, carried in tokens and in
/// every server-originated message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub role: Role,
}

impl User {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            avatar: None,
            role,
        }
    }

    /// The reserved author of all server-originated events.
    pub fn system() -> Self {
        Self::new("system", "System", Role::System)
    }
}
