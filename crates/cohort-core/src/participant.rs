//! Participant model

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, TransformFrame, UserId};

/// Participant role within a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    /// The moderator role: may force views and broadcast the pointer
    Teacher,
    #[default]
    Guest,
}

impl Role {
    pub fn is_moderator(self) -> bool {
        matches!(self, Role::Teacher)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a client announces about itself when joining a room
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
}

impl Profile {
    pub fn new(display_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: None,
            display_name: display_name.into(),
            role,
        }
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// A remote participant as seen through the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    pub transforms: TransformFrame,
}

impl Participant {
    /// Participant that has joined but not yet sent a transform frame
    pub fn joined(connection_id: ConnectionId, profile: &Profile) -> Self {
        Self {
            connection_id,
            display_name: profile.display_name.clone(),
            role: profile.role,
            transforms: TransformFrame::standing(),
        }
    }

    pub fn profile(&self) -> Profile {
        Profile::new(self.display_name.clone(), self.role)
    }
}
