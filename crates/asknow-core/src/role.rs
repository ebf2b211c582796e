//! User roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of a connected user.
///
/// Serialized with the names the user store uses (`student` / `tutor`);
/// the generic names `requester` / `responder` are accepted on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Originates questions (student).
    #[serde(rename = "student", alias = "requester")]
    Requester,
    /// Claims and answers questions (tutor).
    #[serde(rename = "tutor", alias = "responder")]
    Responder,
}

impl Role {
    /// Wire / storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "student",
            Self::Responder => "tutor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role string outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" | "requester" => Ok(Self::Requester),
            "tutor" | "responder" => Ok(Self::Responder),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}
