use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::UserId;

/// Platform role of an authenticated user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Provider,
    Studio,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Provider => "provider",
            Self::Studio => "studio",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(Self::Player),
            "provider" => Ok(Self::Provider),
            "studio" => Ok(Self::Studio),
            other => Err(TypeError::unknown("role", other)),
        }
    }
}

/// The identity on whose behalf a ledger operation runs.
///
/// Authentication happens upstream; the ledger trusts `id` and `role`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<UserId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn player(id: impl Into<UserId>) -> Self {
        Self::new(id, Role::Player)
    }

    pub fn provider(id: impl Into<UserId>) -> Self {
        Self::new(id, Role::Provider)
    }

    pub fn studio(id: impl Into<UserId>) -> Self {
        Self::new(id, Role::Studio)
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}
