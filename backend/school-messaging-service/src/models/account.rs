//! Platform accounts as seen by messaging.
//!
//! Accounts are owned by the administrative side of the platform; this
//! service only reads them to scope conversations by school and to stamp
//! roles onto members and messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Platform role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Admin,
    Teacher,
    Student,
}

impl AccountRole {
    /// Parse role from database string
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            "student" => Some(Self::Student),
            _ => None,
        }
    }

    /// Convert role to database string
    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

impl fmt::Display for AccountRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for AccountRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid role: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub school_id: Uuid,
    pub role: AccountRole,
}

impl Account {
    pub fn new(school_id: Uuid, role: AccountRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            school_id,
            role,
        }
    }
}
