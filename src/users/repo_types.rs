use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Account role. Compared by equality only; there is no hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Role {
    Normal = 0,
    Admin = 1,
    Super = 2,
}

impl Role {
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::Super)
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Role::Normal),
            "admin" => Ok(Role::Admin),
            "super" => Ok(Role::Super),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Status {
    Normal = 0,
    Disabled = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum Sex {
    #[default]
    Unknown = 0,
    Male = 1,
    Female = 2,
}

/// How a user signs in. The identity row is scoped to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum LoginChannel {
    Email = 0,
    Username = 1,
    Phone = 2,
}

impl LoginChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginChannel::Email => "email",
            LoginChannel::Username => "username",
            LoginChannel::Phone => "phone",
        }
    }
}

impl fmt::Display for LoginChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: i64,                         // internal key, never exposed
    pub uid: String,                     // public identifier
    pub login_channel: LoginChannel,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: Status,
    pub name: String,
    pub sex: Sex,
    pub location: Option<String>,
    pub last_active_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl UserRecord {
    /// The identifier the user authenticates with on their channel.
    pub fn login_identifier(&self) -> Option<&str> {
        match self.login_channel {
            LoginChannel::Email => self.email.as_deref(),
            LoginChannel::Username => self.username.as_deref(),
            LoginChannel::Phone => self.phone.as_deref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub uid: String,
    pub login_channel: LoginChannel,
    pub identifier: String,
    pub password_hash: String,
    pub role: Role,
    pub name: String,
    pub now: OffsetDateTime,
}

/// Partial update of a user row. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub sex: Option<Sex>,
    pub location: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub status: Option<Status>,
    pub last_active_at: Option<OffsetDateTime>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.phone.is_none()
            && self.name.is_none()
            && self.sex.is_none()
            && self.location.is_none()
            && self.password_hash.is_none()
            && self.role.is_none()
            && self.status.is_none()
            && self.last_active_at.is_none()
    }

    pub fn apply_to(&self, user: &mut UserRecord) {
        if let Some(v) = &self.email {
            user.email = Some(v.clone());
        }
        if let Some(v) = &self.username {
            user.username = Some(v.clone());
        }
        if let Some(v) = &self.phone {
            user.phone = Some(v.clone());
        }
        if let Some(v) = &self.name {
            user.name = v.clone();
        }
        if let Some(v) = self.sex {
            user.sex = v;
        }
        if let Some(v) = &self.location {
            user.location = Some(v.clone());
        }
        if let Some(v) = &self.password_hash {
            user.password_hash = v.clone();
        }
        if let Some(v) = self.role {
            user.role = v;
        }
        if let Some(v) = self.status {
            user.status = v;
        }
        if let Some(v) = self.last_active_at {
            user.last_active_at = v;
        }
    }
}

/// 32 hex chars, distinct from the internal auto-increment key.
pub fn generate_uid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
