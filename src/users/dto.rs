use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::{LoginChannel, Role, Sex, Status, UserRecord};

/// What anyone may see about a user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicIdentity {
    pub uid: String,
    pub name: String,
    pub level: u32,
    pub continuous_days: u32,
}

/// Full view, only returned to the user themselves.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrivateIdentity {
    pub uid: String,
    pub name: String,
    pub login_channel: LoginChannel,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub sex: Sex,
    pub location: Option<String>,
    pub role: Role,
    pub status: Status,
    pub is_admin: bool,
    pub is_super_admin: bool,
    pub level: u32,
    pub exp: u64,
    pub continuous_days: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PrivateIdentity {
    pub fn new(user: &UserRecord, level: u32, exp: u64, continuous_days: u32) -> Self {
        Self {
            uid: user.uid.clone(),
            name: user.name.clone(),
            login_channel: user.login_channel,
            email: user.email.clone(),
            username: user.username.clone(),
            phone: user.phone.clone(),
            sex: user.sex,
            location: user.location.clone(),
            role: user.role,
            status: user.status,
            is_admin: user.role.is_elevated(),
            is_super_admin: user.role == Role::Super,
            level,
            exp,
            continuous_days,
            last_active_at: user.last_active_at,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "view", rename_all = "lowercase")]
pub enum IdentityView {
    Public(PublicIdentity),
    Private(PrivateIdentity),
}

/// Body of `PATCH /users/me`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub sex: Option<Sex>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: Status,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: Role,
}
