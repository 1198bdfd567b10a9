use serde::{Deserialize, Serialize};

use crate::{
    auth::services::Session,
    levels::repo_types::LevelInfo,
    streak::services::StreakInfo,
    users::{dto::PrivateIdentity, repo_types::LoginChannel},
};

fn default_channel() -> LoginChannel {
    LoginChannel::Email
}

/// Request body for registration and login.
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(alias = "account")]
    pub identifier: String,
    pub password: String,
    #[serde(default = "default_channel")]
    pub channel: LoginChannel,
}

/// Response returned after login or registration.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: PrivateIdentity,
    pub streak: StreakInfo,
    pub level: LevelInfo,
}

impl From<Session> for AuthResponse {
    fn from(s: Session) -> Self {
        Self {
            token: s.token,
            token_type: "Bearer",
            expires_in: s.expires_in,
            user: s.user,
            streak: s.streak,
            level: s.level,
        }
    }
}
