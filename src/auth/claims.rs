use serde::{Deserialize, Serialize};

use crate::users::repo_types::{LoginChannel, Role};

/// JWT payload used for authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,            // public user uid
    pub role: Role,             // coarse role tag
    pub channel: LoginChannel,  // how the session was opened
    pub iat: i64,               // issued at (unix timestamp)
    pub exp: i64,               // expires at (unix timestamp)
    pub iss: String,            // issuer
    pub aud: String,            // audience
}
