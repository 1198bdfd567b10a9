use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};

use crate::{
    auth::claims::Claims,
    config::JwtConfig,
    error::{ApiError, AuthError},
    state::AppState,
    users::repo_types::{LoginChannel, Role},
};

/// Signs and verifies session tokens. Verification is a pure function of
/// the token and the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    elevated_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(1) as u64) * 60),
            elevated_ttl: Duration::from_secs((cfg.elevated_ttl_minutes.max(1) as u64) * 60),
        }
    }

    /// Elevated roles get the longer TTL.
    pub fn ttl_for(&self, role: Role) -> Duration {
        if role.is_elevated() {
            self.elevated_ttl
        } else {
            self.ttl
        }
    }

    pub fn issue(&self, subject: &str, role: Role, channel: LoginChannel) -> anyhow::Result<String> {
        self.issue_at(subject, role, channel, self.ttl_for(role), OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        role: Role,
        channel: LoginChannel,
        ttl: Duration,
        issued_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let exp = issued_at + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: subject.to_string(),
            role,
            channel,
            iat: issued_at.unix_timestamp(),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_uid = %subject, role = ?role, "jwt signed");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::TokenMissing);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            }
        })?;
        debug!(user_uid = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }

    /// For endpoints that serve both anonymous and signed-in callers.
    pub fn verify_optional(&self, token: Option<&str>) -> Option<Claims> {
        self.verify(token?).ok()
    }
}

/// Bearer token from the `Authorization` header, falling back to an
/// `Authorization` cookie holding the same `Bearer <token>` value.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        return strip_bearer(value).map(str::to_string);
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "Authorization")
        .and_then(|(_, value)| {
            let decoded = value.trim_matches('"').replace("%20", " ");
            strip_bearer(&decoded).map(str::to_string)
        })
}

fn strip_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Claims of a verified caller.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer_token(&parts.headers).ok_or(AuthError::TokenMissing)?;
        let claims = keys.verify(&token).map_err(|e| {
            warn!(error = %e, "token rejected");
            e
        })?;
        Ok(AuthUser(claims))
    }
}

/// Claims of the caller if a valid token was presented, `None` otherwise.
pub struct MaybeAuthUser(pub Option<Claims>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer_token(&parts.headers);
        Ok(MaybeAuthUser(keys.verify_optional(token.as_deref())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn make_keys(issuer: &str, audience: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: issuer.into(),
            audience: audience.into(),
            ttl_minutes: 5,
            elevated_ttl_minutes: 10,
        })
    }

    #[test]
    fn sign_and_verify_token() {
        let keys = make_keys("test-issuer", "test-aud");
        let token = keys.issue("abc123", Role::Normal, LoginChannel::Email).expect("sign");
        let claims = keys.verify(&token).expect("verify token");
        assert_eq!(claims.sub, "abc123");
        assert_eq!(claims.role, Role::Normal);
        assert_eq!(claims.channel, LoginChannel::Email);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 5 * 60);
    }

    #[test]
    fn elevated_roles_get_longer_ttl() {
        let keys = make_keys("iss", "aud");
        assert_eq!(keys.ttl_for(Role::Normal), Duration::from_secs(300));
        assert_eq!(keys.ttl_for(Role::Admin), Duration::from_secs(600));
        assert_eq!(keys.ttl_for(Role::Super), Duration::from_secs(600));

        let token = keys.issue("root", Role::Super, LoginChannel::Username).unwrap();
        let claims = keys.verify(&token).unwrap();
        assert_eq!(claims.exp - claims.iat, 600);
    }

    #[test]
    fn one_second_past_expiry_is_expired() {
        let keys = make_keys("iss", "aud");
        let ttl = Duration::from_secs(60);
        let issued_at = OffsetDateTime::now_utc() - TimeDuration::seconds(61);
        let token = keys
            .issue_at("abc", Role::Normal, LoginChannel::Email, ttl, issued_at)
            .unwrap();
        assert!(matches!(keys.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn tampered_or_foreign_tokens_are_invalid() {
        let keys = make_keys("iss", "aud");
        let token = keys.issue("abc", Role::Normal, LoginChannel::Email).unwrap();
        assert!(matches!(keys.verify("not.a.jwt"), Err(AuthError::TokenInvalid)));

        let forged = JwtKeys::from_config(&JwtConfig {
            secret: "another-secret".into(),
            issuer: "iss".into(),
            audience: "aud".into(),
            ttl_minutes: 5,
            elevated_ttl_minutes: 10,
        })
        .issue("abc", Role::Super, LoginChannel::Email)
        .unwrap();
        assert!(matches!(keys.verify(&forged), Err(AuthError::TokenInvalid)));

        let other = make_keys("other-iss", "aud");
        assert!(matches!(other.verify(&token), Err(AuthError::TokenInvalid)));
    }

    #[test]
    fn empty_token_is_missing() {
        let keys = make_keys("iss", "aud");
        assert!(matches!(keys.verify(""), Err(AuthError::TokenMissing)));
        assert!(keys.verify_optional(None).is_none());
        assert!(keys.verify_optional(Some("garbage")).is_none());
    }

    #[test]
    fn bearer_token_reads_header_then_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; Authorization=Bearer%20xyz"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
