use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    config::JwtConfig,
    error::{AppError, AppResult},
    models::{Role, TokenPair, User},
};

/// TokenKind
///
/// Distinguishes short-lived access tokens from refresh tokens so one can
/// never be replayed as the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims
///
/// Payload of every token this service signs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user id, as a decimal string.
    pub sub: String,
    /// The role at the time of issue. Access checks trust it until expiry.
    pub role: Role,
    pub typ: TokenKind,
    /// Issued At (iat), seconds since epoch.
    pub iat: i64,
    /// Expiration Time (exp), seconds since epoch.
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> AppResult<i64> {
        self.sub
            .parse()
            .map_err(|_| AppError::unauthorized("token subject is not a user id"))
    }
}

/// Identity
///
/// The resolved caller of an authenticated request. The authentication
/// interceptor stores it in the request extensions; handlers take it as an
/// argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners and admins may modify a resource.
    pub fn can_modify(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    /// Owners, teachers and admins may read a resource.
    pub fn can_read(&self, owner_id: i64) -> bool {
        self.role.sees_all_issues() || self.user_id == owner_id
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or_else(|| AppError::unauthorized("authentication required"))
    }
}

/// JwtKeys
///
/// Encoding and decoding keys derived once from the shared secret, plus the
/// token lifetimes.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            algorithm: config.algorithm,
            access_ttl: Duration::minutes(config.access_ttl_minutes),
            refresh_ttl: Duration::days(config.refresh_ttl_days),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Signs a token of `kind` for `user`, valid from `now`.
    pub fn issue(&self, user_id: i64, role: Role, kind: TokenKind, now: DateTime<Utc>) -> AppResult<String> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            typ: kind,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding)?)
    }

    pub fn issue_pair(&self, user: &User, now: DateTime<Utc>) -> AppResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.issue(user.id, user.role, TokenKind::Access, now)?,
            refresh_token: self.issue(user.id, user.role, TokenKind::Refresh, now)?,
            token_type: "bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }

    /// verify
    ///
    /// Decodes `token`, checking signature, algorithm and expiry, and that it
    /// is of the `expected` kind. Every failure is `AppError::Unauthorized`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> AppResult<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::unauthorized("token has expired"),
                ErrorKind::InvalidSignature => AppError::unauthorized("token signature is invalid"),
                _ => AppError::unauthorized("token is invalid"),
            })?;

        if claims.typ != expected {
            return Err(AppError::unauthorized(match expected {
                TokenKind::Access => "an access token is required",
                TokenKind::Refresh => "a refresh token is required",
            }));
        }
        Ok(claims)
    }
}

/// Splits `Bearer <token>` (scheme is case-insensitive) and returns the token.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// --- Passwords ---

/// Hashes `password` with Argon2id into a PHC string. CPU-bound: call it via
/// `spawn_blocking` from async code.
pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("stored password hash is malformed: {e}");
            false
        }
    }
}

/// Runs `hash_password` on the blocking pool.
pub async fn hash_password_blocking(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::internal(format!("password hashing task failed: {e}")))?
}

/// Runs `verify_password` on the blocking pool.
pub async fn verify_password_blocking(password: String, stored_hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| AppError::internal(format!("password verification task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn keys() -> JwtKeys {
        JwtKeys::new(&AppConfig::default().jwt)
    }

    #[test]
    fn access_token_carries_identity() {
        let keys = keys();
        let token = keys.issue(42, Role::Teacher, TokenKind::Access, Utc::now()).unwrap();

        let claims = keys.verify(&token, TokenKind::Access).unwrap();

        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, Role::Teacher);
        assert_eq!(claims.exp - claims.iat, 60 * 60);
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let keys = keys();
        let issued = Utc::now() - Duration::hours(2);
        let token = keys.issue(1, Role::Student, TokenKind::Access, issued).unwrap();

        match keys.verify(&token, TokenKind::Access) {
            Err(AppError::Unauthorized(message)) => assert_eq!(message, "token has expired"),
            other => panic!("expected unauthorized, got {other:?}"),
        }
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let mut config = AppConfig::default().jwt;
        config.secret = "another-secret".to_string();
        let foreign = JwtKeys::new(&config);
        let token = foreign.issue(1, Role::Admin, TokenKind::Access, Utc::now()).unwrap();

        assert!(matches!(
            keys().verify(&token, TokenKind::Access),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let keys = keys();
        let token = keys.issue(1, Role::Student, TokenKind::Refresh, Utc::now()).unwrap();

        assert!(keys.verify(&token, TokenKind::Access).is_err());
        assert!(keys.verify(&token, TokenKind::Refresh).is_ok());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            keys().verify("not.a.jwt", TokenKind::Access),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse battery", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn only_owner_or_admin_can_modify() {
        let student = Identity { user_id: 5, role: Role::Student };
        let teacher = Identity { user_id: 6, role: Role::Teacher };
        let admin = Identity { user_id: 7, role: Role::Admin };

        assert!(student.can_modify(5));
        assert!(!student.can_modify(9));
        assert!(!teacher.can_modify(9));
        assert!(teacher.can_read(9));
        assert!(!student.can_read(9));
        assert!(admin.can_modify(9));
    }
}
