use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use chrono::{Duration, Utc};
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::auth::normalize_email;
use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::{AppUser, Role};
use crate::repository::UserRepository;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Lowercased email.
    pub sub: String,
    pub uid: Option<i32>,
    pub name: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: usize,
    pub user: SessionUser,
}

pub fn issue_session(
    email: &str,
    user_id: Option<i32>,
    name: &str,
    role: Role,
    config: &AppConfig,
) -> Result<SessionResponse, ApiError> {
    let now = Utc::now();
    let iat = now.timestamp() as usize;
    let exp = (now + Duration::seconds(config.session_ttl_secs)).timestamp() as usize;

    let claims = Claims {
        sub: normalize_email(email),
        uid: user_id,
        name: name.to_string(),
        role,
        iat,
        exp,
    };

    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(config.session_secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Failed to generate session token: {}", e);
        ApiError::InternalError("Failed to generate session token".to_string())
    })?;

    Ok(SessionResponse {
        token,
        expires_at: exp,
        user: SessionUser::from(claims),
    })
}

/// Issues a session for a reconciled sign-in.
pub fn session_for(user: Option<&AppUser>, email: &str, fallback_name: &str, config: &AppConfig) -> Result<SessionResponse, ApiError> {
    match user {
        Some(user) => issue_session(&user.email, Some(user.id), &user.name, user.role, config),
        None => issue_session(email, None, fallback_name, Role::User, config),
    }
}

pub fn decode_session(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        debug!("Rejected session token: {}", e);
        ApiError::AuthError("Invalid or expired session".to_string())
    })
}

fn bearer_token(value: Option<&str>) -> Result<&str, ApiError> {
    let value = value.ok_or_else(|| ApiError::AuthError("Missing authorization".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(ApiError::AuthError("Authorization must be Bearer".to_string())),
    }
}

/// The caller of a request, with the role as currently persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: Option<i32>,
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl From<Claims> for SessionUser {
    fn from(claims: Claims) -> Self {
        SessionUser {
            id: claims.uid,
            email: claims.sub,
            name: claims.name,
            role: claims.role,
        }
    }
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::admin_only())
        }
    }

    /// Sessions issued while reconciliation failed carry no user id.
    pub fn require_user_id(&self) -> Result<i32, ApiError> {
        self.id
            .ok_or_else(|| ApiError::AuthError("No account is attached to this session".to_string()))
    }

    /// Stamps the persisted role onto the token's identity. The token's own
    /// role is never trusted: a missing or unreadable record yields `user`.
    pub async fn resolve(claims: Claims, users: &dyn UserRepository) -> Self {
        let mut session = SessionUser::from(claims);
        match users.find_by_email(&session.email).await {
            Ok(Some(user)) => {
                if user.role != session.role {
                    debug!("Session role for {} refreshed from {} to {}", session.email, session.role, user.role);
                }
                session.id = Some(user.id);
                session.name = user.name;
                session.role = user.role;
            },
            Ok(None) => {
                warn!("Session for {} has no account record", session.email);
                session.id = None;
                session.role = Role::User;
            },
            Err(e) => {
                error!("Could not refresh role for {}: {}. Treating the session as role user", session.email, e);
                session.role = Role::User;
            },
        }
        session
    }
}

impl FromRequest for SessionUser {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let authorization = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Box::pin(async move {
            let state = state.ok_or_else(|| ApiError::InternalError("Application state is not registered".to_string()))?;
            let token = bearer_token(authorization.as_deref())?;
            let claims = decode_session(token, &state.config.session_secret)?;
            Ok(SessionUser::resolve(claims, state.users.as_ref()).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AuthMethod;
    use crate::repository::memory::{new_user, MemoryStore};
    use std::sync::atomic::Ordering;

    #[test]
    fn issued_tokens_decode_with_the_same_secret() {
        let config = AppConfig::for_tests();
        let session = issue_session("Guest@Example.com", Some(4), "Guest", Role::User, &config).unwrap();

        let claims = decode_session(&session.token, &config.session_secret).unwrap();
        assert_eq!(claims.sub, "guest@example.com");
        assert_eq!(claims.uid, Some(4));
        assert_eq!(claims.exp - claims.iat, 3600);

        assert!(decode_session(&session.token, "another-secret").is_err());
    }

    #[test]
    fn authorization_header_must_be_bearer() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(None).is_err());
    }

    #[tokio::test]
    async fn role_comes_from_the_store_not_the_token() {
        let store = MemoryStore::new();
        let admin = store.seed_user(new_user("boss@example.com", Role::Admin, AuthMethod::OAuth));
        let config = AppConfig::for_tests();

        // token minted while the account was still a plain user
        let stale = issue_session(&admin.email, Some(admin.id), "Boss", Role::User, &config).unwrap();
        let claims = decode_session(&stale.token, &config.session_secret).unwrap();
        assert!(SessionUser::resolve(claims, &store).await.is_admin());

        store.with_user(admin.id, |u| u.role = Role::User);
        let elevated = issue_session(&admin.email, Some(admin.id), "Boss", Role::Admin, &config).unwrap();
        let claims = decode_session(&elevated.token, &config.session_secret).unwrap();
        assert!(!SessionUser::resolve(claims, &store).await.is_admin());
    }

    #[tokio::test]
    async fn unreadable_store_never_grants_admin() {
        let store = MemoryStore::new();
        store.broken.store(true, Ordering::SeqCst);
        let config = AppConfig::for_tests();

        let session = issue_session("boss@example.com", Some(9), "Boss", Role::Admin, &config).unwrap();
        let claims = decode_session(&session.token, &config.session_secret).unwrap();
        let user = SessionUser::resolve(claims, &store).await;
        assert_eq!(user.role, Role::User);
        assert!(user.require_admin().is_err());
        assert_eq!(user.id, Some(9));

        let session = issue_session("x@example.com", None, "X", Role::User, &config).unwrap();
        let claims = decode_session(&session.token, &config.session_secret).unwrap();
        let user = SessionUser::resolve(claims, &store).await;
        assert_eq!(user.role, Role::User);
        assert!(user.require_user_id().is_err());
    }
}
