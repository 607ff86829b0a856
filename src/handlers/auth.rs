use actix_web::{get, http::header, post, put, web, HttpResponse};
use chrono::{Duration, Utc};
use log::{debug, info, warn};
use reqwest::Url;
use serde_json::json;

use crate::auth::password::{generate_token, hash_password, validate_password, verify_password};
use crate::auth::session::session_for;
use crate::auth::{normalize_email, SessionUser, SignInIdentity};
use crate::errors::ApiError;
use crate::handlers::validate_email;
use crate::models::{
    AuthMethod, CredentialsRequest, EmailLinkQuery, EmailRequest, LoginToken, NewAppUser, NewPasswordRequest,
    OAuthCallbackQuery, RegisterRequest, Role, TokenQuery,
};
use crate::state::AppState;

const VERIFICATION_TTL_HOURS: i64 = 24;
const RESET_TTL_HOURS: i64 = 1;
const SIGN_IN_LINK_TTL_HOURS: i64 = 24;
const UNVERIFIED_RETENTION_DAYS: i64 = 7;

const RESEND_MESSAGE: &str = "If this account is awaiting verification, a new link has been sent";
const RESET_MESSAGE: &str = "If an account exists for this email, a reset link has been sent";

#[post("/auth/register")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    debug!("Registration attempt for {}", email);
    validate_email(&email)?;
    validate_password(&body.password)?;

    let now = Utc::now().naive_utc();
    if let Some(existing) = state.users.find_by_email(&email).await? {
        match (existing.auth_method, existing.email_verification_expires) {
            (AuthMethod::Password, Some(expires)) if !existing.is_verified() && expires <= now => {
                info!("Replacing unverified account {} whose verification window closed", email);
                state.users.delete(existing.id).await?;
            },
            (AuthMethod::Password, Some(_)) if !existing.is_verified() => {
                return Err(ApiError::validation(
                    "An account with this email is awaiting verification. Check your inbox",
                ));
            },
            _ => return Err(ApiError::validation("An account with this email already exists")),
        }
    }

    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
    let token = generate_token();

    let user = state
        .users
        .create(NewAppUser {
            email: email.clone(),
            name,
            image: None,
            role: Role::User,
            auth_method: AuthMethod::Password,
            provider_account_id: None,
            password_hash: Some(hash_password(&body.password)?),
            email_verified_at: None,
            email_verification_token: Some(token.clone()),
            email_verification_expires: Some(now + Duration::hours(VERIFICATION_TTL_HOURS)),
        })
        .await?;

    let email_sent = match state.notifier.verify_email(&user.email, &user.name, &token).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Verification email for {} not sent: {}", user.email, e);
            false
        },
    };

    info!("Registered user {} (id {})", user.email, user.id);
    Ok(HttpResponse::Created().json(json!({
        "message": "Account created. Check your email to verify your address",
        "user": user,
        "emailSent": email_sent
    })))
}

#[get("/auth/verify-email")]
pub async fn verify_email(
    state: web::Data<AppState>,
    query: web::Query<TokenQuery>,
) -> Result<HttpResponse, ApiError> {
    let now = Utc::now().naive_utc();
    match state.users.consume_verification_token(&query.token, now).await? {
        Some(user) => {
            info!("Email verified for {}", user.email);
            Ok(HttpResponse::Ok().json(json!({
                "message": "Email verified",
                "email": user.email
            })))
        },
        None => Err(ApiError::validation("Invalid or expired verification token")),
    }
}

#[post("/auth/resend-verification")]
pub async fn resend_verification(
    state: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    validate_email(&email)?;

    match state.users.find_by_email(&email).await? {
        Some(user) if !user.is_verified() && user.auth_method == AuthMethod::Password => {
            let token = generate_token();
            let expires = Utc::now().naive_utc() + Duration::hours(VERIFICATION_TTL_HOURS);
            state.users.set_verification_token(user.id, &token, expires).await?;
            if let Err(e) = state.notifier.verify_email(&user.email, &user.name, &token).await {
                warn!("Verification email for {} not sent: {}", user.email, e);
            }
        },
        Some(_) => debug!("Resend requested for {} which needs no verification", email),
        None => debug!("Resend requested for unknown email {}", email),
    }

    Ok(HttpResponse::Ok().json(json!({ "message": RESEND_MESSAGE })))
}

#[post("/auth/reset-password")]
pub async fn request_password_reset(
    state: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    validate_email(&email)?;

    if let Some(user) = state.users.find_by_email(&email).await? {
        let token = generate_token();
        let expires = Utc::now().naive_utc() + Duration::hours(RESET_TTL_HOURS);
        state.users.set_reset_token(user.id, &token, expires).await?;
        if let Err(e) = state.notifier.reset_password(&user.email, &token).await {
            warn!("Password reset email for {} not sent: {}", user.email, e);
        }
    } else {
        debug!("Password reset requested for unknown email {}", email);
    }

    Ok(HttpResponse::Ok().json(json!({ "message": RESET_MESSAGE })))
}

#[put("/auth/reset-password")]
pub async fn reset_password(
    state: web::Data<AppState>,
    body: web::Json<NewPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    validate_password(&body.password)?;
    let password_hash = hash_password(&body.password)?;

    let now = Utc::now().naive_utc();
    match state.users.consume_reset_token(&body.token, &password_hash, now).await? {
        Some(user) => {
            info!("Password reset for {}", user.email);
            Ok(HttpResponse::Ok().json(json!({ "message": "Password updated" })))
        },
        None => Err(ApiError::validation("Invalid or expired reset token")),
    }
}

#[post("/auth/check-email-verified")]
pub async fn check_email_verified(
    state: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))?;

    Ok(HttpResponse::Ok().json(json!({ "verified": user.is_verified() })))
}

#[post("/auth/signin/credentials")]
pub async fn sign_in_credentials(
    state: web::Data<AppState>,
    body: web::Json<CredentialsRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    debug!("Credentials sign-in attempt for {}", email);

    let user = match state.users.find_by_email(&email).await? {
        Some(user) => user,
        None => {
            debug!("Sign-in failed: no user {}", email);
            return Err(ApiError::AuthError("Invalid credentials".to_string()));
        },
    };

    let valid = match &user.password_hash {
        Some(hash) => verify_password(&body.password, hash)?,
        None => false,
    };
    if !valid {
        debug!("Sign-in failed: bad password for {}", email);
        return Err(ApiError::AuthError("Invalid credentials".to_string()));
    }

    if user.auth_method == AuthMethod::Password && !user.is_verified() {
        return Err(ApiError::AuthError("Please verify your email before signing in".to_string()));
    }

    let outcome = state.reconciler.sign_in(SignInIdentity::password(&email)).await;
    let session = session_for(outcome.user.as_ref(), &email, &user.name, &state.config)?;

    info!("User {} signed in with password (role {})", email, session.user.role);
    Ok(HttpResponse::Ok().json(session))
}

#[post("/auth/signin/email")]
pub async fn sign_in_email(
    state: web::Data<AppState>,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&body.email);
    validate_email(&email)?;

    let token = generate_token();
    state
        .identities
        .create_login_token(LoginToken {
            token: token.clone(),
            identifier: email.clone(),
            expires_at: Utc::now().naive_utc() + Duration::hours(SIGN_IN_LINK_TTL_HOURS),
        })
        .await?;

    let href = Url::parse_with_params(
        &state.config.public_url("/api/auth/callback/email"),
        &[("token", token.as_str()), ("email", email.as_str())],
    )
    .map_err(|e| ApiError::InternalError(format!("Failed to build sign-in link: {}", e)))?;

    state
        .notifier
        .sign_in_link(&email, href.as_str())
        .await
        .map_err(|e| ApiError::InternalError(format!("Sign-in email to {} not sent: {}", email, e)))?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Check your email for a sign-in link" })))
}

#[get("/auth/callback/email")]
pub async fn callback_email(
    state: web::Data<AppState>,
    query: web::Query<EmailLinkQuery>,
) -> Result<HttpResponse, ApiError> {
    let email = normalize_email(&query.email);
    let now = Utc::now().naive_utc();

    if !state.identities.consume_login_token(&email, &query.token, now).await? {
        return Err(ApiError::AuthError("Invalid or expired sign-in link".to_string()));
    }

    let outcome = state.reconciler.sign_in(SignInIdentity::email_link(&email)).await;
    let fallback_name = email.split('@').next().unwrap_or_default().to_string();
    let session = session_for(outcome.user.as_ref(), &email, &fallback_name, &state.config)?;

    info!("User {} signed in with email link (role {})", email, session.user.role);
    Ok(HttpResponse::Ok().json(session))
}

#[get("/auth/signin/google")]
pub async fn sign_in_google(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::NotFoundError("Google sign-in is not configured".to_string()))?;

    let url = google.authorize_url(&google.issue_state()?)?;
    Ok(HttpResponse::Found().insert_header((header::LOCATION, url)).finish())
}

#[get("/auth/callback/google")]
pub async fn callback_google(
    state: web::Data<AppState>,
    query: web::Query<OAuthCallbackQuery>,
) -> Result<HttpResponse, ApiError> {
    let google = state
        .google
        .as_ref()
        .ok_or_else(|| ApiError::NotFoundError("Google sign-in is not configured".to_string()))?;

    if let Some(error) = &query.error {
        return Err(ApiError::AuthError(format!("Google sign-in failed: {}", error)));
    }
    let oauth_state = query
        .state
        .as_deref()
        .ok_or_else(|| ApiError::AuthError("Missing sign-in state".to_string()))?;
    google.verify_state(oauth_state)?;
    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ApiError::validation("Missing authorization code"))?;

    let profile = google.exchange_code(code).await?;
    let email = normalize_email(&profile.email);
    let mut identity = SignInIdentity::oauth(&email, &profile.sub, profile.name.clone(), profile.picture.clone());
    identity.email_verified = profile.email_verified;

    let outcome = state.reconciler.sign_in(identity).await;
    let fallback_name = profile.name.unwrap_or_else(|| email.clone());
    let session = session_for(outcome.user.as_ref(), &email, &fallback_name, &state.config)?;

    info!("User {} signed in with Google (role {})", email, session.user.role);
    Ok(HttpResponse::Ok().json(session))
}

#[get("/auth/session")]
pub async fn current_session(user: SessionUser) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "user": user }))
}

#[post("/auth/cleanup-unverified")]
pub async fn cleanup_unverified(
    state: web::Data<AppState>,
    user: SessionUser,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let cutoff = Utc::now().naive_utc() - Duration::days(UNVERIFIED_RETENTION_DAYS);
    let deleted = state.users.delete_stale_unverified(cutoff).await?;

    info!("Cleanup by {} removed {} unverified account(s)", user.email, deleted);
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("{} unverified account(s) deleted", deleted),
        "deletedCount": deleted
    })))
}

#[get("/auth/cleanup-unverified")]
pub async fn count_unverified(
    state: web::Data<AppState>,
    user: SessionUser,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let cutoff = Utc::now().naive_utc() - Duration::days(UNVERIFIED_RETENTION_DAYS);
    let count = state.users.count_stale_unverified(cutoff).await?;

    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}
