use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};

use crate::auth::password::generate_token;
use crate::config::{AppConfig, GoogleConfig};
use crate::errors::ApiError;

const AUTHORIZE_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const STATE_TTL_MINUTES: i64 = 10;
const STATE_AUDIENCE: &str = "google-oauth-state";

pub const CALLBACK_PATH: &str = "/api/auth/callback/google";

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    nonce: String,
    aud: String,
    exp: usize,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Clone)]
pub struct GoogleOAuth {
    client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    state_secret: String,
}

impl GoogleOAuth {
    pub fn new(google: &GoogleConfig, config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            client_id: google.client_id.clone(),
            client_secret: google.client_secret.clone(),
            redirect_uri: config.public_url(CALLBACK_PATH),
            state_secret: config.session_secret.clone(),
        }
    }

    /// Signed, short-lived `state` parameter; nothing is kept server side.
    pub fn issue_state(&self) -> Result<String, ApiError> {
        let claims = StateClaims {
            nonce: generate_token(),
            aud: STATE_AUDIENCE.to_string(),
            exp: (Utc::now() + Duration::minutes(STATE_TTL_MINUTES)).timestamp() as usize,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(self.state_secret.as_bytes()))
            .map_err(|e| {
                error!("Failed to sign OAuth state: {}", e);
                ApiError::InternalError("Failed to start sign-in".to_string())
            })
    }

    pub fn verify_state(&self, state: &str) -> Result<(), ApiError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[STATE_AUDIENCE]);
        decode::<StateClaims>(state, &DecodingKey::from_secret(self.state_secret.as_bytes()), &validation)
            .map(|_| ())
            .map_err(|e| {
                debug!("Rejected OAuth state: {}", e);
                ApiError::AuthError("Invalid or expired sign-in attempt".to_string())
            })
    }

    pub fn authorize_url(&self, state: &str) -> Result<String, ApiError> {
        Url::parse_with_params(
            AUTHORIZE_ENDPOINT,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("prompt", "select_account"),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|e| ApiError::InternalError(format!("Failed to build authorization URL: {}", e)))
    }

    /// Trades the authorization code for the signed-in Google profile.
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleProfile, ApiError> {
        let token = self
            .client
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Google token exchange failed: {}", e);
                ApiError::AuthError("Google sign-in failed".to_string())
            })?
            .json::<TokenResponse>()
            .await
            .map_err(|e| {
                error!("Unreadable Google token response: {}", e);
                ApiError::AuthError("Google sign-in failed".to_string())
            })?;

        self.client
            .get(USERINFO_ENDPOINT)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Google userinfo request failed: {}", e);
                ApiError::AuthError("Google sign-in failed".to_string())
            })?
            .json::<GoogleProfile>()
            .await
            .map_err(|e| {
                error!("Unreadable Google userinfo response: {}", e);
                ApiError::AuthError("Google sign-in failed".to_string())
            })
    }
}
