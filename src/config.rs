use diesel::r2d2::{self, ConnectionManager};
use diesel::pg::PgConnection;
use std::env;
use log::warn;
use rand::{thread_rng, Rng};
use rand::distributions::Alphanumeric;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

const INSECURE_SECRET: &str = "change_me_session_secret";

// Database initialization SQL, safe to run on every start
pub const DB_INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS app_user (
    user_id SERIAL PRIMARY KEY,
    email VARCHAR(255) UNIQUE NOT NULL,
    name VARCHAR(255) NOT NULL,
    image TEXT,
    role VARCHAR(16) NOT NULL DEFAULT 'user',
    auth_method VARCHAR(16) NOT NULL,
    provider_account_id VARCHAR(255),
    password_hash VARCHAR(255),
    email_verified_at TIMESTAMP,
    email_verification_token VARCHAR(128),
    email_verification_expires TIMESTAMP,
    reset_password_token VARCHAR(128),
    reset_password_expires TIMESTAMP,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_app_user_provider_account ON app_user (provider_account_id);

CREATE TABLE IF NOT EXISTS identity_account (
    account_id SERIAL PRIMARY KEY,
    provider VARCHAR(32) NOT NULL,
    provider_account_id VARCHAR(255) NOT NULL,
    email VARCHAR(255) NOT NULL,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    UNIQUE (provider, provider_account_id)
);

CREATE INDEX IF NOT EXISTS idx_identity_account_email ON identity_account (email);

CREATE TABLE IF NOT EXISTS login_token (
    token VARCHAR(128) PRIMARY KEY,
    identifier VARCHAR(255) NOT NULL,
    expires_at TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS booking (
    booking_id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES app_user(user_id) ON DELETE CASCADE,
    item_id VARCHAR(255) NOT NULL,
    item_name VARCHAR(255) NOT NULL,
    item_kind VARCHAR(16) NOT NULL,
    booking_date DATE NOT NULL,
    booking_time VARCHAR(16) NOT NULL,
    participants INTEGER NOT NULL CHECK (participants >= 1),
    status VARCHAR(16) NOT NULL DEFAULT 'pending',
    contact_email VARCHAR(255) NOT NULL,
    contact_name VARCHAR(255) NOT NULL,
    phone VARCHAR(64),
    notes TEXT,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS review (
    review_id SERIAL PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES app_user(user_id) ON DELETE CASCADE,
    item_id VARCHAR(255) NOT NULL,
    item_kind VARCHAR(16) NOT NULL,
    rating SMALLINT NOT NULL CHECK (rating BETWEEN 1 AND 5),
    comment VARCHAR(1000) NOT NULL,
    user_name VARCHAR(255) NOT NULL,
    user_email VARCHAR(255) NOT NULL,
    approved BOOLEAN NOT NULL DEFAULT TRUE,
    created_at TIMESTAMP NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMP NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, item_id, item_kind)
);

CREATE INDEX IF NOT EXISTS idx_review_item ON review (item_id, approved);
"#;

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Clone, Debug)]
pub struct SanityConfig {
    pub project_id: String,
    pub dataset: String,
    pub api_version: String,
    pub token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub session_secret: String,
    pub session_ttl_secs: i64,
    pub public_base_url: String,
    pub smtp: Option<SmtpConfig>,
    pub google: Option<GoogleConfig>,
    pub sanity: Option<SanityConfig>,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").unwrap_or_default();

        let session_secret = match env::var("SESSION_SECRET") {
            Ok(val) => val,
            Err(e) => {
                warn!("Failed to load SESSION_SECRET: {}", e);
                warn!("Using default session secret - THIS IS NOT SECURE FOR PRODUCTION!");
                warn!("Set SESSION_SECRET, for example to: {}", Self::generate_secure_secret());
                INSECURE_SECRET.to_string()
            }
        };

        let session_ttl_secs = env::var("SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(3600);

        let public_base_url = non_empty("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let smtp = match (
            non_empty("EMAIL_SERVER_HOST"),
            non_empty("EMAIL_SERVER_USER"),
            non_empty("EMAIL_SERVER_PASSWORD"),
            non_empty("EMAIL_FROM"),
        ) {
            (Some(host), Some(username), Some(password), Some(from)) => Some(SmtpConfig {
                host,
                port: env::var("EMAIL_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse::<u16>().ok())
                    .unwrap_or(587),
                username,
                password,
                from,
            }),
            _ => {
                warn!("Email configuration incomplete (EMAIL_SERVER_HOST, EMAIL_SERVER_USER, EMAIL_SERVER_PASSWORD, EMAIL_FROM). Emails will only be logged.");
                None
            }
        };

        let google = match (non_empty("GOOGLE_CLIENT_ID"), non_empty("GOOGLE_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(GoogleConfig { client_id, client_secret }),
            _ => None,
        };

        let sanity = non_empty("SANITY_PROJECT_ID").map(|project_id| SanityConfig {
            project_id,
            dataset: non_empty("SANITY_DATASET").unwrap_or_else(|| "production".to_string()),
            api_version: non_empty("SANITY_API_VERSION").unwrap_or_else(|| "2024-01-01".to_string()),
            token: non_empty("SANITY_API_TOKEN"),
        });

        Self { database_url, session_secret, session_ttl_secs, public_base_url, smtp, google, sanity }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.session_secret == INSECURE_SECRET {
            warn!("Using default session secret is not secure for production!");
        }

        if self.database_url.trim().is_empty() {
            return Err("DATABASE_URL must be set".to_string());
        }

        if self.session_secret.is_empty() {
            return Err("SESSION_SECRET must not be empty".to_string());
        }

        if self.session_ttl_secs <= 0 {
            return Err("SESSION_TTL_SECS must be positive".to_string());
        }

        if !self.public_base_url.starts_with("http://") && !self.public_base_url.starts_with("https://") {
            return Err("PUBLIC_BASE_URL must be an http(s) URL".to_string());
        }

        Ok(())
    }

    pub fn generate_secure_secret() -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect()
    }

    /// Absolute URL on the public site for `path` (which starts with `/`).
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url, path)
    }
}

#[cfg(test)]
impl AppConfig {
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/djerba_test".to_string(),
            session_secret: "test-secret".to_string(),
            session_ttl_secs: 3600,
            public_base_url: "http://localhost:3000".to_string(),
            smtp: None,
            google: None,
            sanity: None,
        }
    }
}
