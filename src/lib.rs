pub mod auth;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod logger;
pub mod mailer;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod schema;
pub mod state;

pub use crate::config::{AppConfig, DbPool};
pub use crate::errors::ApiError;
pub use crate::state::AppState;
