use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager};
use diesel::Connection;
use log::{error, info};
use serde_json::json;
use std::env;
use std::io;

use djerba_adventures::config::{AppConfig, DB_INIT_SQL};
use djerba_adventures::handlers;
use djerba_adventures::logger::setup_logger;
use djerba_adventures::middleware::RequestLogger;
use djerba_adventures::state::AppState;

#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, e);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    setup_logger();

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .map_err(|e| startup_error("PORT must be a number", e))?;

    let config = AppConfig::from_env();
    config
        .validate()
        .map_err(|e| startup_error("Invalid configuration", e))?;

    info!("Connecting to database");
    let mut conn = PgConnection::establish(&config.database_url)
        .map_err(|e| startup_error("Failed to establish connection for schema setup", e))?;
    conn.batch_execute(DB_INIT_SQL)
        .map_err(|e| startup_error("Failed to execute database initialization script", e))?;
    info!("Database initialization complete.");

    let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
    let pool = r2d2::Pool::builder()
        .build(manager)
        .map_err(|e| startup_error("Failed to create database connection pool", e))?;

    let state = web::Data::new(AppState::new(pool, config));
    info!(
        "Mail: {}, Google sign-in: {}, catalog: {}",
        if state.config.smtp.is_some() { "smtp" } else { "disabled" },
        if state.google.is_some() { "enabled" } else { "disabled" },
        if state.catalog.is_some() { "sanity" } else { "disabled" },
    );

    info!("Starting HTTP server at http://{}:{}", host, port);

    HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .service(health_check)
                    .configure(handlers::configure),
            )
    })
    .workers(2)
    .keep_alive(std::time::Duration::from_secs(75))
    .shutdown_timeout(30)
    .bind((host, port))?
    .run()
    .await
}
