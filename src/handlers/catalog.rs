use actix_web::{get, web, HttpResponse};
use log::debug;

use crate::catalog::{CatalogClient, CatalogError};
use crate::errors::ApiError;
use crate::models::ItemKind;
use crate::state::AppState;

fn client(state: &AppState) -> Result<&CatalogClient, ApiError> {
    state.catalog.as_ref().ok_or_else(|| CatalogError::NotConfigured.into())
}

async fn list_items(state: &AppState, kind: ItemKind) -> Result<HttpResponse, ApiError> {
    let items = client(state)?.list(kind).await?;
    debug!("Listed {} {} item(s)", items.len(), kind);
    Ok(HttpResponse::Ok().json(items))
}

async fn item_by_slug(state: &AppState, kind: ItemKind, slug: &str) -> Result<HttpResponse, ApiError> {
    match client(state)?.by_slug(kind, slug).await? {
        Some(item) => Ok(HttpResponse::Ok().json(item)),
        None => Err(ApiError::NotFoundError(format!("No {} named {}", kind, slug))),
    }
}

#[get("/activities")]
pub async fn activities(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    list_items(&state, ItemKind::Activity).await
}

#[get("/activities/{slug}")]
pub async fn activity_by_slug(state: web::Data<AppState>, slug: web::Path<String>) -> Result<HttpResponse, ApiError> {
    item_by_slug(&state, ItemKind::Activity, &slug).await
}

#[get("/tours")]
pub async fn tours(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    list_items(&state, ItemKind::Tour).await
}

#[get("/tours/{slug}")]
pub async fn tour_by_slug(state: web::Data<AppState>, slug: web::Path<String>) -> Result<HttpResponse, ApiError> {
    item_by_slug(&state, ItemKind::Tour, &slug).await
}

#[get("/transfers")]
pub async fn transfers(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    list_items(&state, ItemKind::Transfer).await
}

#[get("/transfers/{slug}")]
pub async fn transfer_by_slug(state: web::Data<AppState>, slug: web::Path<String>) -> Result<HttpResponse, ApiError> {
    item_by_slug(&state, ItemKind::Transfer, &slug).await
}
