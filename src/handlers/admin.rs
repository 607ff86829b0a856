use actix_web::{delete, post, web, HttpResponse};
use log::info;
use serde_json::json;

use crate::auth::{normalize_email, SessionUser};
use crate::errors::ApiError;
use crate::models::{AppUser, EmailRequest, Role};
use crate::state::AppState;

async fn target_user(state: &AppState, email: &str) -> Result<AppUser, ApiError> {
    state
        .users
        .find_by_email(email)
        .await?
        .ok_or_else(|| ApiError::NotFoundError("User not found".to_string()))
}

#[post("/admin/promote")]
pub async fn promote(
    state: web::Data<AppState>,
    user: SessionUser,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let email = normalize_email(&body.email);
    let target = target_user(&state, &email).await?;

    if target.is_admin() {
        return Err(ApiError::validation(format!("{} is already an administrator", email)));
    }
    state.users.set_role(target.id, Role::Admin).await?;

    info!("{} promoted {} to admin", user.email, email);
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("{} is now an administrator", email),
        "email": email,
        "role": Role::Admin
    })))
}

#[delete("/admin/promote")]
pub async fn demote(
    state: web::Data<AppState>,
    user: SessionUser,
    body: web::Json<EmailRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let email = normalize_email(&body.email);

    if email == user.email {
        return Err(ApiError::validation("You cannot remove your own administrator role"));
    }
    let target = target_user(&state, &email).await?;
    if !target.is_admin() {
        return Err(ApiError::validation(format!("{} is not an administrator", email)));
    }
    state.users.set_role(target.id, Role::User).await?;

    info!("{} demoted {} to user", user.email, email);
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("{} is no longer an administrator", email),
        "email": email,
        "role": Role::User
    })))
}
