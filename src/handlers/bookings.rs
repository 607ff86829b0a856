use actix_web::{delete, get, patch, post, web, HttpResponse};
use log::{info, warn};
use serde_json::json;

use crate::auth::SessionUser;
use crate::errors::ApiError;
use crate::handlers::{parse_date, parse_field, required};
use crate::models::{BookingStatus, CreateBookingRequest, ItemKind, NewBooking, UpdateBookingStatusRequest};
use crate::state::AppState;

#[post("/reservations")]
pub async fn create_booking(
    state: web::Data<AppState>,
    user: SessionUser,
    body: web::Json<CreateBookingRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.require_user_id()?;
    let req = body.into_inner();

    let item_id = required(req.activity_id, "activityId")?;
    let item_name = required(req.activity_name, "activityName")?;
    let item_kind: ItemKind = parse_field(&required(req.activity_type, "activityType")?, "activityType")?;
    let date = parse_date(&required(req.date, "date")?)?;
    let time = required(req.time, "time")?;
    let participants = req
        .participants
        .ok_or_else(|| ApiError::validation("participants is required"))?;
    if participants < 1 {
        return Err(ApiError::validation("At least one participant is required"));
    }

    let booking = state
        .bookings
        .create(NewBooking {
            user_id,
            item_id,
            item_name,
            item_kind,
            date,
            time,
            participants,
            email: user.email.clone(),
            name: user.name.clone(),
            phone: req.phone.filter(|p| !p.trim().is_empty()),
            notes: req.notes.filter(|n| !n.trim().is_empty()),
        })
        .await?;
    info!("Booking {} created by {} for {}", booking.id, user.email, booking.item_name);

    match state.users.list_admins().await {
        Ok(admins) => {
            state.notifier.booking_received(&booking, &admins).await;
        },
        Err(e) => warn!("Could not load administrators to announce booking {}: {}", booking.id, e),
    }

    Ok(HttpResponse::Created().json(booking))
}

#[get("/reservations")]
pub async fn list_bookings(
    state: web::Data<AppState>,
    user: SessionUser,
) -> Result<HttpResponse, ApiError> {
    let bookings = if user.is_admin() {
        state.bookings.list_all().await?
    } else {
        state.bookings.list_for_user(user.require_user_id()?).await?
    };
    Ok(HttpResponse::Ok().json(bookings))
}

#[patch("/reservations/{id}")]
pub async fn update_booking_status(
    state: web::Data<AppState>,
    user: SessionUser,
    path: web::Path<i32>,
    body: web::Json<UpdateBookingStatusRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let id = path.into_inner();
    let next: BookingStatus = parse_field(&body.status, "status")?;

    let current = state
        .bookings
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFoundError("Booking not found".to_string()))?;
    if !current.status.can_transition_to(next) {
        return Err(ApiError::validation(format!(
            "Cannot change a {} booking to {}",
            current.status, next
        )));
    }

    let booking = match state.bookings.transition(id, current.status, next).await? {
        Some(booking) => booking,
        None => {
            warn!("Booking {} changed while {} was moving it to {}", id, user.email, next);
            return Err(ApiError::validation(format!(
                "Booking {} was changed by another request, reload and try again",
                id
            )));
        },
    };
    info!("Booking {} moved from {} to {} by {}", id, current.status, next, user.email);

    let delivery = match next {
        BookingStatus::Confirmed => Some(state.notifier.booking_confirmed(&booking).await),
        BookingStatus::Rejected => Some(state.notifier.booking_rejected(&booking).await),
        _ => None,
    };

    let mut response = json!({ "booking": booking });
    match delivery {
        Some(Ok(())) => response["emailSent"] = json!(true),
        Some(Err(e)) => {
            warn!("Booking {} is {} but the customer email failed: {}", id, next, e);
            response["emailSent"] = json!(false);
            response["emailError"] = json!(e.to_string());
        },
        None => {},
    }

    Ok(HttpResponse::Ok().json(response))
}

#[delete("/reservations/{id}")]
pub async fn delete_booking(
    state: web::Data<AppState>,
    user: SessionUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let id = path.into_inner();

    if !state.bookings.delete(id).await? {
        return Err(ApiError::NotFoundError("Booking not found".to_string()));
    }
    info!("Booking {} deleted by {}", id, user.email);
    Ok(HttpResponse::Ok().json(json!({ "message": "Booking deleted" })))
}
