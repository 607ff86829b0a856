use actix_web::web;
use chrono::{DateTime, NaiveDate};

use crate::errors::ApiError;

#[cfg(test)]
macro_rules! test_service {
    ($app:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($app.state.clone()))
                .service(actix_web::web::scope("/api").configure(crate::handlers::configure)),
        )
        .await
    };
}

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod catalog;
pub mod reviews;

/// Registers every `/api` endpoint on the enclosing scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(auth::register)
        .service(auth::verify_email)
        .service(auth::resend_verification)
        .service(auth::request_password_reset)
        .service(auth::reset_password)
        .service(auth::check_email_verified)
        .service(auth::sign_in_credentials)
        .service(auth::sign_in_email)
        .service(auth::callback_email)
        .service(auth::sign_in_google)
        .service(auth::callback_google)
        .service(auth::current_session)
        .service(auth::cleanup_unverified)
        .service(auth::count_unverified)
        .service(bookings::create_booking)
        .service(bookings::list_bookings)
        .service(bookings::update_booking_status)
        .service(bookings::delete_booking)
        .service(reviews::create_review)
        .service(reviews::list_reviews)
        .service(reviews::set_review_approval)
        .service(reviews::delete_review)
        .service(catalog::activities)
        .service(catalog::activity_by_slug)
        .service(catalog::tours)
        .service(catalog::tour_by_slug)
        .service(catalog::transfers)
        .service(catalog::transfer_by_slug)
        .service(admin::promote)
        .service(admin::demote);
}

pub(crate) fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::validation(format!("{} is required", field)))
}

pub(crate) fn parse_field<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, ApiError> {
    value
        .parse::<T>()
        .map_err(|_| ApiError::validation(format!("Invalid {}: {}", field, value)))
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| ApiError::validation(format!("Invalid date: {}", value)))
}

pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        },
        None => false,
    };
    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ApiError::validation("A valid email address is required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_accept_plain_and_timestamp_forms() {
        let expected = NaiveDate::from_ymd_opt(2026, 8, 1).unwrap();
        assert_eq!(parse_date("2026-08-01").unwrap(), expected);
        assert_eq!(parse_date("2026-08-01T00:00:00.000Z").unwrap(), expected);
        assert!(parse_date("01/08/2026").is_err());
    }

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("guest@example.com").is_ok());
        assert!(validate_email("guest@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("guest example@x.com").is_err());
    }

    #[test]
    fn required_fields_are_trimmed() {
        assert_eq!(required(Some("  tour-1 ".into()), "activityId").unwrap(), "tour-1");
        assert!(required(Some("   ".into()), "activityId").is_err());
        assert!(required(None, "activityId").is_err());
    }
}
