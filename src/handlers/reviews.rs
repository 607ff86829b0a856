use actix_web::{delete, get, patch, post, web, HttpResponse};
use log::{debug, info};
use serde_json::json;

use crate::auth::SessionUser;
use crate::errors::ApiError;
use crate::handlers::{parse_field, required};
use crate::models::{CreateReviewRequest, ItemKind, NewReview, ReviewApprovalRequest, ReviewFilter, ReviewQuery};
use crate::state::AppState;

const MAX_COMMENT_CHARS: usize = 1000;

fn review_filter(query: ReviewQuery) -> Result<ReviewFilter, ApiError> {
    let item_kind = match query.activity_type.as_deref() {
        Some(kind) => Some(parse_field::<ItemKind>(kind, "activityType")?),
        None => None,
    };
    let approved = match query.approved.as_deref() {
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(other) => return Err(ApiError::validation(format!("Invalid approved: {}", other))),
        None => None,
    };
    Ok(ReviewFilter {
        item_id: query.activity_id.filter(|id| !id.is_empty()),
        item_kind,
        approved,
    })
}

#[post("/reviews")]
pub async fn create_review(
    state: web::Data<AppState>,
    user: SessionUser,
    body: web::Json<CreateReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    let user_id = user.require_user_id()?;
    let req = body.into_inner();

    let item_id = required(req.activity_id, "activityId")?;
    let item_kind: ItemKind = parse_field(&required(req.activity_type, "activityType")?, "activityType")?;
    let rating = req.rating.ok_or_else(|| ApiError::validation("rating is required"))?;
    if !(1..=5).contains(&rating) {
        return Err(ApiError::validation("Rating must be between 1 and 5"));
    }
    let comment = required(req.comment, "comment")?;
    if comment.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::validation(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_CHARS
        )));
    }

    if state.reviews.exists_for(user_id, &item_id, item_kind).await? {
        debug!("{} already reviewed {} {}", user.email, item_kind, item_id);
        return Err(ApiError::validation("You have already reviewed this"));
    }

    let review = state
        .reviews
        .create(NewReview {
            user_id,
            item_id,
            item_kind,
            rating,
            comment,
            user_name: user.name.clone(),
            user_email: user.email.clone(),
            approved: true,
        })
        .await
        .map_err(|e| {
            if e.is_duplicate() {
                ApiError::validation("You have already reviewed this")
            } else {
                ApiError::from(e)
            }
        })?;

    info!("Review {} posted by {} on {} {}", review.id, user.email, review.item_kind, review.item_id);
    Ok(HttpResponse::Created().json(review))
}

#[get("/reviews")]
pub async fn list_reviews(
    state: web::Data<AppState>,
    query: web::Query<ReviewQuery>,
) -> Result<HttpResponse, ApiError> {
    let filter = review_filter(query.into_inner())?;
    let reviews = state.reviews.list(&filter).await?;
    Ok(HttpResponse::Ok().json(reviews))
}

#[patch("/reviews/{id}")]
pub async fn set_review_approval(
    state: web::Data<AppState>,
    user: SessionUser,
    path: web::Path<i32>,
    body: web::Json<ReviewApprovalRequest>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let id = path.into_inner();

    let review = state
        .reviews
        .set_approved(id, body.approved)
        .await?
        .ok_or_else(|| ApiError::NotFoundError("Review not found".to_string()))?;
    info!("Review {} approval set to {} by {}", id, review.approved, user.email);
    Ok(HttpResponse::Ok().json(review))
}

#[delete("/reviews/{id}")]
pub async fn delete_review(
    state: web::Data<AppState>,
    user: SessionUser,
    path: web::Path<i32>,
) -> Result<HttpResponse, ApiError> {
    user.require_admin()?;
    let id = path.into_inner();

    if !state.reviews.delete(id).await? {
        return Err(ApiError::NotFoundError("Review not found".to_string()));
    }
    info!("Review {} deleted by {}", id, user.email);
    Ok(HttpResponse::Ok().json(json!({ "message": "Review deleted" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::state::testing::TestApp;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use serde_json::Value;

    fn review_body(rating: i64, comment: &str) -> Value {
        json!({
            "activityId": "tour-7",
            "activityType": "tour",
            "rating": rating,
            "comment": comment
        })
    }

    #[actix_web::test]
    async fn second_review_of_the_same_item_is_rejected() {
        let app = TestApp::new();
        let guest = app.verified_user("guest@example.com", Role::User);
        let svc = test_service!(app);

        let post = |body: Value| {
            test::TestRequest::post()
                .uri("/api/reviews")
                .insert_header(app.bearer(&guest))
                .set_json(body)
                .to_request()
        };

        let resp = test::call_service(&svc, post(review_body(5, "Wonderful day"))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["approved"], true);
        assert_eq!(body["userName"], "guest");

        let resp = test::call_service(&svc, post(review_body(1, "Changed my mind"))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // same id, different kind is a different item
        let mut other_kind = review_body(4, "Also good");
        other_kind["activityType"] = json!("activity");
        assert_eq!(test::call_service(&svc, post(other_kind)).await.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn rating_and_comment_are_validated() {
        let app = TestApp::new();
        let guest = app.verified_user("guest@example.com", Role::User);
        let svc = test_service!(app);

        for body in [review_body(0, "ok"), review_body(6, "ok"), review_body(3, "   "), review_body(3, &"x".repeat(1001))] {
            let req = test::TestRequest::post()
                .uri("/api/reviews")
                .insert_header(app.bearer(&guest))
                .set_json(body)
                .to_request();
            assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::BAD_REQUEST);
        }

        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .insert_header(app.bearer(&guest))
            .set_json(review_body(3, &"x".repeat(1000)))
            .to_request();
        assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn listing_filters_and_moderation() {
        let app = TestApp::new();
        let alice = app.verified_user("alice@example.com", Role::User);
        let bob = app.verified_user("bob@example.com", Role::User);
        let admin = app.verified_user("boss@example.com", Role::Admin);
        let svc = test_service!(app);

        for user in [&alice, &bob] {
            let req = test::TestRequest::post()
                .uri("/api/reviews")
                .insert_header(app.bearer(user))
                .set_json(review_body(5, "Great"))
                .to_request();
            assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::CREATED);
        }

        let req = test::TestRequest::get().uri("/api/reviews?activityId=tour-7&activityType=tour").to_request();
        let body: Value = test::read_body_json(test::call_service(&svc, req).await).await;
        let reviews = body.as_array().unwrap();
        assert_eq!(reviews.len(), 2);
        // newest first
        assert_eq!(reviews[0]["userEmail"], "bob@example.com");
        let first_id = reviews[1]["id"].as_i64().unwrap();

        let req = test::TestRequest::patch()
            .uri(&format!("/api/reviews/{}", first_id))
            .insert_header(app.bearer(&alice))
            .set_json(json!({"approved": false}))
            .to_request();
        assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::patch()
            .uri(&format!("/api/reviews/{}", first_id))
            .insert_header(app.bearer(&admin))
            .set_json(json!({"approved": false}))
            .to_request();
        assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/reviews?approved=true").to_request();
        let body: Value = test::read_body_json(test::call_service(&svc, req).await).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let req = test::TestRequest::get().uri("/api/reviews?approved=maybe").to_request();
        assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/reviews/{}", first_id))
            .insert_header(app.bearer(&admin))
            .to_request();
        assert_eq!(test::call_service(&svc, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/reviews").to_request();
        let body: Value = test::read_body_json(test::call_service(&svc, req).await).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
