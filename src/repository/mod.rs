//! Persistence traits. The server runs on [`postgres::PgRepository`];
//! tests substitute an in-memory store.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::errors::StoreError;
use crate::models::{
    AppUser, Booking, BookingStatus, IdentityAccount, IdentityProvider, ItemKind, LoginToken,
    NewAppUser, NewBooking, NewReview, ProfilePatch, Review, ReviewFilter, Role,
};

pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `email` must already be lowercased.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<AppUser>>;
    async fn find_by_id(&self, id: i32) -> StoreResult<Option<AppUser>>;
    /// Fails with [`StoreError::Duplicate`] when the email is taken.
    async fn create(&self, user: NewAppUser) -> StoreResult<AppUser>;
    async fn apply_profile(&self, id: i32, patch: &ProfilePatch) -> StoreResult<()>;
    async fn set_role(&self, id: i32, role: Role) -> StoreResult<()>;
    async fn delete(&self, id: i32) -> StoreResult<bool>;
    async fn list_admins(&self) -> StoreResult<Vec<AppUser>>;

    async fn set_verification_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()>;
    /// Marks the owner verified and clears the token in one write. Returns
    /// `None` for unknown, already used, or expired (`expires <= now`) tokens.
    async fn consume_verification_token(&self, token: &str, now: NaiveDateTime) -> StoreResult<Option<AppUser>>;

    async fn set_reset_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()>;
    /// Same single-use contract as [`Self::consume_verification_token`].
    async fn consume_reset_token(&self, token: &str, password_hash: &str, now: NaiveDateTime) -> StoreResult<Option<AppUser>>;

    /// Unverified password accounts created before `cutoff`, or whose
    /// verification window closed before `cutoff`.
    async fn count_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<i64>;
    async fn delete_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<usize>;
}

/// Records owned by the identity layer rather than the application user table.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn link_account(&self, provider: IdentityProvider, provider_account_id: &str, email: &str) -> StoreResult<()>;
    async fn accounts_for_email(&self, email: &str) -> StoreResult<Vec<IdentityAccount>>;
    /// Removes every non-Google account recorded for `email`.
    async fn purge_shadow_accounts(&self, email: &str) -> StoreResult<usize>;

    async fn create_login_token(&self, token: LoginToken) -> StoreResult<()>;
    async fn consume_login_token(&self, identifier: &str, token: &str, now: NaiveDateTime) -> StoreResult<bool>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn create(&self, booking: NewBooking) -> StoreResult<Booking>;
    async fn find_by_id(&self, id: i32) -> StoreResult<Option<Booking>>;
    async fn list_all(&self) -> StoreResult<Vec<Booking>>;
    async fn list_for_user(&self, user_id: i32) -> StoreResult<Vec<Booking>>;
    /// Moves the booking from `from` to `to` in one conditional write.
    /// Returns `None` when the booking is missing or no longer in `from`.
    async fn transition(&self, id: i32, from: BookingStatus, to: BookingStatus) -> StoreResult<Option<Booking>>;
    async fn delete(&self, id: i32) -> StoreResult<bool>;
}

#[async_trait]
pub trait ReviewRepository: Send + Sync {
    /// Fails with [`StoreError::Duplicate`] on a second review of the same item.
    async fn create(&self, review: NewReview) -> StoreResult<Review>;
    async fn exists_for(&self, user_id: i32, item_id: &str, item_kind: ItemKind) -> StoreResult<bool>;
    async fn list(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>>;
    async fn set_approved(&self, id: i32, approved: bool) -> StoreResult<Option<Review>>;
    async fn delete(&self, id: i32) -> StoreResult<bool>;
}
