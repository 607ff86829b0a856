//! In-memory store for unit tests. Knobs on [`MemoryStore`] simulate the
//! races the identity reconciliation has to tolerate.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{BookingRepository, IdentityRepository, ReviewRepository, StoreResult, UserRepository};
use crate::errors::StoreError;
use crate::models::*;

#[derive(Default)]
struct Inner {
    next_id: i32,
    users: Vec<AppUser>,
    accounts: Vec<IdentityAccount>,
    login_tokens: Vec<LoginToken>,
    bookings: Vec<Booking>,
    reviews: Vec<Review>,
}

impl Inner {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// A concurrent writer demotes the user right before each of the next N
    /// reads by id.
    pub downgrades_on_read: AtomicUsize,
    /// The next N lookups by email miss even if the record exists.
    pub hidden_email_lookups: AtomicUsize,
    /// Another request creates this user just before our insert lands.
    pub racing_insert: Mutex<Option<NewAppUser>>,
    /// Another admin moves the booking to this status just before our transition.
    pub racing_status: Mutex<Option<BookingStatus>>,
    /// Every user-table call fails.
    pub broken: AtomicBool,
    pub role_writes: AtomicUsize,
    pub profile_writes: AtomicUsize,
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> StoreResult<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(StoreError::Query("store unavailable".into()));
        }
        Ok(())
    }

    fn insert_user(inner: &mut Inner, user: NewAppUser) -> StoreResult<AppUser> {
        if inner.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate(format!("app_user.email = {}", user.email)));
        }
        let ts = now();
        let created = AppUser {
            id: inner.next_id(),
            email: user.email,
            name: user.name,
            image: user.image,
            role: user.role,
            auth_method: user.auth_method,
            provider_account_id: user.provider_account_id,
            password_hash: user.password_hash,
            email_verified_at: user.email_verified_at,
            email_verification_token: user.email_verification_token,
            email_verification_expires: user.email_verification_expires,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: ts,
            updated_at: ts,
        };
        inner.users.push(created.clone());
        Ok(created)
    }

    /// Inserts a user directly, bypassing the knobs.
    pub fn seed_user(&self, user: NewAppUser) -> AppUser {
        let mut inner = self.inner.lock().unwrap();
        Self::insert_user(&mut inner, user).expect("seed user")
    }

    pub fn with_user<R>(&self, id: i32, f: impl FnOnce(&mut AppUser) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let user = inner.users.iter_mut().find(|u| u.id == id).expect("user exists");
        f(user)
    }

    pub fn user_count(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }

    pub fn seed_account(&self, provider: IdentityProvider, provider_account_id: &str, email: &str) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id();
        inner.accounts.push(IdentityAccount {
            id,
            provider,
            provider_account_id: provider_account_id.to_string(),
            email: email.to_string(),
            created_at: now(),
        });
    }
}

pub fn new_user(email: &str, role: Role, method: AuthMethod) -> NewAppUser {
    NewAppUser {
        email: email.to_string(),
        name: email.split('@').next().unwrap_or_default().to_string(),
        image: None,
        role,
        auth_method: method,
        provider_account_id: None,
        password_hash: None,
        email_verified_at: None,
        email_verification_token: None,
        email_verification_expires: None,
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<AppUser>> {
        self.check()?;
        if take_one(&self.hidden_email_lookups) {
            return Ok(None);
        }
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<AppUser>> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let downgrade = take_one(&self.downgrades_on_read);
        let user = inner.users.iter_mut().find(|u| u.id == id);
        Ok(user.map(|u| {
            if downgrade {
                u.role = Role::User;
            }
            u.clone()
        }))
    }

    async fn create(&self, user: NewAppUser) -> StoreResult<AppUser> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(racer) = self.racing_insert.lock().unwrap().take() {
            Self::insert_user(&mut inner, racer)?;
        }
        Self::insert_user(&mut inner, user)
    }

    async fn apply_profile(&self, id: i32, patch: &ProfilePatch) -> StoreResult<()> {
        self.check()?;
        self.profile_writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            if let Some(image) = &patch.image {
                user.image = Some(image.clone());
            }
            if let Some(name) = &patch.name {
                user.name = name.clone();
            }
            if let Some(at) = patch.email_verified_at {
                user.email_verified_at = Some(at);
            }
            if let Some(account) = &patch.provider_account_id {
                user.provider_account_id = Some(account.clone());
            }
            user.updated_at = now();
        }
        Ok(())
    }

    async fn set_role(&self, id: i32, role: Role) -> StoreResult<()> {
        self.check()?;
        self.role_writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.role = role;
        }
        Ok(())
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.users.len();
        inner.users.retain(|u| u.id != id);
        Ok(inner.users.len() != before)
    }

    async fn list_admins(&self) -> StoreResult<Vec<AppUser>> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().filter(|u| u.is_admin()).cloned().collect())
    }

    async fn set_verification_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.email_verification_token = Some(token.to_string());
            user.email_verification_expires = Some(expires);
        }
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str, at: NaiveDateTime) -> StoreResult<Option<AppUser>> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let user = inner.users.iter_mut().find(|u| {
            u.email_verification_token.as_deref() == Some(token)
                && u.email_verification_expires.map_or(false, |exp| exp > at)
        });
        Ok(user.map(|u| {
            u.email_verified_at = Some(at);
            u.email_verification_token = None;
            u.email_verification_expires = None;
            u.clone()
        }))
    }

    async fn set_reset_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.reset_password_token = Some(token.to_string());
            user.reset_password_expires = Some(expires);
        }
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str, password_hash: &str, at: NaiveDateTime) -> StoreResult<Option<AppUser>> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let user = inner.users.iter_mut().find(|u| {
            u.reset_password_token.as_deref() == Some(token)
                && u.reset_password_expires.map_or(false, |exp| exp > at)
        });
        Ok(user.map(|u| {
            u.password_hash = Some(password_hash.to_string());
            u.reset_password_token = None;
            u.reset_password_expires = None;
            u.clone()
        }))
    }

    async fn count_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<i64> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.users.iter().filter(|u| is_stale(u, cutoff)).count() as i64)
    }

    async fn delete_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<usize> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.users.len();
        inner.users.retain(|u| !is_stale(u, cutoff));
        Ok(before - inner.users.len())
    }
}

fn is_stale(user: &AppUser, cutoff: NaiveDateTime) -> bool {
    user.email_verified_at.is_none()
        && user.auth_method == AuthMethod::Password
        && (user.created_at < cutoff || user.email_verification_expires.map_or(false, |e| e < cutoff))
}

#[async_trait]
impl IdentityRepository for MemoryStore {
    async fn link_account(&self, provider: IdentityProvider, provider_account_id: &str, email: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .accounts
            .iter_mut()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
        {
            existing.email = email.to_string();
            return Ok(());
        }
        let id = inner.next_id();
        inner.accounts.push(IdentityAccount {
            id,
            provider,
            provider_account_id: provider_account_id.to_string(),
            email: email.to_string(),
            created_at: now(),
        });
        Ok(())
    }

    async fn accounts_for_email(&self, email: &str) -> StoreResult<Vec<IdentityAccount>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.accounts.iter().filter(|a| a.email == email).cloned().collect())
    }

    async fn purge_shadow_accounts(&self, email: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.accounts.len();
        inner
            .accounts
            .retain(|a| a.email != email || a.provider == IdentityProvider::Google);
        Ok(before - inner.accounts.len())
    }

    async fn create_login_token(&self, token: LoginToken) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.login_tokens.iter().any(|t| t.token == token.token) {
            return Err(StoreError::Duplicate("login_token.token".into()));
        }
        inner.login_tokens.push(token);
        Ok(())
    }

    async fn consume_login_token(&self, identifier: &str, token: &str, at: NaiveDateTime) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let position = inner
            .login_tokens
            .iter()
            .position(|t| t.token == token && t.identifier == identifier && t.expires_at > at);
        Ok(match position {
            Some(i) => {
                inner.login_tokens.remove(i);
                true
            },
            None => false,
        })
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create(&self, booking: NewBooking) -> StoreResult<Booking> {
        let mut inner = self.inner.lock().unwrap();
        let ts = now();
        let created = Booking {
            id: inner.next_id(),
            user_id: booking.user_id,
            item_id: booking.item_id,
            item_name: booking.item_name,
            item_kind: booking.item_kind,
            date: booking.date,
            time: booking.time,
            participants: booking.participants,
            status: BookingStatus::Pending,
            email: booking.email,
            name: booking.name,
            phone: booking.phone,
            notes: booking.notes,
            created_at: ts,
            updated_at: ts,
        };
        inner.bookings.push(created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<Booking>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn list_all(&self) -> StoreResult<Vec<Booking>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bookings.iter().rev().cloned().collect())
    }

    async fn list_for_user(&self, user_id: i32) -> StoreResult<Vec<Booking>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.bookings.iter().rev().filter(|b| b.user_id == user_id).cloned().collect())
    }

    async fn transition(&self, id: i32, from: BookingStatus, to: BookingStatus) -> StoreResult<Option<Booking>> {
        let mut inner = self.inner.lock().unwrap();
        let racer = self.racing_status.lock().unwrap().take();
        if let (Some(status), Some(b)) = (racer, inner.bookings.iter_mut().find(|b| b.id == id)) {
            b.status = status;
        }
        Ok(inner.bookings.iter_mut().find(|b| b.id == id && b.status == from).map(|b| {
            b.status = to;
            b.updated_at = now();
            b.clone()
        }))
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.bookings.len();
        inner.bookings.retain(|b| b.id != id);
        Ok(inner.bookings.len() != before)
    }
}

#[async_trait]
impl ReviewRepository for MemoryStore {
    async fn create(&self, review: NewReview) -> StoreResult<Review> {
        let mut inner = self.inner.lock().unwrap();
        if inner.reviews.iter().any(|r| {
            r.user_id == review.user_id && r.item_id == review.item_id && r.item_kind == review.item_kind
        }) {
            return Err(StoreError::Duplicate("review (user_id, item_id, item_kind)".into()));
        }
        let ts = now();
        let created = Review {
            id: inner.next_id(),
            user_id: review.user_id,
            item_id: review.item_id,
            item_kind: review.item_kind,
            rating: review.rating,
            comment: review.comment,
            user_name: review.user_name,
            user_email: review.user_email,
            approved: review.approved,
            created_at: ts,
            updated_at: ts,
        };
        inner.reviews.push(created.clone());
        Ok(created)
    }

    async fn exists_for(&self, user_id: i32, item_id: &str, item_kind: ItemKind) -> StoreResult<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .reviews
            .iter()
            .any(|r| r.user_id == user_id && r.item_id == item_id && r.item_kind == item_kind))
    }

    async fn list(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .reviews
            .iter()
            .rev()
            .filter(|r| filter.item_id.as_ref().map_or(true, |id| &r.item_id == id))
            .filter(|r| filter.item_kind.map_or(true, |k| r.item_kind == k))
            .filter(|r| filter.approved.map_or(true, |a| r.approved == a))
            .cloned()
            .collect())
    }

    async fn set_approved(&self, id: i32, approved: bool) -> StoreResult<Option<Review>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.reviews.iter_mut().find(|r| r.id == id).map(|r| {
            r.approved = approved;
            r.clone()
        }))
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.reviews.len();
        inner.reviews.retain(|r| r.id != id);
        Ok(inner.reviews.len() != before)
    }
}
