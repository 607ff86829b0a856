use actix_web::web;
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use log::{debug, error};

use super::{BookingRepository, IdentityRepository, ReviewRepository, StoreResult, UserRepository};
use crate::config::DbPool;
use crate::errors::StoreError;
use crate::models::*;
use crate::schema::{app_user, booking, identity_account, login_token, review};

#[derive(Clone)]
pub struct PgRepository {
    pool: DbPool,
}

#[derive(AsChangeset)]
#[diesel(table_name = app_user)]
struct ProfileChangeset {
    image: Option<String>,
    name: Option<String>,
    email_verified_at: Option<NaiveDateTime>,
    provider_account_id: Option<String>,
    updated_at: NaiveDateTime,
}

fn current_time() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn convert_opt<R, T>(row: Option<R>) -> StoreResult<Option<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    row.map(T::try_from).transpose()
}

impl PgRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Runs a diesel query on a pooled connection off the async executor.
    async fn run<F, T>(&self, op: &'static str, query: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let result = web::block(move || -> StoreResult<T> {
            let mut conn = pool.get()?;
            Ok(query(&mut *conn)?)
        })
        .await
        .map_err(|e| {
            error!("Database operation error in {}: {}", op, e);
            StoreError::from(e)
        })?;

        match result {
            Err(StoreError::Duplicate(msg)) => {
                debug!("Duplicate key in {}: {}", op, msg);
                Err(StoreError::Duplicate(msg))
            },
            Err(e) => {
                error!("Failed to {}: {}", op, e);
                Err(e)
            },
            ok => ok,
        }
    }
}

// Unverified password accounts past the cleanup cutoff
macro_rules! stale_unverified {
    ($cutoff:expr) => {
        app_user::table
            .filter(app_user::email_verified_at.is_null())
            .filter(app_user::auth_method.eq(AuthMethod::Password.as_str()))
            .filter(
                app_user::created_at
                    .lt($cutoff)
                    .or(app_user::email_verification_expires.lt($cutoff)),
            )
    };
}

#[async_trait]
impl UserRepository for PgRepository {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<AppUser>> {
        let email = email.to_string();
        let row = self
            .run("find user by email", move |conn| {
                app_user::table
                    .filter(app_user::email.eq(email))
                    .first::<UserRow>(conn)
                    .optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<AppUser>> {
        let row = self
            .run("find user by id", move |conn| {
                app_user::table.find(id).first::<UserRow>(conn).optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn create(&self, user: NewAppUser) -> StoreResult<AppUser> {
        let row: NewUserRow = user.into();
        let created = self
            .run("create user", move |conn| {
                diesel::insert_into(app_user::table)
                    .values(&row)
                    .get_result::<UserRow>(conn)
            })
            .await?;
        AppUser::try_from(created)
    }

    async fn apply_profile(&self, id: i32, patch: &ProfilePatch) -> StoreResult<()> {
        let changes = ProfileChangeset {
            image: patch.image.clone(),
            name: patch.name.clone(),
            email_verified_at: patch.email_verified_at,
            provider_account_id: patch.provider_account_id.clone(),
            updated_at: current_time(),
        };
        self.run("apply profile update", move |conn| {
            diesel::update(app_user::table.find(id)).set(&changes).execute(conn)
        })
        .await?;
        Ok(())
    }

    async fn set_role(&self, id: i32, role: Role) -> StoreResult<()> {
        self.run("set user role", move |conn| {
            diesel::update(app_user::table.find(id))
                .set((app_user::role.eq(role.as_str()), app_user::updated_at.eq(current_time())))
                .execute(conn)
        })
        .await?;
        Ok(())
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let deleted = self
            .run("delete user", move |conn| {
                diesel::delete(app_user::table.find(id)).execute(conn)
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn list_admins(&self) -> StoreResult<Vec<AppUser>> {
        let rows = self
            .run("list admins", move |conn| {
                app_user::table
                    .filter(app_user::role.eq(Role::Admin.as_str()))
                    .order(app_user::user_id.asc())
                    .load::<UserRow>(conn)
            })
            .await?;
        convert_all(rows)
    }

    async fn set_verification_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()> {
        let token = token.to_string();
        self.run("store verification token", move |conn| {
            diesel::update(app_user::table.find(id))
                .set((
                    app_user::email_verification_token.eq(Some(token)),
                    app_user::email_verification_expires.eq(Some(expires)),
                    app_user::updated_at.eq(current_time()),
                ))
                .execute(conn)
        })
        .await?;
        Ok(())
    }

    async fn consume_verification_token(&self, token: &str, at: NaiveDateTime) -> StoreResult<Option<AppUser>> {
        let token = token.to_string();
        let row = self
            .run("consume verification token", move |conn| {
                diesel::update(
                    app_user::table
                        .filter(app_user::email_verification_token.eq(token))
                        .filter(app_user::email_verification_expires.gt(at)),
                )
                .set((
                    app_user::email_verified_at.eq(Some(at)),
                    app_user::email_verification_token.eq(None::<String>),
                    app_user::email_verification_expires.eq(None::<NaiveDateTime>),
                    app_user::updated_at.eq(at),
                ))
                .get_result::<UserRow>(conn)
                .optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn set_reset_token(&self, id: i32, token: &str, expires: NaiveDateTime) -> StoreResult<()> {
        let token = token.to_string();
        self.run("store reset token", move |conn| {
            diesel::update(app_user::table.find(id))
                .set((
                    app_user::reset_password_token.eq(Some(token)),
                    app_user::reset_password_expires.eq(Some(expires)),
                    app_user::updated_at.eq(current_time()),
                ))
                .execute(conn)
        })
        .await?;
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str, password_hash: &str, at: NaiveDateTime) -> StoreResult<Option<AppUser>> {
        let token = token.to_string();
        let password_hash = password_hash.to_string();
        let row = self
            .run("consume reset token", move |conn| {
                diesel::update(
                    app_user::table
                        .filter(app_user::reset_password_token.eq(token))
                        .filter(app_user::reset_password_expires.gt(at)),
                )
                .set((
                    app_user::password_hash.eq(Some(password_hash)),
                    app_user::reset_password_token.eq(None::<String>),
                    app_user::reset_password_expires.eq(None::<NaiveDateTime>),
                    app_user::updated_at.eq(at),
                ))
                .get_result::<UserRow>(conn)
                .optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn count_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<i64> {
        self.run("count stale unverified accounts", move |conn| {
            stale_unverified!(cutoff).count().get_result::<i64>(conn)
        })
        .await
    }

    async fn delete_stale_unverified(&self, cutoff: NaiveDateTime) -> StoreResult<usize> {
        self.run("delete stale unverified accounts", move |conn| {
            diesel::delete(stale_unverified!(cutoff)).execute(conn)
        })
        .await
    }
}

#[async_trait]
impl IdentityRepository for PgRepository {
    async fn link_account(&self, provider: IdentityProvider, provider_account_id: &str, email: &str) -> StoreResult<()> {
        let row = NewIdentityAccountRow {
            provider: provider.as_str().to_string(),
            provider_account_id: provider_account_id.to_string(),
            email: email.to_string(),
        };
        self.run("link identity account", move |conn| {
            diesel::insert_into(identity_account::table)
                .values(&row)
                .on_conflict((identity_account::provider, identity_account::provider_account_id))
                .do_update()
                .set(identity_account::email.eq(excluded(identity_account::email)))
                .execute(conn)
        })
        .await?;
        Ok(())
    }

    async fn accounts_for_email(&self, email: &str) -> StoreResult<Vec<IdentityAccount>> {
        let email = email.to_string();
        let rows = self
            .run("list identity accounts", move |conn| {
                identity_account::table
                    .filter(identity_account::email.eq(email))
                    .load::<IdentityAccountRow>(conn)
            })
            .await?;
        convert_all(rows)
    }

    async fn purge_shadow_accounts(&self, email: &str) -> StoreResult<usize> {
        let email = email.to_string();
        self.run("purge shadow accounts", move |conn| {
            diesel::delete(
                identity_account::table
                    .filter(identity_account::email.eq(email))
                    .filter(identity_account::provider.ne(IdentityProvider::Google.as_str())),
            )
            .execute(conn)
        })
        .await
    }

    async fn create_login_token(&self, token: LoginToken) -> StoreResult<()> {
        self.run("create login token", move |conn| {
            conn.transaction(|conn| {
                diesel::delete(
                    login_token::table
                        .filter(login_token::identifier.eq(&token.identifier))
                        .filter(login_token::expires_at.le(current_time())),
                )
                .execute(conn)?;
                diesel::insert_into(login_token::table).values(&token).execute(conn)
            })
        })
        .await?;
        Ok(())
    }

    async fn consume_login_token(&self, identifier: &str, token: &str, at: NaiveDateTime) -> StoreResult<bool> {
        let identifier = identifier.to_string();
        let token = token.to_string();
        let deleted = self
            .run("consume login token", move |conn| {
                diesel::delete(
                    login_token::table
                        .filter(login_token::token.eq(token))
                        .filter(login_token::identifier.eq(identifier))
                        .filter(login_token::expires_at.gt(at)),
                )
                .execute(conn)
            })
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl BookingRepository for PgRepository {
    async fn create(&self, new_booking: NewBooking) -> StoreResult<Booking> {
        let row: NewBookingRow = new_booking.into();
        let created = self
            .run("create booking", move |conn| {
                diesel::insert_into(booking::table)
                    .values(&row)
                    .get_result::<BookingRow>(conn)
            })
            .await?;
        Booking::try_from(created)
    }

    async fn find_by_id(&self, id: i32) -> StoreResult<Option<Booking>> {
        let row = self
            .run("find booking", move |conn| {
                booking::table.find(id).first::<BookingRow>(conn).optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn list_all(&self) -> StoreResult<Vec<Booking>> {
        let rows = self
            .run("list bookings", move |conn| {
                booking::table
                    .order(booking::created_at.desc())
                    .load::<BookingRow>(conn)
            })
            .await?;
        convert_all(rows)
    }

    async fn list_for_user(&self, user_id: i32) -> StoreResult<Vec<Booking>> {
        let rows = self
            .run("list user bookings", move |conn| {
                booking::table
                    .filter(booking::user_id.eq(user_id))
                    .order(booking::created_at.desc())
                    .load::<BookingRow>(conn)
            })
            .await?;
        convert_all(rows)
    }

    async fn transition(&self, id: i32, from: BookingStatus, to: BookingStatus) -> StoreResult<Option<Booking>> {
        let row = self
            .run("update booking status", move |conn| {
                diesel::update(booking::table.find(id).filter(booking::status.eq(from.as_str())))
                    .set((booking::status.eq(to.as_str()), booking::updated_at.eq(current_time())))
                    .get_result::<BookingRow>(conn)
                    .optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let deleted = self
            .run("delete booking", move |conn| {
                diesel::delete(booking::table.find(id)).execute(conn)
            })
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ReviewRepository for PgRepository {
    async fn create(&self, new_review: NewReview) -> StoreResult<Review> {
        let row: NewReviewRow = new_review.into();
        let created = self
            .run("create review", move |conn| {
                diesel::insert_into(review::table)
                    .values(&row)
                    .get_result::<ReviewRow>(conn)
            })
            .await?;
        Review::try_from(created)
    }

    async fn exists_for(&self, user_id: i32, item_id: &str, item_kind: ItemKind) -> StoreResult<bool> {
        let item_id = item_id.to_string();
        self.run("check existing review", move |conn| {
            diesel::select(diesel::dsl::exists(
                review::table
                    .filter(review::user_id.eq(user_id))
                    .filter(review::item_id.eq(item_id))
                    .filter(review::item_kind.eq(item_kind.as_str())),
            ))
            .get_result::<bool>(conn)
        })
        .await
    }

    async fn list(&self, filter: &ReviewFilter) -> StoreResult<Vec<Review>> {
        let filter = filter.clone();
        let rows = self
            .run("list reviews", move |conn| {
                let mut query = review::table.into_boxed();
                if let Some(item_id) = filter.item_id {
                    query = query.filter(review::item_id.eq(item_id));
                }
                if let Some(kind) = filter.item_kind {
                    query = query.filter(review::item_kind.eq(kind.as_str()));
                }
                if let Some(approved) = filter.approved {
                    query = query.filter(review::approved.eq(approved));
                }
                query.order(review::created_at.desc()).load::<ReviewRow>(conn)
            })
            .await?;
        convert_all(rows)
    }

    async fn set_approved(&self, id: i32, approved: bool) -> StoreResult<Option<Review>> {
        let row = self
            .run("update review approval", move |conn| {
                diesel::update(review::table.find(id))
                    .set((review::approved.eq(approved), review::updated_at.eq(current_time())))
                    .get_result::<ReviewRow>(conn)
                    .optional()
            })
            .await?;
        convert_opt(row)
    }

    async fn delete(&self, id: i32) -> StoreResult<bool> {
        let deleted = self
            .run("delete review", move |conn| {
                diesel::delete(review::table.find(id)).execute(conn)
            })
            .await?;
        Ok(deleted > 0)
    }
}
