use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StoreError;

// Closed string enums persisted as VARCHAR
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

string_enum!(Role {
    User => "user",
    Admin => "admin",
});

string_enum!(AuthMethod {
    Password => "password",
    OAuth => "oauth",
    EmailLink => "email-link",
});

string_enum!(IdentityProvider {
    Credentials => "credentials",
    Google => "google",
    Email => "email",
});

string_enum!(ItemKind {
    Activity => "activity",
    Tour => "tour",
    Transfer => "transfer",
});

string_enum!(BookingStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl AuthMethod {
    /// The identity-layer provider that records sign-ins of this method.
    pub fn provider(&self) -> IdentityProvider {
        match self {
            AuthMethod::Password => IdentityProvider::Credentials,
            AuthMethod::OAuth => IdentityProvider::Google,
            AuthMethod::EmailLink => IdentityProvider::Email,
        }
    }
}

impl BookingStatus {
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (Pending, Confirmed) | (Pending, Rejected) => true,
            (Cancelled, Cancelled) => false,
            (_, Cancelled) => true,
            _ => false,
        }
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse::<T>().map_err(StoreError::Corrupt)
}

// ---------------------------------------------------------------- users

#[derive(Queryable, Debug, Clone)]
pub struct UserRow {
    pub user_id: i32,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub role: String,
    pub auth_method: String,
    pub provider_account_id: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified_at: Option<NaiveDateTime>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<NaiveDateTime>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: i32,
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub role: Role,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing)]
    pub provider_account_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub email_verified_at: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub email_verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub email_verification_expires: Option<NaiveDateTime>,
    #[serde(skip_serializing)]
    pub reset_password_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_password_expires: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AppUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

impl TryFrom<UserRow> for AppUser {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(AppUser {
            id: row.user_id,
            email: row.email,
            name: row.name,
            image: row.image,
            role: parse_column(&row.role)?,
            auth_method: parse_column(&row.auth_method)?,
            provider_account_id: row.provider_account_id,
            password_hash: row.password_hash,
            email_verified_at: row.email_verified_at,
            email_verification_token: row.email_verification_token,
            email_verification_expires: row.email_verification_expires,
            reset_password_token: row.reset_password_token,
            reset_password_expires: row.reset_password_expires,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::app_user)]
pub struct NewUserRow {
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub role: String,
    pub auth_method: String,
    pub provider_account_id: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified_at: Option<NaiveDateTime>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewAppUser {
    pub email: String,
    pub name: String,
    pub image: Option<String>,
    pub role: Role,
    pub auth_method: AuthMethod,
    pub provider_account_id: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified_at: Option<NaiveDateTime>,
    pub email_verification_token: Option<String>,
    pub email_verification_expires: Option<NaiveDateTime>,
}

impl From<NewAppUser> for NewUserRow {
    fn from(user: NewAppUser) -> Self {
        NewUserRow {
            email: user.email,
            name: user.name,
            image: user.image,
            role: user.role.as_str().to_string(),
            auth_method: user.auth_method.as_str().to_string(),
            provider_account_id: user.provider_account_id,
            password_hash: user.password_hash,
            email_verified_at: user.email_verified_at,
            email_verification_token: user.email_verification_token,
            email_verification_expires: user.email_verification_expires,
        }
    }
}

/// Non-identity profile fields written during sign-in. Carries no role:
/// sign-in never writes the role column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub image: Option<String>,
    pub name: Option<String>,
    pub email_verified_at: Option<NaiveDateTime>,
    pub provider_account_id: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.image.is_none()
            && self.name.is_none()
            && self.email_verified_at.is_none()
            && self.provider_account_id.is_none()
    }
}

// ---------------------------------------------------- identity accounts

#[derive(Queryable, Debug, Clone)]
pub struct IdentityAccountRow {
    pub account_id: i32,
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityAccount {
    pub id: i32,
    pub provider: IdentityProvider,
    pub provider_account_id: String,
    pub email: String,
    pub created_at: NaiveDateTime,
}

impl TryFrom<IdentityAccountRow> for IdentityAccount {
    type Error = StoreError;

    fn try_from(row: IdentityAccountRow) -> Result<Self, Self::Error> {
        Ok(IdentityAccount {
            id: row.account_id,
            provider: parse_column(&row.provider)?,
            provider_account_id: row.provider_account_id,
            email: row.email,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::identity_account)]
pub struct NewIdentityAccountRow {
    pub provider: String,
    pub provider_account_id: String,
    pub email: String,
}

#[derive(Queryable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::login_token)]
pub struct LoginToken {
    pub token: String,
    pub identifier: String,
    pub expires_at: NaiveDateTime,
}

// ------------------------------------------------------------- bookings

#[derive(Queryable, Debug, Clone)]
pub struct BookingRow {
    pub booking_id: i32,
    pub user_id: i32,
    pub item_id: String,
    pub item_name: String,
    pub item_kind: String,
    pub booking_date: NaiveDate,
    pub booking_time: String,
    pub participants: i32,
    pub status: String,
    pub contact_email: String,
    pub contact_name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i32,
    pub user_id: i32,
    #[serde(rename = "activityId")]
    pub item_id: String,
    #[serde(rename = "activityName")]
    pub item_name: String,
    #[serde(rename = "activityType")]
    pub item_kind: ItemKind,
    pub date: NaiveDate,
    pub time: String,
    pub participants: i32,
    pub status: BookingStatus,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.booking_id,
            user_id: row.user_id,
            item_id: row.item_id,
            item_name: row.item_name,
            item_kind: parse_column(&row.item_kind)?,
            date: row.booking_date,
            time: row.booking_time,
            participants: row.participants,
            status: parse_column(&row.status)?,
            email: row.contact_email,
            name: row.contact_name,
            phone: row.phone,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: i32,
    pub item_id: String,
    pub item_name: String,
    pub item_kind: ItemKind,
    pub date: NaiveDate,
    pub time: String,
    pub participants: i32,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::booking)]
pub struct NewBookingRow {
    pub user_id: i32,
    pub item_id: String,
    pub item_name: String,
    pub item_kind: String,
    pub booking_date: NaiveDate,
    pub booking_time: String,
    pub participants: i32,
    pub status: String,
    pub contact_email: String,
    pub contact_name: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

impl From<NewBooking> for NewBookingRow {
    fn from(b: NewBooking) -> Self {
        NewBookingRow {
            user_id: b.user_id,
            item_id: b.item_id,
            item_name: b.item_name,
            item_kind: b.item_kind.as_str().to_string(),
            booking_date: b.date,
            booking_time: b.time,
            participants: b.participants,
            status: BookingStatus::Pending.as_str().to_string(),
            contact_email: b.email,
            contact_name: b.name,
            phone: b.phone,
            notes: b.notes,
        }
    }
}

// -------------------------------------------------------------- reviews

#[derive(Queryable, Debug, Clone)]
pub struct ReviewRow {
    pub review_id: i32,
    pub user_id: i32,
    pub item_id: String,
    pub item_kind: String,
    pub rating: i16,
    pub comment: String,
    pub user_name: String,
    pub user_email: String,
    pub approved: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i32,
    pub user_id: i32,
    #[serde(rename = "activityId")]
    pub item_id: String,
    #[serde(rename = "activityType")]
    pub item_kind: ItemKind,
    pub rating: i16,
    pub comment: String,
    pub user_name: String,
    pub user_email: String,
    pub approved: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<ReviewRow> for Review {
    type Error = StoreError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(Review {
            id: row.review_id,
            user_id: row.user_id,
            item_id: row.item_id,
            item_kind: parse_column(&row.item_kind)?,
            rating: row.rating,
            comment: row.comment,
            user_name: row.user_name,
            user_email: row.user_email,
            approved: row.approved,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub user_id: i32,
    pub item_id: String,
    pub item_kind: ItemKind,
    pub rating: i16,
    pub comment: String,
    pub user_name: String,
    pub user_email: String,
    pub approved: bool,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::review)]
pub struct NewReviewRow {
    pub user_id: i32,
    pub item_id: String,
    pub item_kind: String,
    pub rating: i16,
    pub comment: String,
    pub user_name: String,
    pub user_email: String,
    pub approved: bool,
}

impl From<NewReview> for NewReviewRow {
    fn from(r: NewReview) -> Self {
        NewReviewRow {
            user_id: r.user_id,
            item_id: r.item_id,
            item_kind: r.item_kind.as_str().to_string(),
            rating: r.rating,
            comment: r.comment,
            user_name: r.user_name,
            user_email: r.user_email,
            approved: r.approved,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub item_id: Option<String>,
    pub item_kind: Option<ItemKind>,
    pub approved: Option<bool>,
}

// DTOs
#[derive(Deserialize, Debug)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Deserialize, Debug)]
pub struct NewPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, Debug)]
pub struct TokenQuery {
    pub token: String,
}

#[derive(Deserialize, Debug)]
pub struct EmailLinkQuery {
    pub token: String,
    pub email: String,
}

#[derive(Deserialize, Debug)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub activity_id: Option<String>,
    pub activity_name: Option<String>,
    pub activity_type: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub participants: Option<i32>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct UpdateBookingStatusRequest {
    pub status: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateReviewRequest {
    pub activity_id: Option<String>,
    pub activity_type: Option<String>,
    pub rating: Option<i16>,
    pub comment: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQuery {
    pub activity_id: Option<String>,
    pub activity_type: Option<String>,
    pub approved: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct ReviewApprovalRequest {
    pub approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_their_column_text() {
        assert_eq!("email-link".parse::<AuthMethod>(), Ok(AuthMethod::EmailLink));
        assert_eq!(AuthMethod::OAuth.to_string(), "oauth");
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
        assert_eq!(serde_json::to_string(&ItemKind::Transfer).unwrap(), "\"transfer\"");
    }

    #[test]
    fn booking_lifecycle_transitions() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Rejected.can_transition_to(Cancelled));

        assert!(!Confirmed.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Confirmed));
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn user_row_with_unknown_role_is_corrupt() {
        let now = chrono::Utc::now().naive_utc();
        let row = UserRow {
            user_id: 1,
            email: "a@b.c".into(),
            name: "A".into(),
            image: None,
            role: "superuser".into(),
            auth_method: "password".into(),
            provider_account_id: None,
            password_hash: None,
            email_verified_at: None,
            email_verification_token: None,
            email_verification_expires: None,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(AppUser::try_from(row), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn serialized_user_hides_secrets() {
        let now = chrono::Utc::now().naive_utc();
        let user = AppUser {
            id: 7,
            email: "guest@example.com".into(),
            name: "Guest".into(),
            image: None,
            role: Role::User,
            auth_method: AuthMethod::Password,
            provider_account_id: None,
            password_hash: Some("$2b$secret".into()),
            email_verified_at: None,
            email_verification_token: Some("tok".into()),
            email_verification_expires: None,
            reset_password_token: Some("reset".into()),
            reset_password_expires: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("reset"));
        assert!(json.contains("\"authMethod\":\"password\""));
    }
}
