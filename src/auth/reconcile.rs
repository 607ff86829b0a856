//! Identity reconciliation.
//!
//! Every sign-in, whatever the method, is folded onto the single `app_user`
//! record for its email. Sign-in only ever writes profile fields; the role is
//! snapshotted first and, for administrators, re-read after the write and
//! restored if a concurrent writer downgraded it. The check is bounded by a
//! [`RetryPolicy`] and tolerates lost updates rather than locking.
//!
//! Reconciliation fails open: errors are logged and the sign-in continues
//! without a user record, which yields a session with role `user`.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::auth::normalize_email;
use crate::models::{AppUser, AuthMethod, IdentityProvider, NewAppUser, ProfilePatch, Role};
use crate::repository::{IdentityRepository, StoreResult, UserRepository};

/// Bounds of the verify-and-restore loop. The defaults are empirical and
/// unproven under heavy concurrency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    /// Pause before the second existence check of a first-time sign-in.
    pub recheck_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            verify_attempts: 3,
            verify_delay: Duration::from_millis(50),
            recheck_delay: Duration::from_millis(100),
        }
    }
}

/// What the authentication method vouches for.
#[derive(Debug, Clone)]
pub struct SignInIdentity {
    pub email: String,
    pub method: AuthMethod,
    pub name: Option<String>,
    pub image: Option<String>,
    pub provider_account_id: Option<String>,
    pub email_verified: bool,
}

impl SignInIdentity {
    pub fn password(email: &str) -> Self {
        Self {
            email: email.to_string(),
            method: AuthMethod::Password,
            name: None,
            image: None,
            provider_account_id: None,
            email_verified: false,
        }
    }

    pub fn email_link(email: &str) -> Self {
        Self {
            email: email.to_string(),
            method: AuthMethod::EmailLink,
            name: None,
            image: None,
            provider_account_id: None,
            email_verified: true,
        }
    }

    pub fn oauth(email: &str, account_id: &str, name: Option<String>, image: Option<String>) -> Self {
        Self {
            email: email.to_string(),
            method: AuthMethod::OAuth,
            name,
            image,
            provider_account_id: Some(account_id.to_string()),
            email_verified: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignInOutcome {
    /// `None` when reconciliation failed open.
    pub user: Option<AppUser>,
    pub created: bool,
    pub role_restores: u32,
}

impl SignInOutcome {
    pub fn role(&self) -> Role {
        self.user.as_ref().map(|u| u.role).unwrap_or(Role::User)
    }
}

#[derive(Clone)]
pub struct Reconciler {
    users: Arc<dyn UserRepository>,
    identities: Arc<dyn IdentityRepository>,
    policy: RetryPolicy,
}

fn display_name(identity: &SignInIdentity, email: &str) -> String {
    identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string())
}

/// Non-identity fields the incoming sign-in may refresh on `existing`.
fn profile_patch(existing: &AppUser, identity: &SignInIdentity) -> ProfilePatch {
    let mut patch = ProfilePatch::default();

    if let Some(image) = identity.image.as_ref().filter(|i| !i.is_empty()) {
        if existing.image.as_ref() != Some(image) {
            patch.image = Some(image.clone());
        }
    }

    if existing.name.trim().is_empty() {
        patch.name = identity.name.clone().filter(|n| !n.trim().is_empty());
    }

    if identity.email_verified && existing.email_verified_at.is_none() {
        patch.email_verified_at = Some(Utc::now().naive_utc());
    }

    if identity.method == AuthMethod::OAuth && existing.provider_account_id != identity.provider_account_id {
        patch.provider_account_id = identity.provider_account_id.clone();
    }

    patch
}

impl Reconciler {
    pub fn new(users: Arc<dyn UserRepository>, identities: Arc<dyn IdentityRepository>, policy: RetryPolicy) -> Self {
        Self { users, identities, policy }
    }

    pub async fn sign_in(&self, identity: SignInIdentity) -> SignInOutcome {
        let email = normalize_email(&identity.email);

        match self.reconcile(&email, &identity).await {
            Ok(outcome) => {
                self.sync_identity_records(&email, &identity).await;
                outcome
            },
            Err(e) => {
                error!(
                    "Identity reconciliation failed for {} ({}): {}. Continuing sign-in with role user",
                    email, identity.method, e
                );
                SignInOutcome::default()
            },
        }
    }

    async fn reconcile(&self, email: &str, identity: &SignInIdentity) -> StoreResult<SignInOutcome> {
        if let Some(existing) = self.users.find_by_email(email).await? {
            return self.update_existing(existing, identity).await;
        }

        sleep(self.policy.recheck_delay).await;
        if let Some(existing) = self.users.find_by_email(email).await? {
            warn!("{} appeared between lookups, updating instead of creating", email);
            return self.update_existing(existing, identity).await;
        }

        let new_user = NewAppUser {
            email: email.to_string(),
            name: display_name(identity, email),
            image: identity.image.clone(),
            role: Role::User,
            auth_method: identity.method,
            provider_account_id: identity.provider_account_id.clone(),
            password_hash: None,
            email_verified_at: identity.email_verified.then(|| Utc::now().naive_utc()),
            email_verification_token: None,
            email_verification_expires: None,
        };

        match self.users.create(new_user).await {
            Ok(user) => {
                info!("Created user {} (id {}) on first {} sign-in", email, user.id, identity.method);
                Ok(SignInOutcome { user: Some(user), created: true, role_restores: 0 })
            },
            Err(e) if e.is_duplicate() => {
                warn!("{} was created concurrently, falling back to update", email);
                match self.users.find_by_email(email).await? {
                    Some(existing) => self.update_existing(existing, identity).await,
                    None => Err(e),
                }
            },
            Err(e) => Err(e),
        }
    }

    async fn update_existing(&self, existing: AppUser, identity: &SignInIdentity) -> StoreResult<SignInOutcome> {
        let role_snapshot = existing.role;
        let patch = profile_patch(&existing, identity);

        if !patch.is_empty() {
            self.users.apply_profile(existing.id, &patch).await?;
            debug!("Refreshed profile of {} after {} sign-in", existing.email, identity.method);
        }

        if role_snapshot != Role::Admin {
            let user = self.users.find_by_id(existing.id).await?.unwrap_or(existing);
            return Ok(SignInOutcome { user: Some(user), created: false, role_restores: 0 });
        }

        let (user, role_restores) = self.hold_admin_role(existing).await?;
        Ok(SignInOutcome { user: Some(user), created: false, role_restores })
    }

    /// Re-reads an administrator after the profile write and restores the
    /// role while it reads back as anything else.
    async fn hold_admin_role(&self, snapshot: AppUser) -> StoreResult<(AppUser, u32)> {
        let id = snapshot.id;
        let mut restores = 0;
        let mut current = self.users.find_by_id(id).await?;

        for attempt in 1..=self.policy.verify_attempts {
            let role = match &current {
                Some(user) => user.role,
                None => {
                    warn!("User {} disappeared during sign-in", snapshot.email);
                    return Ok((snapshot, restores));
                },
            };
            if role == Role::Admin {
                break;
            }

            error!(
                "Role of {} read back as {} after sign-in, restoring admin (attempt {}/{})",
                snapshot.email, role, attempt, self.policy.verify_attempts
            );
            self.users.set_role(id, Role::Admin).await?;
            restores += 1;
            sleep(self.policy.verify_delay).await;
            current = self.users.find_by_id(id).await?;
        }

        match current {
            Some(user) => {
                if user.is_admin() {
                    if restores > 0 {
                        warn!("Admin role of {} restored after {} attempt(s)", user.email, restores);
                    }
                } else {
                    error!(
                        "Admin role of {} could not be confirmed after {} attempts",
                        user.email, self.policy.verify_attempts
                    );
                }
                Ok((user, restores))
            },
            None => Ok((snapshot, restores)),
        }
    }

    /// Keeps the identity layer's own account records in line with the sign-in.
    /// Failures here never affect the outcome.
    async fn sync_identity_records(&self, email: &str, identity: &SignInIdentity) {
        let result = match identity.method {
            AuthMethod::Password => self.identities.purge_shadow_accounts(email).await.map(|purged| {
                if purged > 0 {
                    info!("Removed {} shadow account record(s) for {}", purged, email);
                }
            }),
            AuthMethod::OAuth => match &identity.provider_account_id {
                Some(account_id) => self.identities.link_account(IdentityProvider::Google, account_id, email).await,
                None => Ok(()),
            },
            AuthMethod::EmailLink => self.identities.link_account(IdentityProvider::Email, email, email).await,
        };

        if let Err(e) = result {
            warn!("Failed to update identity records for {}: {}", email, e);
        }
    }
}
