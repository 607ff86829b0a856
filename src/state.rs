use std::sync::Arc;

use crate::auth::oauth::GoogleOAuth;
use crate::auth::{Reconciler, RetryPolicy};
use crate::catalog::CatalogClient;
use crate::config::{AppConfig, DbPool};
use crate::mailer::{create_mailer, Mailer};
use crate::notifications::Notifier;
use crate::repository::postgres::PgRepository;
use crate::repository::{BookingRepository, IdentityRepository, ReviewRepository, UserRepository};

/// Everything a handler needs, shared across workers as `web::Data<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub users: Arc<dyn UserRepository>,
    pub identities: Arc<dyn IdentityRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub reviews: Arc<dyn ReviewRepository>,
    pub reconciler: Reconciler,
    pub notifier: Notifier,
    pub catalog: Option<CatalogClient>,
    pub google: Option<GoogleOAuth>,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> Self {
        let repository = Arc::new(PgRepository::new(pool));
        let mailer = create_mailer(config.smtp.as_ref());
        Self::with_parts(
            config,
            repository.clone(),
            repository.clone(),
            repository.clone(),
            repository,
            mailer,
        )
    }

    pub fn with_parts(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        identities: Arc<dyn IdentityRepository>,
        bookings: Arc<dyn BookingRepository>,
        reviews: Arc<dyn ReviewRepository>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let reconciler = Reconciler::new(users.clone(), identities.clone(), RetryPolicy::default());
        let notifier = Notifier::new(mailer, &config);
        let catalog = config.sanity.as_ref().map(CatalogClient::new);
        let google = config.google.as_ref().map(|google| GoogleOAuth::new(google, &config));

        Self {
            config,
            users,
            identities,
            bookings,
            reviews,
            reconciler,
            notifier,
            catalog,
            google,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::auth::session::issue_session;
    use crate::mailer::testing::RecordingMailer;
    use crate::models::{AppUser, AuthMethod, Role};
    use crate::repository::memory::{new_user, MemoryStore};
    use chrono::Utc;
    use std::time::Duration;

    pub struct TestApp {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub mailer: Arc<RecordingMailer>,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_mailer(RecordingMailer::default())
        }

        pub fn with_mailer(mailer: RecordingMailer) -> Self {
            let store = Arc::new(MemoryStore::new());
            let mailer = Arc::new(mailer);
            let mut state = AppState::with_parts(
                AppConfig::for_tests(),
                store.clone(),
                store.clone(),
                store.clone(),
                store.clone(),
                mailer.clone(),
            );
            state.reconciler = Reconciler::new(
                store.clone(),
                store.clone(),
                RetryPolicy { verify_attempts: 3, verify_delay: Duration::ZERO, recheck_delay: Duration::ZERO },
            );
            Self { state, store, mailer }
        }

        pub fn verified_user(&self, email: &str, role: Role) -> AppUser {
            let mut user = new_user(email, role, AuthMethod::Password);
            user.email_verified_at = Some(Utc::now().naive_utc());
            self.store.seed_user(user)
        }

        pub fn bearer(&self, user: &AppUser) -> (&'static str, String) {
            let session = issue_session(&user.email, Some(user.id), &user.name, user.role, &self.state.config)
                .expect("issue session");
            ("Authorization", format!("Bearer {}", session.token))
        }
    }
}
