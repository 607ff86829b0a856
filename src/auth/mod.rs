pub mod oauth;
pub mod password;
pub mod reconcile;
pub mod session;

pub use reconcile::{Reconciler, RetryPolicy, SignInIdentity, SignInOutcome};
pub use session::{Claims, SessionUser};

/// Emails are keys: compared and stored trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
