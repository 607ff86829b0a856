//! Transactional messages. Every send returns the delivery result and the
//! caller decides whether a failure matters.

use log::{info, warn};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::mailer::{MailError, Mailer, OutgoingMail};
use crate::models::{AppUser, Booking};

const BRAND: &str = "Djerba Adventures";

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    config: AppConfig,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
         <h2>{}</h2>{}<p>{}</p></div>",
        escape(title),
        body,
        BRAND
    )
}

fn booking_details(booking: &Booking) -> String {
    let mut details = format!(
        "<ul><li>Activity: {}</li><li>Date: {}</li><li>Time: {}</li><li>Participants: {}</li>",
        escape(&booking.item_name),
        booking.date.format("%d/%m/%Y"),
        escape(&booking.time),
        booking.participants
    );
    if let Some(phone) = &booking.phone {
        details.push_str(&format!("<li>Phone: {}</li>", escape(phone)));
    }
    if let Some(notes) = &booking.notes {
        details.push_str(&format!("<li>Notes: {}</li>", escape(notes)));
    }
    details.push_str("</ul>");
    details
}

fn link(href: &str, label: &str) -> String {
    format!("<p><a href=\"{}\">{}</a></p>", escape(href), escape(label))
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, config: &AppConfig) -> Self {
        Self {
            mailer,
            config: config.clone(),
        }
    }

    async fn deliver(&self, to: &str, subject: String, html: String) -> Result<(), MailError> {
        let mail = OutgoingMail { to: to.to_string(), subject, html };
        self.mailer.send(&mail).await
    }

    pub async fn booking_confirmed(&self, booking: &Booking) -> Result<(), MailError> {
        let body = format!(
            "<p>Hello {},</p><p>Your booking for <strong>{}</strong> is confirmed.</p>{}",
            escape(&booking.name),
            escape(&booking.item_name),
            booking_details(booking)
        );
        self.deliver(
            &booking.email,
            format!("Booking confirmed - {}", booking.item_name),
            layout("Your booking is confirmed", &body),
        )
        .await
    }

    pub async fn booking_rejected(&self, booking: &Booking) -> Result<(), MailError> {
        let body = format!(
            "<p>Hello {},</p><p>We are sorry, your booking request for <strong>{}</strong> could not be accepted.</p>{}",
            escape(&booking.name),
            escape(&booking.item_name),
            booking_details(booking)
        );
        self.deliver(
            &booking.email,
            format!("Booking declined - {}", booking.item_name),
            layout("Your booking could not be accepted", &body),
        )
        .await
    }

    /// Tells every administrator about a new booking. Returns how many
    /// messages were delivered.
    pub async fn booking_received(&self, booking: &Booking, admins: &[AppUser]) -> usize {
        if admins.is_empty() {
            warn!("No administrator to notify about booking {}", booking.id);
            return 0;
        }

        let body = format!(
            "<p>A new booking request needs your attention.</p><p>Customer: {} ({})</p>{}{}",
            escape(&booking.name),
            escape(&booking.email),
            booking_details(booking),
            link(&self.config.public_url("/admin/dashboard"), "Open the dashboard")
        );
        let html = layout("New booking received", &body);
        let subject = format!("New booking - {}", booking.item_name);

        let mut delivered = 0;
        for admin in admins {
            match self.deliver(&admin.email, subject.clone(), html.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Failed to notify admin {} about booking {}: {}", admin.email, booking.id, e),
            }
        }
        info!("Booking {} announced to {}/{} administrators", booking.id, delivered, admins.len());
        delivered
    }

    pub async fn verify_email(&self, to: &str, name: &str, token: &str) -> Result<(), MailError> {
        let href = self.config.public_url(&format!("/auth/verify-email?token={}", token));
        let body = format!(
            "<p>Hello {},</p><p>Confirm your email address to activate your account. The link is valid for 24 hours.</p>{}",
            escape(name),
            link(&href, "Verify my email")
        );
        self.deliver(to, "Verify your email".to_string(), layout("Welcome", &body)).await
    }

    pub async fn reset_password(&self, to: &str, token: &str) -> Result<(), MailError> {
        let href = self.config.public_url(&format!("/auth/reset-password?token={}", token));
        let body = format!(
            "<p>A password reset was requested for this address. The link is valid for 1 hour.</p>{}\
             <p>If you did not ask for it, ignore this email.</p>",
            link(&href, "Choose a new password")
        );
        self.deliver(to, "Reset your password".to_string(), layout("Password reset", &body)).await
    }

    pub async fn sign_in_link(&self, to: &str, href: &str) -> Result<(), MailError> {
        let body = format!(
            "<p>Use the link below to sign in. It can be used once.</p>{}",
            link(href, "Sign in")
        );
        self.deliver(to, format!("Sign in to {}", BRAND), layout("Sign in", &body)).await
    }
}
