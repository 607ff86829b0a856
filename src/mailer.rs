use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{debug, error, info, warn};
use std::sync::Arc;
use thiserror::Error;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("email is not configured")]
    NotConfigured,
    #[error("invalid address {0}")]
    Address(String),
    #[error("failed to build message: {0}")]
    Build(String),
    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|_| MailError::Address(config.from.clone()))?;

        // 465 is implicit TLS, everything else upgrades with STARTTLS
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .map_err(|e| MailError::Transport(e.to_string()))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let to = mail
            .to
            .parse::<Mailbox>()
            .map_err(|_| MailError::Address(mail.to.clone()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(mail.html.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        match self.transport.send(message).await {
            Ok(response) => {
                info!("Email '{}' sent to {} ({:?})", mail.subject, mail.to, response.code());
                Ok(())
            },
            Err(e) => {
                error!("Failed to send email '{}' to {}: {}", mail.subject, mail.to, e);
                Err(MailError::Transport(e.to_string()))
            },
        }
    }
}

/// Stand-in used when SMTP is not configured. Logs the message and reports
/// that nothing was delivered.
#[derive(Clone, Default)]
pub struct LogMailer;

impl LogMailer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        warn!("[LOG MAILER] Email not configured, would have sent '{}' to {}", mail.subject, mail.to);
        debug!("[LOG MAILER] Body: {}", mail.html);
        Err(MailError::NotConfigured)
    }
}

pub fn create_mailer(config: Option<&SmtpConfig>) -> Arc<dyn Mailer> {
    match config {
        Some(smtp) => match SmtpMailer::new(smtp) {
            Ok(mailer) => {
                info!("SMTP mailer configured for {}:{}", smtp.host, smtp.port);
                Arc::new(mailer)
            },
            Err(e) => {
                error!("Failed to create SMTP mailer: {}. Using log mailer.", e);
                Arc::new(LogMailer::new())
            },
        },
        None => {
            warn!("No SMTP configuration, emails will only be logged");
            Arc::new(LogMailer::new())
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Captures every attempted message; fails them all when `failing` is set.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutgoingMail>>,
        pub failing: AtomicBool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            let mailer = Self::default();
            mailer.failing.store(true, Ordering::SeqCst);
            mailer
        }

        pub fn attempts(&self) -> Vec<OutgoingMail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
            self.sent.lock().unwrap().push(mail.clone());
            if self.failing.load(Ordering::SeqCst) {
                return Err(MailError::Transport("connection refused".into()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(port: u16, from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".into(),
            port,
            username: "user".into(),
            password: "pass".into(),
            from: from.into(),
        }
    }

    #[tokio::test]
    async fn log_mailer_reports_nothing_delivered() {
        let mail = OutgoingMail { to: "a@b.c".into(), subject: "Hi".into(), html: "<p>x</p>".into() };
        assert!(matches!(LogMailer::new().send(&mail).await, Err(MailError::NotConfigured)));
    }

    #[tokio::test]
    async fn smtp_mailer_rejects_a_bad_sender() {
        assert!(matches!(SmtpMailer::new(&smtp(587, "not an address")), Err(MailError::Address(_))));
        assert!(SmtpMailer::new(&smtp(465, "Djerba Adventures <hello@example.com>")).is_ok());
    }
}
