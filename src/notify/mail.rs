//! Outbound mail transports.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::NotifyError;

/// A rendered message ready for delivery.
#[derive(Debug, Clone)]
pub struct Mail {
    pub to_address: String,
    pub to_name: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: Vec<u8>,
}

/// Delivers mail. Implementations must not retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError>;
}

/// SMTP transport over lettre.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, mail: &Mail) -> Result<Message, NotifyError> {
        let from: Mailbox = parse_mailbox(&self.config.from_address)?;
        let to = Mailbox::new(
            (!mail.to_name.is_empty()).then(|| mail.to_name.clone()),
            mail.to_address
                .parse()
                .map_err(|e: lettre::address::AddressError| NotifyError::Address {
                    address: mail.to_address.clone(),
                    reason: e.to_string(),
                })?,
        );

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_HTML);
        for cc in &mail.cc {
            builder = builder.cc(parse_mailbox(cc)?);
        }

        builder
            .body(mail.body.clone())
            .map_err(|e| NotifyError::Transport(format!("Failed to build email: {e}")))
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let mut builder = SmtpTransport::relay(&self.config.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {e}")))?
            .port(self.config.port);

        if !self.config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.expose_secret().to_string(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
        let message = self.build_message(mail)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| NotifyError::Transport(format!("SMTP send task failed: {e}")))?
            .map_err(|e| NotifyError::Transport(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %mail.to_address, cc = mail.cc.len(), "Notification email sent");
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), NotifyError> {
        tracing::info!(
            to = %mail.to_address,
            cc = ?mail.cc,
            subject = %mail.subject,
            "Mail transport disabled; notification not sent"
        );
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn mailer() -> SmtpMailer {
        SmtpMailer::new(SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: String::new(),
            password: SecretString::from(String::new()),
            from_address: "runner@example.com".to_string(),
        })
    }

    fn mail(cc: &[&str]) -> Mail {
        Mail {
            to_address: "alice@example.com".to_string(),
            to_name: "alice".to_string(),
            cc: cc.iter().map(|s| s.to_string()).collect(),
            subject: "task result notification #1: success".to_string(),
            body: b"<p>ok</p>".to_vec(),
        }
    }

    #[test]
    fn build_message_with_cc() {
        let message = mailer()
            .build_message(&mail(&["ops@example.com", "dev@example.com"]))
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("alice@example.com"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("Subject: task result notification #1: success"));
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn build_message_rejects_bad_cc() {
        let err = mailer().build_message(&mail(&["not an address"])).unwrap_err();
        assert!(matches!(err, NotifyError::Address { .. }));
    }

    #[tokio::test]
    async fn log_mailer_accepts_everything() {
        LogMailer.send(&mail(&[])).await.unwrap();
    }
}
