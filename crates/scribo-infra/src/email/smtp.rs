use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;

use scribo_core::Config;

use super::{EmailError, EmailSender};

/// SMTP-backed [`EmailSender`].
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// Build the transport from config. Fails if SMTP_HOST or SMTP_FROM is missing.
    pub fn from_config(config: &Config) -> Result<Self, EmailError> {
        let host = config
            .smtp_host()
            .ok_or_else(|| EmailError::NotConfigured("SMTP_HOST is not set".to_string()))?;
        let from_raw = config
            .smtp_from()
            .ok_or_else(|| EmailError::NotConfigured("SMTP_FROM is not set".to_string()))?;
        let from: Mailbox = from_raw.parse().map_err(|e: lettre::address::AddressError| {
            EmailError::InvalidAddress {
                address: from_raw.to_string(),
                reason: e.to_string(),
            }
        })?;
        let port = config.smtp_port();
        let credentials = match (config.smtp_user(), config.smtp_password()) {
            (Some(user), Some(password)) => {
                Some(Credentials::new(user.to_string(), password.to_string()))
            }
            _ => None,
        };

        let mailer = if config.smtp_tls() {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| EmailError::Transport(e.to_string()))?
                .port(port);
            let builder = match credentials {
                Some(c) => builder.credentials(c),
                None => builder,
            };
            tracing::info!(host = %host, port = port, "Email sender initialized (SMTP with STARTTLS)");
            builder.build()
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host).port(port);
            let builder = match credentials {
                Some(c) => builder.credentials(c),
                None => builder,
            };
            tracing::info!(host = %host, port = port, "Email sender initialized (SMTP)");
            builder.build()
        };

        Ok(Self {
            mailer: Arc::new(mailer),
            from,
        })
    }

    fn build_message(&self, to: &str, subject: &str, html: &str) -> Result<Message, EmailError> {
        let to_addr: Mailbox = to.parse().map_err(|e: lettre::address::AddressError| {
            EmailError::InvalidAddress {
                address: to.to_string(),
                reason: e.to_string(),
            }
        })?;

        Message::builder()
            .from(self.from.clone())
            .to(to_addr)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())
            .map_err(|e| EmailError::Build(e.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let email = self.build_message(to, subject, html)?;
        self.mailer
            .send(email)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        tracing::info!(to = %to, "Notification email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribo_core::config::SubmissionConfig;

    fn smtp_config() -> Config {
        Config(Box::new(SubmissionConfig {
            smtp_host: Some("localhost".to_string()),
            smtp_port: 2525,
            smtp_from: Some("Scribo <noreply@example.com>".to_string()),
            smtp_tls: false,
            ..Default::default()
        }))
    }

    #[test]
    fn from_config_requires_host() {
        let config = Config(Box::default());
        assert!(matches!(
            SmtpEmailSender::from_config(&config),
            Err(EmailError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_recipient_before_sending() {
        let sender = SmtpEmailSender::from_config(&smtp_config()).unwrap();
        let result = sender.send("not an address", "subject", "<p>hi</p>").await;
        assert!(matches!(result, Err(EmailError::InvalidAddress { .. })));
    }

    #[tokio::test]
    async fn builds_html_message() {
        let sender = SmtpEmailSender::from_config(&smtp_config()).unwrap();
        let message = sender
            .build_message("admin@example.com", "New submission", "<p>3 files</p>")
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: New submission"));
        assert!(raw.contains("text/html"));
    }
}
