//! The SMTP transport (§6: "the SMTP transport... contains no original
//! design"; §9 isolates it behind a plain trait, one production `lettre`
//! implementation and one scripted test fake).

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::AsyncSmtpTransport;
use lettre::{AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

/// One outgoing batched alert email, already formatted by `build_message`.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A mail sender, isolated behind a trait so `AlertManager` and its tests
/// never depend on a live SMTP relay.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError>;
}

/// Talks to a plain `host:port` SMTP relay with no TLS, matching
/// `alert.email.smtp.host` / `alert.email.smtp.port` (§6) — these are
/// intended for a local MTA (e.g. postfix on `localhost:25`), not a public
/// relay requiring authentication.
pub struct LettreTransport {
    host: String,
    port: u16,
}

impl LettreTransport {
    pub fn new(host: String, port: u16) -> LettreTransport {
        LettreTransport { host, port }
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError> {
        let email = Message::builder()
            .from(message.from.parse::<Mailbox>()?)
            .to(message.to.parse::<Mailbox>()?)
            .subject(message.subject.clone())
            .body(message.body.clone())?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
            .port(self.port)
            .build();

        mailer.send(email).await?;
        Ok(())
    }
}

/// Records every message it was asked to send instead of talking to a real
/// SMTP host; used by `AlertManager`'s own tests and available to callers
/// who want a dry-run transport of their own.
#[derive(Default)]
pub struct FakeMailTransport {
    pub sent: parking_lot::Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl MailTransport for FakeMailTransport {
    async fn send(&self, message: EmailMessage) -> Result<(), DispatchError> {
        self.sent.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_transport_records_messages() {
        let transport = FakeMailTransport::default();
        transport
            .send(EmailMessage {
                from: "a@example.com".to_string(),
                to: "b@example.com".to_string(),
                subject: "s".to_string(),
                body: "b".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(transport.sent.lock().len(), 1);
    }
}
