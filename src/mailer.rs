//! Outgoing mail transport seam.

use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex};

use lettre::{
    transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport, Message,
    Tokio1Executor,
};

use crate::config::SmtpSettings;

/// Delivery backend: a real SMTP connection in production, or an
/// in-memory outbox that tests can inspect.
#[derive(Clone)]
pub enum Mailer {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    Mock(Arc<Mutex<Vec<Message>>>),
}

impl Debug for Mailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smtp(_) => f.write_str("Mailer::Smtp"),
            Self::Mock(outbox) => {
                write!(f, "Mailer::Mock({} queued)", outbox.lock().unwrap().len())
            }
        }
    }
}

impl Mailer {
    /// An outbox-backed mailer that accepts everything.
    pub fn mock() -> Self {
        Self::Mock(Arc::default())
    }

    /// Build the production transport: STARTTLS relay when TLS is
    /// configured, a plain connection otherwise.
    pub fn smtp(settings: &SmtpSettings) -> Result<Self, lettre::transport::smtp::Error> {
        let mut builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
                .port(settings.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
        };

        builder = builder.credentials(Credentials::new(
            settings.user.clone(),
            settings.password.clone(),
        ));

        Ok(Self::Smtp(builder.build()))
    }

    /// Send one message; the mock variant just records it.
    pub async fn send(&self, message: Message) -> Result<(), lettre::transport::smtp::Error> {
        match self {
            Self::Smtp(transport) => transport.send(message).await.map(|_| ()),
            Self::Mock(outbox) => {
                outbox.lock().unwrap().push(message);
                Ok(())
            }
        }
    }

    /// Everything the mock has accepted so far; `None` on the real
    /// transport.
    pub fn messages(&self) -> Option<Vec<Message>> {
        match self {
            Self::Mock(outbox) => Some(outbox.lock().unwrap().clone()),
            Self::Smtp(_) => None,
        }
    }

    pub fn clear_messages(&self) {
        if let Self::Mock(outbox) = self {
            outbox.lock().unwrap().clear();
        }
    }
}
