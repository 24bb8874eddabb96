use std::path::PathBuf;

use log::{debug, info};

use crate::config::{Environment, MailConfig};
use crate::email::{compose_message, EmailRequest, MailError};
use crate::smtp::{LettreClient, ScopedSession, SmtpClient, SmtpSession};

/// What a successful send did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    pub recipient: String,
    pub environment: Environment,
    pub skipped_attachments: Vec<PathBuf>,
}

/// Sends one message per call through the configured SMTP backend.
pub struct Mailer<C: SmtpClient = LettreClient> {
    config: MailConfig,
    client: C,
}

impl Mailer<LettreClient> {
    pub fn new(config: MailConfig) -> Self {
        Self::with_client(config, LettreClient::new())
    }
}

impl<C: SmtpClient> Mailer<C> {
    pub fn with_client(config: MailConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Compose, connect, optionally upgrade and authenticate, then transmit.
    ///
    /// Nothing touches the network until the message is built and the endpoint
    /// resolved. The session is closed on every path out of this function.
    pub fn send(&self, request: &EmailRequest) -> Result<SendReport, MailError> {
        let from = self.config.sender()?;
        let composition = compose_message(request, from)?;
        let endpoint = self.config.resolve_endpoint(request.environment)?;

        let mut session = ScopedSession::new(self.client.connect(&endpoint)?);

        if endpoint.use_starttls {
            session.starttls()?;
        }
        if let Some(credentials) = &endpoint.credentials {
            session.login(credentials)?;
        }

        debug!(
            "Sending to {} via {}:{} ({} attachments)",
            request.recipient,
            endpoint.host,
            endpoint.port,
            composition.message.attachments().len()
        );
        session.send(&composition.message)?;

        info!("Delivered message to {} ({})", request.recipient, request.environment);

        Ok(SendReport {
            recipient: request.recipient.clone(),
            environment: request.environment,
            skipped_attachments: composition.skipped,
        })
    }
}
