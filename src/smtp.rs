//! SMTP collaborator.
//!
//! The mailer talks to SMTP only through [`SmtpClient`] and [`SmtpSession`].
//! The protocol itself is lettre's; [`LettreClient`] drives its blocking
//! `SmtpConnection` one step at a time so each step can fail on its own.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use lettre::transport::smtp::authentication::{self, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use log::debug;

use crate::config::{Credentials, SmtpEndpoint};
use crate::email::{ComposedMessage, MailError, Stage};

/// Same socket timeout lettre's own transports use.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const LOGIN_MECHANISMS: &[Mechanism] = &[Mechanism::Plain, Mechanism::Login];

pub trait SmtpClient {
    type Session: SmtpSession;

    /// Open a plaintext session to `endpoint` and greet the server.
    fn connect(&self, endpoint: &SmtpEndpoint) -> Result<Self::Session, MailError>;
}

pub trait SmtpSession {
    /// Upgrade the open session to TLS.
    fn starttls(&mut self) -> Result<(), MailError>;

    fn login(&mut self, credentials: &Credentials) -> Result<(), MailError>;

    fn send(&mut self, message: &ComposedMessage) -> Result<(), MailError>;

    /// End the session. Must not fail; problems are only logged.
    fn close(&mut self);
}

impl<C: SmtpClient + ?Sized> SmtpClient for &C {
    type Session = C::Session;

    fn connect(&self, endpoint: &SmtpEndpoint) -> Result<Self::Session, MailError> {
        (**self).connect(endpoint)
    }
}

/// Owns a session and closes it when dropped, whichever way the send ends.
pub struct ScopedSession<S: SmtpSession> {
    inner: S,
}

impl<S: SmtpSession> ScopedSession<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: SmtpSession> Deref for ScopedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner
    }
}

impl<S: SmtpSession> DerefMut for ScopedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: SmtpSession> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Real SMTP over lettre.
#[derive(Debug, Clone)]
pub struct LettreClient {
    hello_name: ClientId,
    timeout: Option<Duration>,
}

impl LettreClient {
    pub fn new() -> Self {
        Self {
            hello_name: ClientId::default(),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

impl Default for LettreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpClient for LettreClient {
    type Session = LettreSession;

    fn connect(&self, endpoint: &SmtpEndpoint) -> Result<LettreSession, MailError> {
        debug!("Connecting to {}:{}", endpoint.host, endpoint.port);
        let connection = SmtpConnection::connect(
            (endpoint.host.as_str(), endpoint.port),
            self.timeout,
            &self.hello_name,
            None,
            None,
        )
        .map_err(|e| MailError::transport(Stage::Connect, e))?;

        Ok(LettreSession {
            connection,
            host: endpoint.host.clone(),
            hello_name: self.hello_name.clone(),
        })
    }
}

pub struct LettreSession {
    connection: SmtpConnection,
    host: String,
    hello_name: ClientId,
}

impl SmtpSession for LettreSession {
    fn starttls(&mut self) -> Result<(), MailError> {
        debug!("Upgrading connection to {} with STARTTLS", self.host);
        let tls_parameters = TlsParameters::new(self.host.clone())
            .map_err(|e| MailError::transport(Stage::StartTls, e))?;

        self.connection
            .starttls(&tls_parameters, &self.hello_name)
            .map_err(|e| MailError::transport(Stage::StartTls, e))
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), MailError> {
        debug!("Authenticating as {}", credentials.username);
        let credentials = authentication::Credentials::new(
            credentials.username.clone(),
            credentials.password.clone(),
        );

        self.connection
            .auth(LOGIN_MECHANISMS, &credentials)
            .map(|_| ())
            .map_err(|e| MailError::transport(Stage::Login, e))
    }

    fn send(&mut self, message: &ComposedMessage) -> Result<(), MailError> {
        let envelope = message.message().envelope();
        let body = message.formatted();
        debug!("Transmitting {} bytes", body.len());

        self.connection
            .send(envelope, &body)
            .map(|_| ())
            .map_err(|e| MailError::transport(Stage::Transmit, e))
    }

    fn close(&mut self) {
        if let Err(e) = self.connection.quit() {
            debug!("QUIT failed, dropping connection: {}", e);
            self.connection.abort();
        }
    }
}
