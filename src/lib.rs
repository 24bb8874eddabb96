pub mod cli;
pub mod config;
pub mod email;
pub mod mailer;
pub mod smtp;

// Re-export commonly used types
pub use config::{ConfigError, Environment, MailConfig, SmtpEndpoint};
pub use email::{compose_message, ComposedMessage, EmailRequest, MailError};
pub use mailer::{Mailer, SendReport};
pub use smtp::{LettreClient, SmtpClient, SmtpSession};
