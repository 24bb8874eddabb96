use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_RELAY_HOST: &str = "localhost";
pub const DEFAULT_RELAY_PORT: u16 = 1025;
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment: '{0}' (use dev, staging, or prod)")]
    InvalidEnvironment(String),

    #[error("Missing required configuration: {0}")]
    Missing(&'static str),

    #[error("Invalid port in {key}: '{value}'")]
    InvalidPort { key: &'static str, value: String },

    #[error("Failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}

/// Deployment target selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Environment::Dev),
            "staging" => Ok(Environment::Staging),
            "prod" => Ok(Environment::Prod),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SMTP login. The password never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to connect for a single send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub use_starttls: bool,
    pub credentials: Option<Credentials>,
}

/// Local capture relay used by dev and staging (Mailpit or similar).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub host: String,
    pub port: u16,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_RELAY_HOST.to_string(),
            port: DEFAULT_RELAY_PORT,
        }
    }
}

/// Authenticated STARTTLS server used by prod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ProductionSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
        }
    }
}

enum Backend {
    Relay,
    Production,
}

fn backend_for(environment: Environment) -> Backend {
    match environment {
        Environment::Dev => Backend::Relay,
        // Staging has no settings of its own and goes through the capture relay.
        Environment::Staging => Backend::Relay,
        Environment::Prod => Backend::Production,
    }
}

/// Process configuration, read once at start-up and handed to the mailer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailConfig {
    pub mail_from: Option<String>,
    pub relay: RelaySettings,
    pub production: ProductionSettings,
}

impl MailConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let relay = RelaySettings {
            host: get("MAILPIT_HOST").unwrap_or_else(|| DEFAULT_RELAY_HOST.to_string()),
            port: parse_port("MAILPIT_PORT", get("MAILPIT_PORT"), DEFAULT_RELAY_PORT)?,
        };

        let production = ProductionSettings {
            host: get("SMTP_HOST"),
            port: parse_port("SMTP_PORT", get("SMTP_PORT"), DEFAULT_SMTP_PORT)?,
            username: get("SMTP_USER"),
            password: get("SMTP_PASS"),
        };

        Ok(Self {
            mail_from: get("MAIL_FROM"),
            relay,
            production,
        })
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn sender(&self) -> Result<&str, ConfigError> {
        self.mail_from
            .as_deref()
            .ok_or(ConfigError::Missing("MAIL_FROM"))
    }

    pub fn resolve_endpoint(&self, environment: Environment) -> Result<SmtpEndpoint, ConfigError> {
        match backend_for(environment) {
            Backend::Relay => Ok(SmtpEndpoint {
                host: self.relay.host.clone(),
                port: self.relay.port,
                use_starttls: false,
                credentials: None,
            }),
            Backend::Production => {
                let prod = &self.production;
                let host = prod.host.clone().ok_or(ConfigError::Missing("SMTP_HOST"))?;
                let username = prod.username.clone().ok_or(ConfigError::Missing("SMTP_USER"))?;
                let password = prod.password.clone().ok_or(ConfigError::Missing("SMTP_PASS"))?;

                Ok(SmtpEndpoint {
                    host,
                    port: prod.port,
                    use_starttls: true,
                    credentials: Some(Credentials::new(username, password)),
                })
            }
        }
    }
}

fn parse_port(key: &'static str, value: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidPort {
            key,
            value: raw,
        }),
    }
}

/// Load `KEY=value` pairs from an env file into the process environment.
///
/// Variables that are already set win. A missing file is not an error.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            log::debug!("Loaded environment from {}", path.display());
            Ok(())
        }
        Err(e) if e.not_found() => {
            log::debug!("No env file at {}", path.display());
            Ok(())
        }
        Err(e) => Err(ConfigError::EnvFile(e)),
    }
}
