use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;
use log::{debug, warn};
use thiserror::Error;

use crate::config::{ConfigError, Environment};

pub const ATTACHMENT_CONTENT_TYPE: &str = "application/octet-stream";

/// Step of the SMTP exchange that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    StartTls,
    Login,
    Transmit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::StartTls => "STARTTLS",
            Stage::Login => "login",
            Stage::Transmit => "transmit",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to read attachment {}: {source}", .path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP {stage} failed: {reason}")]
    Transport { stage: Stage, reason: String },
}

impl MailError {
    pub fn transport(stage: Stage, reason: impl fmt::Display) -> Self {
        MailError::Transport {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// One send, as asked for on the command line.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub recipient: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
    pub attachment_paths: Vec<PathBuf>,
    pub environment: Environment,
}

impl EmailRequest {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        text_body: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            text_body: text_body.into(),
            html_body: None,
            attachment_paths: Vec::new(),
            environment,
        }
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn attach(mut self, path: impl Into<PathBuf>) -> Self {
        self.attachment_paths.push(path.into());
        self
    }

    pub fn validate(&self) -> Result<(), MailError> {
        if self.recipient.trim().is_empty() {
            return Err(MailError::MissingField("recipient"));
        }
        if self.subject.trim().is_empty() {
            return Err(MailError::MissingField("subject"));
        }
        if self.text_body.trim().is_empty() {
            return Err(MailError::MissingField("text body"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    pub filename: String,
    pub size: usize,
}

/// The `multipart/alternative` section: plain text first, then HTML if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeBody {
    text: String,
    html: Option<String>,
}

impl AlternativeBody {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }

    /// Content types of the sub-parts, in the order they are emitted.
    pub fn part_types(&self) -> Vec<&'static str> {
        let mut types = vec!["text/plain"];
        if self.html.is_some() {
            types.push("text/html");
        }
        types
    }
}

/// A fully assembled message, ready to be handed to an SMTP session.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    from: Mailbox,
    to: Mailbox,
    subject: String,
    body: AlternativeBody,
    attachments: Vec<AttachmentPart>,
    message: Message,
}

impl ComposedMessage {
    pub fn from(&self) -> &Mailbox {
        &self.from
    }

    pub fn to(&self) -> &Mailbox {
        &self.to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body(&self) -> &AlternativeBody {
        &self.body
    }

    pub fn attachments(&self) -> &[AttachmentPart] {
        &self.attachments
    }

    /// The lettre message carrying the same MIME tree.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// RFC 5322 bytes as they go over the wire after DATA.
    pub fn formatted(&self) -> Vec<u8> {
        self.message.formatted()
    }
}

/// Result of composing: the message plus any attachment paths that were skipped.
#[derive(Debug, Clone)]
pub struct Composition {
    pub message: ComposedMessage,
    pub skipped: Vec<PathBuf>,
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// `application/octet-stream; name="<file>"`, or the bare type when the name can't be quoted.
fn attachment_content_type(filename: &str) -> Result<ContentType, MailError> {
    if !filename.contains(['"', '\\']) {
        let with_name = format!("{}; name=\"{}\"", ATTACHMENT_CONTENT_TYPE, filename);
        if let Ok(content_type) = ContentType::parse(&with_name) {
            return Ok(content_type);
        }
    }
    ContentType::parse(ATTACHMENT_CONTENT_TYPE).map_err(|e| MailError::Build(e.to_string()))
}

/// Read every attachment that exists; skip (and report) the ones that don't.
fn load_attachments(paths: &[PathBuf]) -> Result<(Vec<(String, Vec<u8>)>, Vec<PathBuf>), MailError> {
    let mut loaded = Vec::new();
    let mut skipped = Vec::new();

    for path in paths {
        if !path.is_file() {
            warn!("Skipped missing attachment: {}", path.display());
            skipped.push(path.clone());
            continue;
        }

        let data = fs::read(path).map_err(|source| MailError::Attachment {
            path: path.clone(),
            source,
        })?;
        let filename = attachment_name(path);
        debug!("Attaching {} ({} bytes)", filename, data.len());

        loaded.push((filename, data));
    }

    Ok((loaded, skipped))
}

/// Build the MIME tree for `request`, sent from `from_address`.
pub fn compose_message(request: &EmailRequest, from_address: &str) -> Result<Composition, MailError> {
    request.validate()?;

    let from = parse_mailbox(from_address)?;
    let to = parse_mailbox(&request.recipient)?;

    let body = AlternativeBody {
        text: request.text_body.clone(),
        html: request.html_body.clone(),
    };
    let (loaded, skipped) = load_attachments(&request.attachment_paths)?;

    let mut alternative = MultiPart::alternative().singlepart(SinglePart::plain(body.text.clone()));
    if let Some(html) = &body.html {
        alternative = alternative.singlepart(SinglePart::html(html.clone()));
    }

    let mut mixed = MultiPart::mixed().multipart(alternative);
    let mut attachments = Vec::with_capacity(loaded.len());
    for (filename, data) in loaded {
        let content_type = attachment_content_type(&filename)?;
        attachments.push(AttachmentPart {
            filename: filename.clone(),
            size: data.len(),
        });
        mixed = mixed.singlepart(Attachment::new(filename).body(data, content_type));
    }

    let message = Message::builder()
        .from(from.clone())
        .to(to.clone())
        .subject(request.subject.clone())
        .multipart(mixed)
        .map_err(|e| MailError::Build(e.to_string()))?;

    Ok(Composition {
        message: ComposedMessage {
            from,
            to,
            subject: request.subject.clone(),
            body,
            attachments,
            message,
        },
        skipped,
    })
}
