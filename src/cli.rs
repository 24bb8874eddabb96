use std::path::PathBuf;

use clap::Parser;

use crate::config::Environment;
use crate::email::{EmailRequest, MailError};

/// Send an email with attachments (Mailpit relay or authenticated SMTP)
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Environment: dev, staging, prod
    #[clap(long = "env", default_value = "dev")]
    pub environment: String,

    /// Recipient email address
    #[clap(long)]
    pub to: String,

    /// Email subject
    #[clap(long)]
    pub subject: String,

    /// Plain text body
    #[clap(long)]
    pub text: String,

    /// HTML body (optional)
    #[clap(long)]
    pub html: Option<String>,

    /// Paths to attachment files
    #[clap(long, num_args = 0..)]
    pub attachments: Vec<PathBuf>,

    /// File with MAIL_FROM / MAILPIT_* / SMTP_* settings
    #[clap(long, default_value = ".env")]
    pub env_file: String,

    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,
}

impl Args {
    pub fn env_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.env_file).into_owned())
    }

    /// Turn the parsed flags into a request. Unknown environments stop here.
    pub fn to_request(&self) -> Result<EmailRequest, MailError> {
        let environment: Environment = self.environment.parse()?;

        let mut request = EmailRequest::new(&self.to, &self.subject, &self.text, environment);
        request.html_body = self.html.clone();
        request.attachment_paths = self.attachments.clone();
        request.validate()?;

        Ok(request)
    }
}
