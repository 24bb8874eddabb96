//! Send flow tests against a recording SMTP collaborator.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use mailsend::cli::Args;
use mailsend::config::{ConfigError, Credentials, Environment, MailConfig, SmtpEndpoint};
use mailsend::email::{ComposedMessage, EmailRequest, MailError, Stage};
use mailsend::{Mailer, SmtpClient, SmtpSession};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Connect { host: String, port: u16 },
    StartTls,
    Login { username: String },
    Send { to: String, subject: String, attachments: Vec<String> },
    Close,
}

#[derive(Default)]
struct RecordingClient {
    calls: Rc<RefCell<Vec<Call>>>,
    fail_at: Option<Stage>,
}

impl RecordingClient {
    fn failing_at(stage: Stage) -> Self {
        Self {
            fail_at: Some(stage),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

struct RecordingSession {
    calls: Rc<RefCell<Vec<Call>>>,
    fail_at: Option<Stage>,
}

impl RecordingSession {
    fn step(&self, stage: Stage, call: Call) -> Result<(), MailError> {
        self.calls.borrow_mut().push(call);
        if self.fail_at == Some(stage) {
            return Err(MailError::transport(stage, "injected failure"));
        }
        Ok(())
    }
}

impl SmtpClient for RecordingClient {
    type Session = RecordingSession;

    fn connect(&self, endpoint: &SmtpEndpoint) -> Result<RecordingSession, MailError> {
        self.calls.borrow_mut().push(Call::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
        });
        if self.fail_at == Some(Stage::Connect) {
            return Err(MailError::transport(Stage::Connect, "connection refused"));
        }
        Ok(RecordingSession {
            calls: self.calls.clone(),
            fail_at: self.fail_at,
        })
    }
}

impl SmtpSession for RecordingSession {
    fn starttls(&mut self) -> Result<(), MailError> {
        self.step(Stage::StartTls, Call::StartTls)
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), MailError> {
        self.step(
            Stage::Login,
            Call::Login {
                username: credentials.username.clone(),
            },
        )
    }

    fn send(&mut self, message: &ComposedMessage) -> Result<(), MailError> {
        self.step(
            Stage::Transmit,
            Call::Send {
                to: message.to().email.to_string(),
                subject: message.subject().to_string(),
                attachments: message
                    .attachments()
                    .iter()
                    .map(|a| a.filename.clone())
                    .collect(),
            },
        )
    }

    fn close(&mut self) {
        self.calls.borrow_mut().push(Call::Close);
    }
}

fn config(pairs: &[(&str, &str)]) -> MailConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert("MAIL_FROM".to_string(), "noreply@example.com".to_string());
    for (k, v) in pairs {
        vars.insert(k.to_string(), v.to_string());
    }
    MailConfig::from_map(&vars).unwrap()
}

fn prod_config() -> MailConfig {
    config(&[
        ("SMTP_HOST", "smtp.example.com"),
        ("SMTP_PORT", "2587"),
        ("SMTP_USER", "mailer"),
        ("SMTP_PASS", "secret"),
    ])
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mailsend-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_dev_send_skips_tls_and_login() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(config(&[]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Dev);

    let report = mailer.send(&request).unwrap();

    assert_eq!(report.recipient, "x@example.com");
    assert_eq!(report.environment, Environment::Dev);
    assert!(report.skipped_attachments.is_empty());
    assert_eq!(
        client.calls(),
        vec![
            Call::Connect { host: "localhost".to_string(), port: 1025 },
            Call::Send {
                to: "x@example.com".to_string(),
                subject: "S".to_string(),
                attachments: vec![],
            },
            Call::Close,
        ]
    );
}

#[test]
fn test_staging_uses_relay_without_tls() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(config(&[("MAILPIT_HOST", "mailpit")]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Staging);

    mailer.send(&request).unwrap();

    let calls = client.calls();
    assert_eq!(calls[0], Call::Connect { host: "mailpit".to_string(), port: 1025 });
    assert!(!calls.contains(&Call::StartTls));
    assert!(!calls.iter().any(|c| matches!(c, Call::Login { .. })));
}

#[test]
fn test_prod_upgrades_and_logs_in_before_sending() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(prod_config(), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Prod);

    mailer.send(&request).unwrap();

    assert_eq!(
        client.calls(),
        vec![
            Call::Connect { host: "smtp.example.com".to_string(), port: 2587 },
            Call::StartTls,
            Call::Login { username: "mailer".to_string() },
            Call::Send {
                to: "x@example.com".to_string(),
                subject: "S".to_string(),
                attachments: vec![],
            },
            Call::Close,
        ]
    );
}

#[test]
fn test_invalid_environment_never_connects() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(config(&[]), &client);

    let args = Args::try_parse_from([
        "mailsend", "--env", "qa", "--to", "x@example.com", "--subject", "S", "--text", "B",
    ])
    .unwrap();
    let result = args.to_request().and_then(|request| mailer.send(&request));

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        MailError::Config(ConfigError::InvalidEnvironment(ref tag)) if tag == "qa"
    ));
    assert!(client.calls().is_empty());
}

#[test]
fn test_prod_misconfiguration_never_connects() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(config(&[("SMTP_USER", "u"), ("SMTP_PASS", "p")]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Prod);

    let err = mailer.send(&request).unwrap_err();

    assert!(matches!(err, MailError::Config(ConfigError::Missing("SMTP_HOST"))));
    assert!(client.calls().is_empty());
}

#[test]
fn test_missing_sender_never_connects() {
    let client = RecordingClient::default();
    let mailer = Mailer::with_client(MailConfig::default(), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Dev);

    let err = mailer.send(&request).unwrap_err();

    assert!(matches!(err, MailError::Config(ConfigError::Missing("MAIL_FROM"))));
    assert!(client.calls().is_empty());
}

#[test]
fn test_session_closed_after_login_failure() {
    let client = RecordingClient::failing_at(Stage::Login);
    let mailer = Mailer::with_client(prod_config(), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Prod);

    let err = mailer.send(&request).unwrap_err();

    assert!(matches!(err, MailError::Transport { stage: Stage::Login, .. }));
    let calls = client.calls();
    assert_eq!(calls.last(), Some(&Call::Close));
    assert!(!calls.iter().any(|c| matches!(c, Call::Send { .. })));
}

#[test]
fn test_session_closed_after_transmit_failure() {
    let client = RecordingClient::failing_at(Stage::Transmit);
    let mailer = Mailer::with_client(config(&[]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Dev);

    let err = mailer.send(&request).unwrap_err();

    assert!(matches!(err, MailError::Transport { stage: Stage::Transmit, .. }));
    assert_eq!(client.calls().last(), Some(&Call::Close));
}

#[test]
fn test_connect_failure_is_reported() {
    let client = RecordingClient::failing_at(Stage::Connect);
    let mailer = Mailer::with_client(config(&[]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Dev);

    let err = mailer.send(&request).unwrap_err();

    assert!(err.to_string().contains("connection refused"));
    // No session was opened, so there is nothing to close
    assert_eq!(client.calls().len(), 1);
}

#[test]
fn test_missing_attachment_reported_not_fatal() {
    let dir = scratch_dir("report");
    let present = dir.join("a.pdf");
    let missing = dir.join("missing.pdf");
    fs::write(&present, b"pdf bytes").unwrap();

    let client = RecordingClient::default();
    let mailer = Mailer::with_client(config(&[]), &client);
    let request = EmailRequest::new("x@example.com", "S", "B", Environment::Dev)
        .attach(&present)
        .attach(&missing);

    let report = mailer.send(&request).unwrap();

    assert_eq!(report.skipped_attachments, vec![missing]);
    assert!(client.calls().contains(&Call::Send {
        to: "x@example.com".to_string(),
        subject: "S".to_string(),
        attachments: vec!["a.pdf".to_string()],
    }));
}
