use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use mailsend::cli::Args;
use mailsend::config::{load_env_file, MailConfig};
use mailsend::Mailer;

fn main() {
    let args = Args::parse();

    // Initialize logger
    env_logger::Builder::new()
        .filter_level(if args.debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
        .init();

    if let Err(err) = run(&args) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let request = args.to_request().context("Invalid request")?;

    let env_file = args.env_file_path();
    load_env_file(&env_file)
        .with_context(|| format!("Failed to load {}", env_file.display()))?;
    let config = MailConfig::from_env().context("Failed to read mail configuration")?;

    let mailer = Mailer::new(config);
    let report = mailer
        .send(&request)
        .with_context(|| format!("Failed to send email to {}", request.recipient))?;

    println!("Email sent successfully to {} ({})", report.recipient, report.environment);
    if !report.skipped_attachments.is_empty() {
        println!("{} attachment(s) skipped", report.skipped_attachments.len());
    }

    Ok(())
}
