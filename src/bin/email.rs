//! Sends one message through an SMTP relay and prints the session transcript.
//!
//! Reads `SMTP_HOST`, `SMTP_PORT` (25), `SMTP_TLS` (false), `SMTP_FROM`,
//! `SMTP_PASSWORD`, `SMTP_TO` (comma separated), `SMTP_SUBJECT`, `SMTP_BODY`
//! and an optional `SMTP_ATTACHMENT` file path. A `.env` file is honoured.

use std::env;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use courier::models::{Email, EmailEntity};
use courier::smtp::SmtpClient;
use courier::tracing::setup_tracing;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

fn var(key: &str) -> Result<String, Box<dyn Error>> {
    env::var(key).map_err(|_| format!("{} is not set", key).into())
}

fn build_email() -> Result<Email, Box<dyn Error>> {
    let mut email = Email::new(var("SMTP_FROM")?, env::var("SMTP_PASSWORD").unwrap_or_default())
        .subject(env::var("SMTP_SUBJECT").unwrap_or_default())
        .body(env::var("SMTP_BODY").unwrap_or_default());

    for to in var("SMTP_TO")?.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        email = email.to(to);
    }

    if let Ok(path) = env::var("SMTP_ATTACHMENT") {
        let data = std::fs::read(&path)?;
        let filename = Path::new(&path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("attachment");
        email = email.attach(EmailEntity::attachment(
            filename,
            "application/octet-stream",
            &data,
        ));
    }

    Ok(email)
}

async fn run() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let host = var("SMTP_HOST")?;
    let port: u16 = env::var("SMTP_PORT")
        .unwrap_or_else(|_| "25".to_owned())
        .parse()?;
    let use_tls = env::var("SMTP_TLS")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let email = build_email()?;
    let mut client = SmtpClient::connect(&host, port, use_tls).await?;

    let sent = client.send(&email, SEND_TIMEOUT, true).await;
    println!("{}", client.debug_info());
    sent?;

    client.quit().await?;
    info!(host = %host, "done");
    Ok(())
}

#[tokio::main]
async fn main() {
    setup_tracing();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}
