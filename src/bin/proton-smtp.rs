#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for exercising the Proton Bridge SMTP backend

use anyhow::Context;
use clap::{Parser, Subcommand};
use proton_smtp_backend::{
    AccountDirectory, BackendConfig, BridgeUser, DeliveryError, Event, EventBus, LogPanicHandler,
    MemoryPreferences, MessageSender, OutgoingMessage, REPORT_OUTGOING_NO_ENC_KEY, SmtpBackend,
    SmtpSession,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::io::BufRead;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proton-smtp")]
#[command(about = "Log in and send mail through the Proton Bridge SMTP backend")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Account directory file (default: $SMTP_ACCOUNTS_FILE)
    #[arg(long, global = true)]
    accounts: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Authenticate and show the bound identity
    Login {
        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,
    },

    /// Authenticate and send a message (dry run, nothing leaves)
    Send {
        #[arg(long)]
        username: String,

        #[arg(long)]
        password: String,

        /// Message-ID of the outgoing message
        #[arg(long)]
        message_id: String,

        #[arg(long)]
        from: String,

        /// Recipient (repeatable)
        #[arg(long, required = true)]
        to: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        body: String,

        /// The message is not end-to-end encrypted
        #[arg(long)]
        plaintext: bool,

        /// Ask before sending unencrypted mail
        #[arg(long)]
        report_no_enc: bool,
    },
}

/// Logs the message instead of handing it to the remote API.
struct DryRunSender;

impl MessageSender for DryRunSender {
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        info!(
            "Dry run: would send {} to {}",
            message.message_id,
            message.to.join(", ")
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = BackendConfig::from_env()?;
    let accounts = match &args.accounts {
        Some(path) => path.clone(),
        None => std::env::var("SMTP_ACCOUNTS_FILE")
            .map(PathBuf::from)
            .context("--accounts not given and SMTP_ACCOUNTS_FILE not set")?,
    };
    let directory = AccountDirectory::from_file(&accounts)
        .with_context(|| format!("Failed to load accounts from {}", accounts.display()))?;

    match &args.command {
        Command::Login { username, password } => {
            let backend = build_backend(directory, config, MemoryPreferences::new(), EventBus::new());
            cmd_login(&backend, &args, username, password).await?;
        }
        Command::Send {
            username,
            password,
            message_id,
            from,
            to,
            subject,
            body,
            plaintext,
            report_no_enc,
        } => {
            let preferences =
                MemoryPreferences::new().with_bool(REPORT_OUTGOING_NO_ENC_KEY, *report_no_enc);
            let bus = EventBus::new();
            let backend = build_backend(directory, config, preferences, bus.clone());

            let mut message = to
                .iter()
                .fold(OutgoingMessage::new(message_id, from, subject, body), |m, r| {
                    m.to(r.clone())
                });
            if *plaintext {
                message = message.plaintext();
            }

            cmd_send(&backend, &bus, &args, username, password, &message).await?;
        }
    }

    Ok(())
}

fn build_backend(
    directory: AccountDirectory,
    config: BackendConfig,
    preferences: MemoryPreferences,
    bus: EventBus,
) -> Arc<SmtpBackend> {
    SmtpBackend::new(
        Arc::new(LogPanicHandler),
        Arc::new(bus),
        Arc::new(preferences),
        Arc::new(directory),
        config,
    )
}

async fn cmd_login(
    backend: &Arc<SmtpBackend>,
    args: &Args,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    let session = backend.login(username, password).await?;
    print_session(&session, args)?;
    Ok(())
}

async fn cmd_send(
    backend: &Arc<SmtpBackend>,
    bus: &EventBus,
    args: &Args,
    username: &str,
    password: &str,
    message: &OutgoingMessage,
) -> anyhow::Result<()> {
    let session = backend.login(username, password).await?;

    let prompter = tokio::spawn(prompt_decisions(
        Arc::clone(backend),
        bus.subscribe(),
        stdin_lines(),
    ));
    let outcome = session.send(message, &DryRunSender).await;
    prompter.abort();
    let outcome = outcome?;

    if args.json {
        let out = serde_json::json!({
            "message_id": message.message_id,
            "fingerprint": message.fingerprint(),
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Message: {}", message.message_id);
        println!("Outcome: {outcome:?}");
    }

    Ok(())
}

/// Feed stdin lines from a plain thread.
///
/// `tokio::io::stdin` reads on the blocking pool, and a read still
/// waiting there keeps the runtime from shutting down. This thread is
/// simply abandoned when the process exits.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Answer confirmation requests from stdin: `y` sends, anything else
/// cancels.
async fn prompt_decisions(
    backend: Arc<SmtpBackend>,
    mut events: broadcast::Receiver<Event>,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Ok(event) = events.recv().await {
        match event {
            Event::OutgoingNoEncryption {
                message_id,
                subject,
            } => {
                eprint!("Send \"{subject}\" ({message_id}) without end-to-end encryption? [y/N] ");
                let answer = lines.recv().await.unwrap_or_default();
                backend.confirm_no_encryption(&message_id, answer.trim().eq_ignore_ascii_case("y"));
            }
        }
    }
}

fn print_session(session: &SmtpSession, args: &Args) -> anyhow::Result<()> {
    if args.json {
        let out = serde_json::json!({
            "username": session.username(),
            "account": session.account().username(),
            "address_id": session.address_id(),
            "split_address": session.is_split_address(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Username:   {}", session.username());
        println!("Account:    {}", session.account().username());
        if session.is_split_address() {
            println!("Address ID: {}", session.address_id());
        } else {
            println!("Address ID: - (combined mode)");
        }
    }
    Ok(())
}
