//! spamguard - command-line runner for setup, status and removal

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;

use spamguard::config::Settings;
use spamguard::domain::FilterAction;
use spamguard::providers::directory::HttpDirectoryClient;
use spamguard::providers::mail::{GmailCredentials, GmailProvider};
use spamguard::services::{ProgressEvent, SetKind};
use spamguard::{RemovalSession, SetupSession};

#[derive(Parser, Debug)]
#[command(
    name = "spamguard",
    version,
    about = "Filters college admissions mail out of a Gmail inbox"
)]
struct Cli {
    /// Settings file to use instead of the default location.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show what an earlier setup left in place.
    Status,
    /// Find admissions senders and provision filters for them.
    Setup(SetupCmd),
    /// Remove the filters and undo their changes.
    Remove,
    /// Store OAuth credentials for the account in the system keychain.
    Credentials(CredentialsCmd),
}

#[derive(Args, Debug)]
struct SetupCmd {
    /// What happens to blocked mail: read, archive or trash.
    #[arg(long)]
    action: FilterAction,
    /// Organization to leave alone. May be repeated.
    #[arg(long = "whitelist", value_name = "ORG")]
    whitelist: Vec<String>,
}

#[derive(Args, Debug)]
struct CredentialsCmd {
    #[arg(long)]
    client_id: String,
    #[arg(long)]
    client_secret: String,
    #[arg(long)]
    refresh_token: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    if settings.gmail.account.is_empty() {
        bail!("no Gmail account configured; set gmail.account in the settings file");
    }

    let mut gmail = GmailProvider::new(settings.gmail.account.clone())
        .with_keychain_service(settings.gmail.keychain_service.clone());

    if let Command::Credentials(cmd) = &cli.command {
        gmail.save_credentials_to_keychain(&GmailCredentials {
            refresh_token: cmd.refresh_token.clone(),
            client_id: cmd.client_id.clone(),
            client_secret: cmd.client_secret.clone(),
        })?;
        tracing::info!(account = %settings.gmail.account, "Stored credentials");
        return Ok(());
    }

    gmail
        .authenticate()
        .await
        .context("sign-in failed; store credentials with `spamguard credentials`")?;
    let mail = Arc::new(gmail);

    match cli.command {
        Command::Status => {
            let session = RemovalSession::new(mail, settings);
            match session.status().await? {
                Some(status) => {
                    println!("Label: {}", status.label.name);
                    println!("Action: {}", status.action().describe());
                    println!("Filters: {}", status.filter_count);
                    for address in &status.blocked_addresses {
                        println!("  {}", address);
                    }
                }
                None => println!("No filters are set up for this account."),
            }
        }
        Command::Setup(cmd) => {
            let directory = Arc::new(HttpDirectoryClient::new(&settings.directory.base_url)?);
            let mut session = SetupSession::new(mail, directory, settings);
            log_progress(session.progress().subscribe());

            session.start().await?;
            session.choose_action(cmd.action).await?;
            for org in &cmd.whitelist {
                session
                    .whitelist_group(org)
                    .with_context(|| format!("cannot whitelist {:?}", org))?;
            }
            for group in session.filter(SetKind::Blocked, "") {
                println!("Blocking {} ({} senders)", group.organization, group.members.len());
            }

            let report = session.provision().await?;
            println!(
                "Created {} filters for {} senders; {} existing emails updated.",
                report.filters_created, report.blocked_addresses, report.messages_modified
            );
        }
        Command::Remove => {
            let session = RemovalSession::new(mail, settings);
            log_progress(session.progress().subscribe());

            let report = session.remove().await?;
            println!(
                "Removed {} filters; {} emails restored.",
                report.filters_deleted, report.messages_restored
            );
        }
        Command::Credentials(_) => {}
    }
    Ok(())
}

fn log_progress(mut events: broadcast::Receiver<ProgressEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!("{}", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Progress events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
