//! tgdrive-rs moves videos posted in Telegram forum topics into Google Drive.
//!
//! Each registered channel (a chat/topic pair plus a Drive folder path) is
//! swept oldest-first. Every delivered item is recorded in a durable progress
//! ledger before the next one starts, so interrupted runs resume where they
//! stopped and re-runs never upload an item twice.

#![warn(clippy::all)]

mod cli;
mod config;
mod link;
pub mod retry;
mod shutdown;
mod source;
mod state;
mod storage;
mod sync;
mod types;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Command, LoginArgs, RegisterArgs, SyncArgs};
use config::{Config, SourceConfig};
use source::{DesktopExport, LiveTelegram, MessageSource};
use state::{
    ChannelRegistry, ProgressLedger, RegistryError, StateLock, LEDGER_FILE, REGISTRY_FILE,
};
use storage::DriveClient;
use sync::error::RunError;
use sync::transfer::TransferOptions;
use sync::{RunSummary, SyncOptions};

async fn run_sync(state_dir: &str, args: &SyncArgs, no_progress_bar: bool) -> anyhow::Result<()> {
    let config = Config::for_sync(state_dir, args, no_progress_bar)?;
    tracing::debug!(?config, "Loaded configuration");

    let lock = StateLock::acquire(&config.state_dir).with_context(|| {
        format!(
            "Cannot lock state directory {}",
            config.state_dir.display()
        )
    })?;
    tracing::debug!(lock = %lock.path().display(), "Holding state lock");

    let registry = ChannelRegistry::load(config.state_dir.join(REGISTRY_FILE));
    let mut ledger = ProgressLedger::load(config.state_dir.join(LEDGER_FILE));
    if registry.is_empty() {
        sync::log_summary(&RunSummary {
            nothing_to_do: true,
            ..RunSummary::default()
        });
        return Ok(());
    }

    let storage = DriveClient::from_token_file(&config.token_file, config.retry.clone())
        .await
        .with_context(|| {
            format!(
                "Google Drive authorization with {} failed",
                config.token_file.display()
            )
        })?;
    let mut source: Box<dyn MessageSource> = match &config.source {
        SourceConfig::Live(telegram) => Box::new(LiveTelegram::new(telegram.clone())),
        SourceConfig::Export(dir) => Box::new(DesktopExport::new(dir.clone())),
    };
    let shutdown_token = shutdown::install_signal_handler()?;

    let options = SyncOptions {
        transfer: TransferOptions {
            scratch_dir: config.scratch_dir.clone(),
            retry: config.retry.clone(),
            check_existing: config.check_existing,
        },
        show_progress: config.show_progress,
    };

    tracing::info!("Starting tgdrive-rs");
    let summary = match sync::run(
        &registry,
        &mut ledger,
        source.as_mut(),
        &storage,
        &options,
        &shutdown_token,
    )
    .await
    {
        Ok(summary) => summary,
        Err(RunError::AuthFailed) => match &config.source {
            SourceConfig::Live(telegram) => anyhow::bail!(
                "The Telegram session {} is not signed in. \
                 Run `tgdrive-rs login` with the same credentials and try again.",
                telegram.session_file.display()
            ),
            SourceConfig::Export(dir) => anyhow::bail!(
                "The Telegram export at {} has no chats to read. \
                 Re-export the chat history with Telegram Desktop (JSON format) and try again.",
                dir.display()
            ),
        },
        Err(e) => return Err(e.into()),
    };

    sync::log_summary(&summary);

    match summary.exit_error() {
        Some(message) => anyhow::bail!(message),
        None => Ok(()),
    }
}

fn run_register(state_dir: &str, args: &RegisterArgs) -> anyhow::Result<()> {
    let parsed = link::parse_link(&args.link)?;
    let destination = link::destination_path(&args.root_folder, &args.name)?;
    let description = link::description(&args.name, &args.link);

    let state_dir = config::expand_tilde(state_dir);
    let _lock = StateLock::acquire(&state_dir)
        .with_context(|| format!("Cannot lock state directory {}", state_dir.display()))?;
    let mut registry = ChannelRegistry::load(state_dir.join(REGISTRY_FILE));

    let channel =
        match registry.register(parsed.chat_id, parsed.topic_id, &destination, &description) {
            Ok(channel) => channel,
            Err(RegistryError::DuplicateChannel {
                destination_path, ..
            }) => anyhow::bail!(
                "{} is already registered and uploads to \"{}\"; nothing changed",
                args.link,
                destination_path
            ),
            Err(e) => return Err(e.into()),
        };
    println!(
        "Registered {} -> {}",
        channel.key(),
        channel.destination_path
    );
    println!("Registry: {}", registry.path().display());
    Ok(())
}

fn run_status(state_dir: &str) -> anyhow::Result<()> {
    let state_dir = config::expand_tilde(state_dir);
    let registry = ChannelRegistry::load(state_dir.join(REGISTRY_FILE));
    let ledger = ProgressLedger::load(state_dir.join(LEDGER_FILE));

    println!("Registry: {}", registry.path().display());
    println!("Ledger:   {}", ledger.path().display());
    println!();

    if registry.is_empty() {
        println!("No channels registered.");
        println!("Register one with `tgdrive-rs register <link> <name>`.");
        return Ok(());
    }

    println!("Channels:");
    for channel in registry.list() {
        let key = channel.key();
        println!(
            "  {}  -> {}  ({} transferred)",
            key,
            channel.destination_path,
            ledger.transferred_count(&key)
        );
        if !channel.description.is_empty() {
            println!("      {}", channel.description);
        }
    }
    println!();
    println!("Items transferred: {}", ledger.total_items());
    if let Some(updated) = ledger.last_update() {
        println!(
            "Last update:       {}",
            updated.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn run_login(args: &LoginArgs) -> anyhow::Result<()> {
    let telegram = config::telegram_config(&args.telegram)?;
    let mut source = LiveTelegram::new(telegram.clone());
    source.connect().await?;

    if source.is_authorized().await? {
        println!("Already signed in; session {}", telegram.session_file.display());
    } else {
        let phone = match &args.phone {
            Some(phone) => phone.clone(),
            None => tokio::task::block_in_place(|| prompt("Phone number: "))?,
        };
        let signed_in = source
            .login(
                &phone,
                || tokio::task::block_in_place(|| prompt("Login code: ")),
                |hint| {
                    let label = match hint {
                        Some(hint) => format!("Two-step password (hint: {}): ", hint),
                        None => "Two-step password: ".to_string(),
                    };
                    tokio::task::block_in_place(|| rpassword::prompt_password(label))
                },
            )
            .await;
        if let Err(e) = signed_in {
            source.disconnect().await;
            return Err(e.into());
        }
        println!("Signed in; session saved to {}", telegram.session_file.display());
    }

    source.disconnect().await;
    Ok(())
}

fn prompt(label: &str) -> std::io::Result<String> {
    use std::io::Write;
    print!("{}", label);
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; flags and the environment still apply.
    dotenvy::dotenv().ok();

    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match &cli.command {
        Command::Sync(args) => run_sync(&cli.state_dir, args, cli.no_progress_bar).await,
        Command::Register(args) => run_register(&cli.state_dir, args),
        Command::Status => run_status(&cli.state_dir),
        Command::Login(args) => run_login(args).await,
    }
}
