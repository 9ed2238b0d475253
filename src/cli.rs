use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "tgdrive-rs",
    version,
    about = "Move videos from Telegram forum topics into Google Drive folders"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the channel registry, progress ledger and lock file
    #[arg(long, global = true, env = "TGDRIVE_STATE_DIR", default_value = "~/.tgdrive-rs")]
    pub state_dir: String,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Transfer every new video of every registered channel
    Sync(SyncArgs),

    /// Register a topic from a shareable link under a friendly folder name
    Register(RegisterArgs),

    /// Show registered channels and ledger counts
    Status,

    /// Sign in to Telegram and save the session file used by `sync`
    Login(LoginArgs),
}

/// Credentials of the Telegram user session.
#[derive(Args, Debug, Default)]
pub struct TelegramArgs {
    /// Telegram API id from my.telegram.org
    #[arg(long, env = "TELEGRAM_API_ID")]
    pub api_id: Option<String>,

    /// Telegram API hash from my.telegram.org
    #[arg(long, env = "TELEGRAM_API_HASH", hide_env_values = true)]
    pub api_hash: Option<String>,

    /// Session file written by `login`
    #[arg(long, env = "TELEGRAM_SESSION_FILE")]
    pub session_file: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub telegram: TelegramArgs,

    /// Read a Telegram Desktop export (holds result.json) instead of a live session
    #[arg(long, env = "TGDRIVE_EXPORT_DIR")]
    pub export_dir: Option<String>,

    /// Google authorized-user token file (client_id, client_secret, refresh_token)
    #[arg(long, env = "GOOGLE_TOKEN_FILE", default_value = "token.json")]
    pub token_file: String,

    /// Directory for scratch files (default: system temp dir)
    #[arg(long, env = "TGDRIVE_SCRATCH_DIR")]
    pub scratch_dir: Option<String>,

    /// Max retries per fetch or upload (0 = no retries)
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Record items already present in the destination folder instead of re-uploading them
    #[arg(long)]
    pub check_existing: bool,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Topic link, e.g. https://t.me/c/1234567890/4
    pub link: String,

    /// Friendly folder name under the root folder
    pub name: String,

    /// Root folder in Google Drive
    #[arg(long, env = "TGDRIVE_ROOT_FOLDER", default_value = "Telegram")]
    pub root_folder: String,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[command(flatten)]
    pub telegram: TelegramArgs,

    /// Phone number of the account, in international format (prompted if omitted)
    #[arg(long, env = "TELEGRAM_PHONE")]
    pub phone: Option<String>,
}
