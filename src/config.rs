use std::path::PathBuf;

use thiserror::Error;

use crate::cli::{SyncArgs, TelegramArgs};
use crate::retry::RetryConfig;
use crate::source::TelegramConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential or setting is absent. Nothing has been done yet.
    #[error("Missing {name}: {hint}")]
    Missing { name: &'static str, hint: String },

    #[error("Invalid {name}: {hint}")]
    Invalid { name: &'static str, hint: String },

    #[error("Cannot create scratch directory {path}: {source}")]
    ScratchDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Where a `sync` run reads messages from.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    Live(TelegramConfig),
    Export(PathBuf),
}

/// Settings for a `sync` run.
///
/// Google OAuth secrets stay in the token file.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub source: SourceConfig,
    pub token_file: PathBuf,
    pub scratch_dir: PathBuf,
    pub retry: RetryConfig,
    pub check_existing: bool,
    pub show_progress: bool,
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn required<'a>(
    value: Option<&'a str>,
    name: &'static str,
    hint: &str,
) -> Result<&'a str, ConfigError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Missing {
            name,
            hint: hint.to_string(),
        })
}

/// Validate the credentials of a live Telegram session.
pub fn telegram_config(args: &TelegramArgs) -> Result<TelegramConfig, ConfigError> {
    let api_id = required(
        args.api_id.as_deref(),
        "Telegram API id",
        "pass --api-id or set TELEGRAM_API_ID",
    )?;
    let api_id = api_id.parse::<i32>().map_err(|_| ConfigError::Invalid {
        name: "Telegram API id",
        hint: format!("{:?} is not a number", api_id),
    })?;
    let api_hash = required(
        args.api_hash.as_deref(),
        "Telegram API hash",
        "pass --api-hash or set TELEGRAM_API_HASH",
    )?;
    let session_file = required(
        args.session_file.as_deref(),
        "Telegram session file",
        "pass --session-file or set TELEGRAM_SESSION_FILE",
    )?;
    Ok(TelegramConfig {
        api_id,
        api_hash: api_hash.to_string(),
        session_file: expand_tilde(session_file),
    })
}

impl Config {
    /// Validate everything `sync` needs before any network or ledger work.
    pub fn for_sync(
        state_dir: &str,
        args: &SyncArgs,
        no_progress_bar: bool,
    ) -> Result<Self, ConfigError> {
        let source = match args.export_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(dir) => {
                let export_dir = expand_tilde(dir);
                if !export_dir.is_dir() {
                    return Err(ConfigError::Missing {
                        name: "Telegram export directory",
                        hint: format!("{} does not exist", export_dir.display()),
                    });
                }
                SourceConfig::Export(export_dir)
            }
            None => SourceConfig::Live(telegram_config(&args.telegram)?),
        };

        let token_file = expand_tilde(&args.token_file);
        if !token_file.is_file() {
            return Err(ConfigError::Missing {
                name: "Google token file",
                hint: format!(
                    "{} not found; pass --token-file or set GOOGLE_TOKEN_FILE",
                    token_file.display()
                ),
            });
        }

        let scratch_dir = args
            .scratch_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&scratch_dir).map_err(|e| ConfigError::ScratchDir {
            path: scratch_dir.clone(),
            source: e,
        })?;

        Ok(Self {
            state_dir: expand_tilde(state_dir),
            source,
            token_file,
            scratch_dir,
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_secs: args.retry_delay,
                ..RetryConfig::default()
            },
            check_existing: args.check_existing,
            show_progress: !no_progress_bar,
        })
    }
}
