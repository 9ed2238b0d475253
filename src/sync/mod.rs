//! Run orchestration: sweep every registered channel in order and report.
//!
//! Per-item failures stay inside their sweep and per-channel failures stay
//! inside their channel. Only an unusable messaging session aborts the run,
//! and it does so before the ledger is touched.

pub mod classify;
pub mod error;
pub mod sweep;
#[cfg(test)]
pub mod testing;
pub mod transfer;

use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::source::MessageSource;
use crate::state::{ChannelKey, ChannelRegistry, ProgressLedger};
use crate::storage::Storage;

use error::RunError;
use sweep::{ChannelSweep, SweepStats};
use transfer::TransferOptions;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub transfer: TransferOptions,
    pub show_progress: bool,
}

/// Outcome of one channel within a run.
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub key: ChannelKey,
    pub destination: String,
    pub stats: SweepStats,
    /// Set when the sweep ended early with a channel-level error.
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub channels: Vec<ChannelReport>,
    pub totals: SweepStats,
    pub interrupted: bool,
    /// The registry was empty; no session was opened.
    pub nothing_to_do: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.totals.failed > 0 || self.channels.iter().any(|c| c.error.is_some())
    }

    /// The message the process should fail with, if any.
    ///
    /// Only failed items and channels fail the run. An interrupted run or an
    /// empty registry exits cleanly.
    pub fn exit_error(&self) -> Option<String> {
        if !self.has_failures() {
            return None;
        }
        let stopped = self.channels.iter().filter(|c| c.error.is_some()).count();
        Some(format!(
            "{} item(s) failed and {} channel(s) stopped early; they will be retried on the next run",
            self.totals.failed, stopped
        ))
    }
}

/// Sweep every channel of `registry` in registration order.
///
/// The messaging session is opened here and always closed before returning,
/// whatever the outcome.
pub async fn run<M, S>(
    registry: &ChannelRegistry,
    ledger: &mut ProgressLedger,
    source: &mut M,
    storage: &S,
    options: &SyncOptions,
    shutdown: &CancellationToken,
) -> Result<RunSummary, RunError>
where
    M: MessageSource + ?Sized,
    S: Storage + ?Sized,
{
    if registry.is_empty() {
        return Ok(RunSummary {
            nothing_to_do: true,
            ..RunSummary::default()
        });
    }

    let started = Instant::now();
    if let Err(e) = source.connect().await {
        source.disconnect().await;
        return Err(RunError::Connect(e));
    }

    let result = sweep_all(registry, ledger, &*source, storage, options, shutdown).await;
    source.disconnect().await;

    result.map(|mut summary| {
        summary.elapsed = started.elapsed();
        summary
    })
}

async fn sweep_all<M, S>(
    registry: &ChannelRegistry,
    ledger: &mut ProgressLedger,
    source: &M,
    storage: &S,
    options: &SyncOptions,
    shutdown: &CancellationToken,
) -> Result<RunSummary, RunError>
where
    M: MessageSource + ?Sized,
    S: Storage + ?Sized,
{
    match source.is_authorized().await {
        Ok(true) => {}
        Ok(false) => return Err(RunError::AuthFailed),
        Err(e) => return Err(RunError::Connect(e)),
    }

    let mut summary = RunSummary::default();
    let channels = registry.list();
    tracing::info!("Syncing {} channel(s)", channels.len());

    for channel in channels {
        if shutdown.is_cancelled() {
            summary.interrupted = true;
            break;
        }

        let key = channel.key();
        let pb = create_spinner(options.show_progress, &key);
        let result = ChannelSweep::new(source, storage, &options.transfer, shutdown, &pb)
            .sweep(channel, ledger)
            .await;
        pb.finish_and_clear();

        let report = match result {
            Ok(stats) => ChannelReport {
                key,
                destination: channel.destination_path.clone(),
                stats,
                error: None,
            },
            Err(e) => {
                tracing::error!(channel = %key, "Channel skipped: {}", e);
                ChannelReport {
                    key,
                    destination: channel.destination_path.clone(),
                    stats: e.partial_stats(),
                    error: Some(e.to_string()),
                }
            }
        };
        summary.totals.absorb(&report.stats);
        let interrupted = report.stats.interrupted;
        summary.channels.push(report);
        if interrupted {
            summary.interrupted = true;
            break;
        }
    }

    Ok(summary)
}

fn create_spinner(show_progress: bool, key: &ChannelKey) -> ProgressBar {
    if !show_progress || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {prefix} {pos} attempted {msg}")
            .expect("valid template"),
    );
    pb.set_prefix(key.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn counts(stats: &SweepStats) -> String {
    let mut line = format!(
        "{} found, {} transferred, {} skipped, {} failed",
        stats.found, stats.transferred, stats.skipped, stats.failed
    );
    if stats.already_present > 0 {
        line.push_str(&format!(", {} already present", stats.already_present));
    }
    line
}

pub fn log_summary(summary: &RunSummary) {
    if summary.nothing_to_do {
        tracing::info!("No channels registered, nothing to do");
        return;
    }

    tracing::info!("── Summary ──");
    for report in &summary.channels {
        tracing::info!("  {} -> {}", report.key, report.destination);
        tracing::info!("    {}", counts(&report.stats));
        if let Some(error) = &report.error {
            tracing::info!("    stopped early: {}", error);
        }
    }
    tracing::info!("  total: {}", counts(&summary.totals));
    if summary.interrupted {
        tracing::info!("  Interrupted, remaining items will be picked up by the next run");
    }
    tracing::info!("  elapsed: {}", format_duration(summary.elapsed));
}
