use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use canvas_sync::delivery::memory::MemoryServer;
use canvas_sync::delivery::{Connector, WsConnector};
use canvas_sync::{replay, CanvasState, DeliveryClient, DeliveryConfig, MergeReport, Patch, ReplicaConfig, TieBreakPolicy};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "canvas-live", version, about = "Offline replay and delivery of canvas patches")]
pub struct Cli {
    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Merge patch files onto a state file and print the solved resolved view.
    Replay {
        /// Starting state (patch-shaped JSON). Empty when omitted.
        #[arg(long, value_name = "FILE")]
        state: Option<PathBuf>,
        /// Equal-timestamp resolution.
        #[arg(long, value_enum, default_value_t = TieBreak::LexicographicMin)]
        tie_break: TieBreak,
        /// Print merge counters and solver stats alongside the state.
        #[arg(long)]
        summary: bool,
        #[arg(value_name = "PATCH")]
        patches: Vec<PathBuf>,
    },
    /// Deliver one patch file and print the receipt.
    Send {
        #[arg(long)]
        session: String,
        #[arg(long)]
        token: Option<String>,
        /// Delivery config (JSON); `CANVAS_SYNC_*` variables override it.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Deliver to an in-process server that acknowledges everything.
        #[arg(long)]
        dry_run: bool,
        #[arg(value_name = "PATCH")]
        patch: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TieBreak {
    PreferExisting,
    PreferIncoming,
    LexicographicMin,
}

impl From<TieBreak> for TieBreakPolicy {
    fn from(t: TieBreak) -> Self {
        match t {
            TieBreak::PreferExisting => TieBreakPolicy::PreferExisting,
            TieBreak::PreferIncoming => TieBreakPolicy::PreferIncoming,
            TieBreak::LexicographicMin => TieBreakPolicy::LexicographicMin,
        }
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{}: invalid JSON: {source}", path.display())]
    Json { path: PathBuf, source: serde_json::Error },
    #[error("writing output: {0}")]
    Output(#[from] std::io::Error),
    #[error(transparent)]
    Sync(#[from] canvas_sync::Error),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplaySummary<'a> {
    state: &'a CanvasState,
    report: &'a MergeReport,
    iterations: usize,
    converged: bool,
}

pub async fn run(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    match cli.command {
        Command::Replay { state, tie_break, summary, patches } => {
            let start = match state {
                Some(path) => read_json::<CanvasState>(&path)?,
                None => CanvasState::new(),
            };
            let patches = patches.iter().map(|p| read_json::<Patch>(p)).collect::<Result<Vec<_>, _>>()?;
            let cfg = ReplicaConfig { tie_break: tie_break.into(), ..Default::default() };

            let merged = replay(&start, &patches, &cfg);
            info!(
                patches = patches.len(),
                changes = merged.report.total_changes(),
                iterations = merged.solution.iterations,
                converged = merged.solution.converged,
                "replayed"
            );
            let solved = merged.solved_state();
            if summary {
                let summary = ReplaySummary {
                    state: &solved,
                    report: &merged.report,
                    iterations: merged.solution.iterations,
                    converged: merged.solution.converged,
                };
                serde_json::to_writer_pretty(&mut *out, &summary).map_err(canvas_sync::Error::from)?;
            } else {
                serde_json::to_writer_pretty(&mut *out, &solved).map_err(canvas_sync::Error::from)?;
            }
            writeln!(out)?;
        }
        Command::Send { session, token, config, dry_run, patch } => {
            let cfg = match config {
                Some(path) => DeliveryConfig::load(&path)?,
                None => DeliveryConfig::default(),
            }
            .with_env()?;
            let patch = read_json::<Patch>(&patch)?;

            let connector: Arc<dyn Connector> = if dry_run {
                Arc::new(MemoryServer::new().connector(cfg.channel_capacity))
            } else {
                Arc::new(WsConnector::new(&cfg))
            };
            let client = DeliveryClient::new(cfg, connector);
            let receipt = client.send(Some(&session), &patch, token.as_deref()).await;
            client.close().await;

            serde_json::to_writer_pretty(&mut *out, &receipt?).map_err(canvas_sync::Error::from)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_replay_arguments() {
        let cli = Cli::parse_from(["canvas-live", "-vv", "replay", "--state", "s.json", "a.json", "b.json"]);
        assert_eq!(cli.verbose, 2);
        let Command::Replay { state, tie_break, patches, summary } = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(state, Some(PathBuf::from("s.json")));
        assert_eq!(tie_break, TieBreak::LexicographicMin);
        assert_eq!(patches.len(), 2);
        assert!(!summary);
    }

    #[test]
    fn send_requires_session() {
        assert!(Cli::try_parse_from(["canvas-live", "send", "p.json"]).is_err());
        let cli = Cli::try_parse_from(["canvas-live", "send", "--session", "s1", "--token", "t", "p.json"]).unwrap();
        assert!(matches!(cli.command, Command::Send { ref session, .. } if session == "s1"));
    }
}
