//! Deterministic replay CLI.
//!
//! # Usage
//!
//! ```bash
//! hourbot-replay --db runtime.sqlite execute-hour \
//!   --run-id 6f0f8cfa-... --account-id 1 --run-mode LIVE \
//!   --hour-ts-utc 2026-01-01T04:00:00Z
//! ```
//!
//! # Exit Codes
//!
//! - 0: success / parity
//! - 2: replay mismatch or parity failure
//! - 1: configuration, substrate, or runtime error

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use hourbot_backend::canonical::{hour_floor, is_hour_aligned, parse_timestamp};
use hourbot_backend::domain::RunMode;
use hourbot_backend::engine::{execute_hour, replay_hour};
use hourbot_backend::harness::{replay_manifest_parity, replay_manifest_window_parity};
use hourbot_backend::store::SqliteStore;

#[derive(Parser)]
#[command(name = "hourbot-replay", about = "Deterministic runtime replay CLI")]
struct Cli {
    /// Path to the SQLite substrate.
    #[arg(long, env = "HOURBOT_DB")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute deterministic runtime writes for one hour.
    ExecuteHour {
        #[arg(long)]
        run_id: Uuid,
        #[arg(long)]
        account_id: i64,
        #[arg(long, value_parser = parse_run_mode)]
        run_mode: RunMode,
        #[arg(long, value_parser = parse_hour)]
        hour_ts_utc: DateTime<Utc>,
    },
    /// Replay one hour and compare recomputed rows against stored rows.
    ReplayHour {
        #[arg(long)]
        run_id: Uuid,
        #[arg(long)]
        account_id: i64,
        #[arg(long, value_parser = parse_hour)]
        hour_ts_utc: DateTime<Utc>,
    },
    /// Replay-harness parity check against the stored manifest.
    ReplayManifest {
        #[arg(long)]
        run_id: Uuid,
        #[arg(long)]
        account_id: i64,
        #[arg(long, value_parser = parse_hour)]
        hour_ts_utc: DateTime<Utc>,
    },
    /// Parity checks over an account/mode window of hours.
    ReplayWindow {
        #[arg(long)]
        account_id: i64,
        #[arg(long, value_parser = parse_run_mode)]
        run_mode: RunMode,
        #[arg(long, value_parser = parse_hour)]
        start: DateTime<Utc>,
        #[arg(long, value_parser = parse_hour)]
        end: DateTime<Utc>,
        #[arg(long)]
        max_targets: Option<usize>,
    },
}

fn parse_run_mode(value: &str) -> Result<RunMode, String> {
    RunMode::from_str(value).map_err(|err| err.to_string())
}

/// RFC-3339 with offset, normalized to UTC and required to be
/// hour-aligned.
fn parse_hour(value: &str) -> Result<DateTime<Utc>, String> {
    let ts = parse_timestamp(value).map_err(|err| err.to_string())?;
    if !is_hour_aligned(ts) {
        return Err(format!(
            "timestamp must be hour-aligned (got {value}, hour is {})",
            hour_floor(ts)
        ));
    }
    Ok(ts)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    // Replay surfaces are read-only; only execute-hour needs a writable
    // substrate handle.
    let store = if matches!(cli.command, Command::ExecuteHour { .. }) {
        SqliteStore::open(&cli.db)
    } else {
        SqliteStore::open_read_only(&cli.db)
    }
    .with_context(|| format!("open substrate at {}", cli.db.display()))?;

    match cli.command {
        Command::ExecuteHour {
            run_id,
            account_id,
            run_mode,
            hour_ts_utc,
        } => {
            let result = execute_hour(&store, run_id, account_id, run_mode, hour_ts_utc)
                .context("execute-hour failed")?;
            let payload = json!({
                "command": "execute-hour",
                "run_id": run_id,
                "counts": result.counts(),
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::ReplayHour {
            run_id,
            account_id,
            hour_ts_utc,
        } => {
            let report = replay_hour(&store, run_id, account_id, hour_ts_utc)
                .context("replay-hour failed")?;
            let parity = report.mismatch_count == 0;
            let payload = json!({
                "command": "replay-hour",
                "run_id": run_id,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(exit_for_parity(parity))
        }
        Command::ReplayManifest {
            run_id,
            account_id,
            hour_ts_utc,
        } => {
            let report = replay_manifest_parity(&store, run_id, account_id, hour_ts_utc)
                .context("replay-manifest failed")?;
            let parity = report.replay_parity;
            let payload = json!({
                "command": "replay-manifest",
                "run_id": run_id,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(exit_for_parity(parity))
        }
        Command::ReplayWindow {
            account_id,
            run_mode,
            start,
            end,
            max_targets,
        } => {
            let report = replay_manifest_window_parity(
                &store,
                account_id,
                run_mode.as_str(),
                start,
                end,
                max_targets,
            )
            .context("replay-window failed")?;
            let parity = report.replay_parity;
            let payload = json!({
                "command": "replay-window",
                "account_id": account_id,
                "report": report,
            });
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(exit_for_parity(parity))
        }
    }
}

fn exit_for_parity(parity: bool) -> ExitCode {
    if parity {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
