//! tidelock-cli
//!
//! Read-only inspector for a tidelock state directory. Prints the ledgers
//! the engine persists: supply and obligation scalars, per-epoch reward
//! records, account positions, and the exit-fee curve.
//!
//! Usage:
//!   tidelock status    [--data-dir <path>]
//!   tidelock epoch     --at <unix_ts>
//!   tidelock account   --id <b58>
//!   tidelock buckets
//!   tidelock fees

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use tracing::debug;

use tidelock_core::epoch::epoch_of;
use tidelock_core::error::TidelockError;
use tidelock_core::types::{AccountId, Timestamp};
use tidelock_core::FEE_DENOMINATOR;
use tidelock_redemption::{fee_preview, RedemptionQuery};
use tidelock_state::StateDb;

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "tidelock",
    version,
    about = "tidelock — inspect a ledger state directory"
)]
struct Args {
    /// Path to the engine's state directory.
    #[arg(long, global = true, default_value = "./tidelock-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print supply, obligation, and snapshot scalars.
    Status {
        /// Emit machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Describe the reward record of the epoch containing a timestamp.
    Epoch {
        /// Unix timestamp (UTC seconds) inside the epoch of interest.
        #[arg(long)]
        at: Timestamp,
    },

    /// Describe an account's balances and redemption notes.
    Account {
        /// Account ID (base-58).
        #[arg(long)]
        id: String,
    },

    /// List per-unlock-time redemption obligations.
    Buckets,

    /// Print the exit-fee curve at each whole-epoch boundary.
    Fees,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<(), TidelockError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,tidelock=info".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    debug!(data_dir = %args.data_dir.display(), "opening state directory");
    let db = StateDb::open(&args.data_dir)?;
    let query = RedemptionQuery::new(&db);

    match args.command {
        Command::Status { json } => cmd_status(&db, json),
        Command::Epoch { at } => {
            println!("{}", query.describe_epoch(at)?);
            Ok(())
        }
        Command::Account { id } => {
            let account = AccountId::from_b58(&id)
                .map_err(|e| TidelockError::Serialization(format!("invalid account id: {e}")))?;
            println!("{}", query.describe_account(&account, unix_now())?);
            Ok(())
        }
        Command::Buckets => {
            println!("{}", query.outstanding_summary()?);
            Ok(())
        }
        Command::Fees => cmd_fees(&db),
    }
}

fn unix_now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as Timestamp)
        .unwrap_or(0)
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_status(db: &StateDb, json: bool) -> Result<(), TidelockError> {
    let now = unix_now();
    let supply = db.receipt_supply()?;
    let outstanding = db.outstanding_redemptions()?;
    let on_hand = db.on_hand()?;
    let snapshots = db.snapshot_count()?;
    let paused = db.paused()?;
    let pots = db.iter_reward_pots()?;

    if json {
        let pots_json: Vec<serde_json::Value> = pots
            .iter()
            .map(|(token, amount)| {
                serde_json::json!({ "token": token.to_hex(), "amount": amount.to_string() })
            })
            .collect();
        let out = serde_json::json!({
            "current_epoch": epoch_of(now),
            "receipt_supply": supply.to_string(),
            "outstanding_redemptions": outstanding.to_string(),
            "on_hand": on_hand.to_string(),
            "snapshots": snapshots,
            "paused": paused,
            "reward_pots": pots_json,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&out)
                .map_err(|e| TidelockError::Serialization(e.to_string()))?
        );
        return Ok(());
    }

    println!("current epoch    : {}", epoch_of(now));
    println!("receipt supply   : {supply}");
    println!("outstanding      : {outstanding}");
    println!("on hand          : {on_hand}");
    println!("snapshots taken  : {snapshots}");
    println!("paused           : {paused}");
    if let Some(target) = db.migration_target()? {
        println!("migration target : {target}");
    }
    for (token, amount) in pots {
        println!("reward pot       : {token} = {amount}");
    }
    Ok(())
}

fn cmd_fees(db: &StateDb) -> Result<(), TidelockError> {
    let fees = db.fee_config()?.unwrap_or_default();
    println!(
        "redemption fee {}..{} ppm, reward fee {} ppm (denominator {})",
        fees.redemption_fee_min, fees.redemption_fee_max, fees.reward_fee, FEE_DENOMINATOR
    );
    for point in fee_preview(&fees) {
        println!(
            "  {} epoch(s) remaining → {:.4}%",
            point.epochs_remaining,
            point.fee_percent as f64 / 10_000.0
        );
    }
    Ok(())
}
