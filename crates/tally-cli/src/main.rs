//! Tally CLI
//!
//! Runs the ledger node, and performs one-off ledger operations against the
//! snapshot file named in the configuration.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tally_core::{AccountId, Amount, Capability, StakeId, SystemClock};
use tally_node::config::LoggingConfig;
use tally_node::{LedgerService, NodeConfig, TallyNode};
use tally_storage::LedgerSnapshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tally")]
#[command(version)]
#[command(about = "Tally - token ledger, staking and marketplace settlement", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "tally.toml", env = "TALLY_CONFIG")]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Start a Tally node
    Node,

    /// Show an account
    Balance { account: String },

    /// Recent transactions of an account, newest first
    History {
        account: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Transfer tokens (the sender pays the fee)
    Transfer {
        from: String,
        to: String,
        amount: Amount,
        #[arg(short, long, default_value = "")]
        note: String,
    },

    /// Issue new tokens
    Mint {
        to: String,
        amount: Amount,
        #[arg(short, long, default_value = "manual mint")]
        reason: String,
    },

    /// Destroy tokens
    Burn {
        from: String,
        amount: Amount,
        #[arg(short, long, default_value = "manual burn")]
        reason: String,
    },

    /// Open a staking position
    Stake {
        owner: String,
        pool: String,
        amount: Amount,
        /// Lock period in days (pool default when omitted)
        #[arg(short, long)]
        lock_days: Option<u32>,
    },

    /// List staking positions
    Positions { owner: String },

    /// Pending staking rewards
    Pending {
        owner: String,
        /// Single position (all positions when omitted)
        #[arg(short, long)]
        position: Option<StakeId>,
    },

    /// Claim staking rewards
    Claim {
        owner: String,
        #[arg(short, long)]
        position: Option<StakeId>,
    },

    /// Add pending rewards to a position's principal
    Compound { owner: String, position: StakeId },

    /// Withdraw principal from a position
    Unstake {
        owner: String,
        position: StakeId,
        /// Partial amount (whole principal when omitted)
        #[arg(short, long)]
        amount: Option<Amount>,
    },

    /// Buy content from a creator
    Purchase {
        buyer: String,
        creator: String,
        price: Amount,
        content: String,
    },

    /// Tip a creator
    Tip {
        tipper: String,
        creator: String,
        amount: Amount,
        #[arg(short, long, default_value = "")]
        message: String,
    },

    /// Pay a referral bonus for a referred purchase
    Referral {
        referrer: String,
        referred: String,
        purchase_amount: Amount,
    },

    /// Run one distribution sweep
    Distribute,

    /// Grant or revoke an account capability
    Grant {
        account: String,
        #[arg(value_parser = parse_capability)]
        capability: Capability,
        #[arg(long)]
        revoke: bool,
    },

    /// Freeze or release an account
    Hold {
        account: String,
        #[arg(long)]
        release: bool,
    },

    /// Ledger-wide statistics
    Stats,

    /// Snapshot file tools
    Snapshot {
        #[command(subcommand)]
        snapshot: SnapshotCommands,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Validate a snapshot file
    Verify {
        /// Snapshot file (configured path when omitted)
        path: Option<PathBuf>,
    },
    /// Export a snapshot as JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
        path: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct SnapshotSummary {
    path: PathBuf,
    saved_at: String,
    sequence: u64,
    accounts: usize,
    transactions: usize,
    positions: usize,
    total_supply: Amount,
    burned_supply: Amount,
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    Capability::parse(s).ok_or_else(|| format!("unknown capability '{s}' (premium, creator, verified)"))
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn expand_path(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

fn load_config(path: &Path) -> anyhow::Result<NodeConfig> {
    let mut config = if path.exists() {
        NodeConfig::load(path)?
    } else {
        NodeConfig::default()
    };
    config.node.data_dir = expand_path(Path::new(&config.node.data_dir))
        .display()
        .to_string();
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn account(id: String) -> AccountId {
    AccountId::new(id)
}

/// Open the ledger from the snapshot file, run `op`, and persist the result
fn with_ledger<T: Serialize>(
    config: &NodeConfig,
    op: impl FnOnce(&LedgerService) -> anyhow::Result<T>,
) -> anyhow::Result<()> {
    let (service, _) = LedgerService::open(config, Arc::new(SystemClock))
        .with_context(|| format!("Failed to open ledger {}", config.snapshot_path().display()))?;
    let output = op(&service)?;
    service.save(&config.snapshot_path())?;
    print_json(&output)
}

fn summarize(path: &Path) -> anyhow::Result<(LedgerSnapshot, SnapshotSummary)> {
    let snapshot = LedgerSnapshot::read_from(path)
        .with_context(|| format!("Invalid snapshot {}", path.display()))?;
    let summary = SnapshotSummary {
        path: path.to_path_buf(),
        saved_at: snapshot.saved_at.to_rfc3339(),
        sequence: snapshot.sequence_counter,
        accounts: snapshot.accounts.len(),
        transactions: snapshot.transactions.len(),
        positions: snapshot.positions.len(),
        total_supply: snapshot.total_supply,
        burned_supply: snapshot.burned_supply,
    };
    Ok((snapshot, summary))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = expand_path(&cli.config);
    let config = load_config(&config_path)?;
    init_logging(cli.verbose, &config.logging);

    match cli.command {
        Commands::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                );
            }
            std::fs::write(&config_path, NodeConfig::default().to_toml_string()?)?;
            println!("Wrote default configuration to {}", config_path.display());
        }

        Commands::Node => {
            tracing::info!("Config: {:?}", config_path);
            tracing::info!("Data: {}", config.node.data_dir);
            std::fs::create_dir_all(&config.node.data_dir)?;

            let mut node = TallyNode::new(config).await?;
            node.run().await?;
        }

        Commands::Balance { account: id } => {
            with_ledger(&config, |ledger| Ok(ledger.get_balance(&account(id))?))?;
        }

        Commands::History { account: id, limit } => {
            with_ledger(&config, |ledger| Ok(ledger.history(&account(id), limit)?))?;
        }

        Commands::Transfer { from, to, amount, note } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.transfer(&account(from), &account(to), amount, &note)?)
            })?;
        }

        Commands::Mint { to, amount, reason } => {
            with_ledger(&config, |ledger| Ok(ledger.mint(&account(to), amount, &reason)?))?;
        }

        Commands::Burn { from, amount, reason } => {
            with_ledger(&config, |ledger| Ok(ledger.burn(&account(from), amount, &reason)?))?;
        }

        Commands::Stake { owner, pool, amount, lock_days } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.stake(&account(owner), &pool, amount, lock_days)?)
            })?;
        }

        Commands::Positions { owner } => {
            with_ledger(&config, |ledger| Ok(ledger.positions(&account(owner))?))?;
        }

        Commands::Pending { owner, position } => {
            with_ledger(&config, |ledger| {
                Ok(match position {
                    Some(id) => ledger.pending_reward_of(&account(owner), id)?,
                    None => ledger.pending_for(&account(owner))?,
                })
            })?;
        }

        Commands::Claim { owner, position } => {
            with_ledger(&config, |ledger| Ok(ledger.claim(&account(owner), position)?))?;
        }

        Commands::Compound { owner, position } => {
            with_ledger(&config, |ledger| Ok(ledger.compound(&account(owner), position)?))?;
        }

        Commands::Unstake { owner, position, amount } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.unstake(&account(owner), position, amount)?)
            })?;
        }

        Commands::Purchase { buyer, creator, price, content } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.purchase(&account(buyer), &account(creator), price, &content)?)
            })?;
        }

        Commands::Tip { tipper, creator, amount, message } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.tip(&account(tipper), &account(creator), amount, &message)?)
            })?;
        }

        Commands::Referral { referrer, referred, purchase_amount } => {
            with_ledger(&config, |ledger| {
                Ok(ledger.referral_bonus(&account(referrer), &account(referred), purchase_amount)?)
            })?;
        }

        Commands::Distribute => {
            with_ledger(&config, |ledger| {
                Ok(ledger.run_distribution(&AtomicBool::new(false)))
            })?;
        }

        Commands::Grant { account: id, capability, revoke } => {
            with_ledger(&config, |ledger| {
                let id = account(id);
                if revoke {
                    ledger.revoke_capability(&id, capability)?;
                } else {
                    ledger.grant_capability(&id, capability)?;
                }
                Ok(ledger.get_balance(&id)?)
            })?;
        }

        Commands::Hold { account: id, release } => {
            with_ledger(&config, |ledger| {
                let id = account(id);
                ledger.set_hold(&id, !release)?;
                Ok(ledger.get_balance(&id)?)
            })?;
        }

        Commands::Stats => {
            with_ledger(&config, |ledger| Ok(ledger.stats()?))?;
        }

        Commands::Snapshot { snapshot } => match snapshot {
            SnapshotCommands::Verify { path } => {
                let path = path.map_or_else(|| config.snapshot_path(), |p| expand_path(&p));
                let (_, summary) = summarize(&path)?;
                print_json(&summary)?;
            }
            SnapshotCommands::Export { output, path } => {
                let path = path.map_or_else(|| config.snapshot_path(), |p| expand_path(&p));
                let (snapshot, _) = summarize(&path)?;
                let json = snapshot.to_json_pretty()?;
                match output {
                    Some(output) => {
                        std::fs::write(expand_path(&output), json)?;
                        println!("Exported {} to {}", path.display(), output.display());
                    }
                    None => println!("{json}"),
                }
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_amounts_parse_at_the_boundary() {
        let cli = Cli::try_parse_from(["tally", "transfer", "alice", "bob", "12.5"]).unwrap();
        match cli.command {
            Commands::Transfer { amount, .. } => assert_eq!(amount, "12.5".parse().unwrap()),
            _ => panic!("expected transfer"),
        }
        assert!(Cli::try_parse_from(["tally", "transfer", "alice", "bob", "-3"]).is_err());
    }

    #[test]
    fn test_position_ids_accept_display_form() {
        let cli = Cli::try_parse_from(["tally", "compound", "alice", "stake-000007"]).unwrap();
        match cli.command {
            Commands::Compound { position, .. } => assert_eq!(position, StakeId::new(7)),
            _ => panic!("expected compound"),
        }
    }

    #[test]
    fn test_capability_parser() {
        assert_eq!(parse_capability("premium"), Ok(Capability::Premium));
        assert!(parse_capability("admin").is_err());
    }

    #[test]
    fn test_expand_path_leaves_plain_paths() {
        assert_eq!(expand_path(Path::new("data/ledger.snap")), PathBuf::from("data/ledger.snap"));
    }
}
