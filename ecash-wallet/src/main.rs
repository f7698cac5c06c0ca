//! Botho Ecash Wallet CLI
//!
//! Hold, lock, co-sign, redeem and melt pay-to-public-key locked ecash.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use botho_ecash_wallet::commands::{self, lock::LockOptions, WalletPaths};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "botho-ecash-wallet")]
#[command(about = "Botho ecash wallet - lock tokens to keys and spend them safely")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom wallet file path
    #[arg(short, long, global = true)]
    wallet: Option<String>,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new wallet
    Init {
        /// Recover from existing mnemonic
        #[arg(long)]
        recover: bool,
    },

    /// Show the public keys others can lock tokens to
    Pubkey {
        /// Show only the key at this index
        #[arg(short, long)]
        index: Option<usize>,

        /// Show keys blinded towards the configured mint
        #[arg(long)]
        blinded: bool,
    },

    /// Show ecash held per mint
    Balance {
        /// Show every proof
        #[arg(long)]
        detailed: bool,
    },

    /// Receive a token into the wallet
    Receive {
        /// Encoded token, or '-' to read stdin
        token: String,
    },

    /// Show a token's spending conditions and spend state
    Check {
        /// Encoded token, or '-' to read stdin
        token: String,

        /// Skip asking the mint which proofs are spent
        #[arg(long)]
        offline: bool,
    },

    /// Lock wallet ecash to one or more public keys
    Lock {
        /// Public key that may spend the token (repeat for multisig)
        #[arg(long = "to", required = true)]
        to: Vec<String>,

        /// Signatures required on the lock path
        #[arg(long)]
        n_sigs: Option<u64>,

        /// Key that may reclaim the token after the locktime (repeatable)
        #[arg(long)]
        refund: Vec<String>,

        /// Signatures required on the refund path
        #[arg(long)]
        n_sigs_refund: Option<u64>,

        /// Unix time the refund path opens, or +SECONDS from now
        #[arg(long)]
        locktime: Option<String>,

        /// Amount to lock (defaults to the whole balance)
        #[arg(short, long)]
        amount: Option<u64>,

        /// Blind the keys towards the mint
        #[arg(long)]
        blind: bool,

        /// Memo carried in the token
        #[arg(long)]
        memo: Option<String>,
    },

    /// Add this wallet's signatures to a locked token
    Sign {
        /// Encoded token, or '-' to read stdin
        token: String,

        /// Hex secret key to sign with instead of the wallet keys
        #[arg(long)]
        key: Option<String>,
    },

    /// Redeem a locked token into the wallet
    Redeem {
        /// Encoded token, or '-' to read stdin
        token: String,

        /// Hex secret key to sign with in addition to the wallet keys
        #[arg(long)]
        key: Option<String>,
    },

    /// Pay a lightning invoice or address
    Melt {
        /// bolt11 invoice, lightning address or LNURL
        target: String,

        /// Pay from this token instead of the wallet balance
        #[arg(long)]
        token: Option<String>,

        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show wallet history
    History {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Determine wallet path
    let wallet_path = match cli.wallet {
        Some(path) => PathBuf::from(path),
        None => dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .join(".botho-ecash-wallet")
            .join("wallet.dat"),
    };
    let paths = WalletPaths::new(wallet_path, cli.config.map(PathBuf::from));

    match cli.command {
        Commands::Init { recover } => commands::init::run(&paths, recover).await,
        Commands::Pubkey { index, blinded } => commands::pubkey::run(&paths, index, blinded).await,
        Commands::Balance { detailed } => commands::balance::run(&paths, detailed).await,
        Commands::Receive { token } => commands::receive::run(&paths, &token).await,
        Commands::Check { token, offline } => commands::check::run(&paths, &token, offline).await,
        Commands::Lock {
            to,
            n_sigs,
            refund,
            n_sigs_refund,
            locktime,
            amount,
            blind,
            memo,
        } => {
            let options = LockOptions {
                to,
                n_sigs,
                refund,
                n_sigs_refund,
                locktime,
                amount,
                blind,
                memo,
            };
            commands::lock::run(&paths, &options).await
        }
        Commands::Sign { token, key } => commands::sign::run(&paths, &token, key.as_deref()).await,
        Commands::Redeem { token, key } => {
            commands::redeem::run(&paths, &token, key.as_deref()).await
        }
        Commands::Melt { target, token, yes } => {
            commands::melt::run(&paths, &target, token.as_deref(), yes).await
        }
        Commands::History { limit } => commands::history::run(&paths, limit).await,
    }
}
