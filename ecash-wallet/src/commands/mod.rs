//! CLI Commands
//!
//! Implementation of all wallet CLI commands. Each command keeps its
//! prompting and printing in `run`; the work against the mint and the proof
//! store lives in plain async functions that take a session and a store.

pub mod balance;
pub mod check;
pub mod history;
pub mod init;
pub mod lock;
pub mod melt;
pub mod pubkey;
pub mod receive;
pub mod redeem;
pub mod sign;

use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Result};
use bth_ecash_lock::{
    CurrencyUnit, ManualKeySigner, MintBoundary, MintUrl, Signer, Token, WalletSession,
};

use crate::{
    config::{SignerKind, WalletConfig},
    keys::WalletKeys,
    mint_client::HttpMint,
    storage::EncryptedWallet,
};

/// Files the wallet reads and writes.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    pub wallet: PathBuf,
    pub proofs: PathBuf,
    pub config: PathBuf,
}

impl WalletPaths {
    /// Proof store and config default to the wallet file's directory.
    pub fn new(wallet: PathBuf, config: Option<PathBuf>) -> Self {
        let dir = wallet
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            proofs: dir.join("proofs.json"),
            config: config.unwrap_or_else(|| dir.join("config.toml")),
            wallet,
        }
    }

    pub fn load_config(&self) -> Result<WalletConfig> {
        WalletConfig::load_or_default(&self.config)
    }
}

/// Prompt for password input (hidden)
pub fn prompt_password(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let password = rpassword::read_password()?;
    Ok(password)
}

/// Prompt for confirmation
pub fn prompt_confirm(message: &str) -> Result<bool> {
    print!("{} [y/N]: ", message);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mError:\x1b[0m {}", message);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("\x1b[32m{}\x1b[0m", message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("\x1b[33mWarning:\x1b[0m {}", message);
}

/// Format an amount with its unit
pub fn format_amount(amount: u64, unit: &CurrencyUnit) -> String {
    format!("{} {}", amount, unit)
}

/// Decode a token argument; `-` reads it from stdin.
pub fn read_token(arg: &str) -> Result<Token> {
    let encoded = if arg == "-" {
        let mut input = String::new();
        io::stdin().read_to_string(&mut input)?;
        input
    } else {
        arg.to_string()
    };
    Ok(encoded.parse::<Token>()?)
}

/// Whether any proof in `token` carries a spending condition.
pub fn has_locked_proofs(token: &Token) -> Result<bool> {
    for proof in &token.proofs {
        if proof.secret.locking_condition()?.is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Prompt for the password and derive the wallet's lock keys.
pub fn unlock_keys(wallet_path: &Path, config: &WalletConfig) -> Result<WalletKeys> {
    if !EncryptedWallet::exists(wallet_path) {
        return Err(anyhow!(
            "No wallet found. Run 'botho-ecash-wallet init' first."
        ));
    }

    let wallet = EncryptedWallet::load(wallet_path)?;
    let password = prompt_password("Enter wallet password: ")?;
    let mnemonic = wallet
        .decrypt(&password)
        .map_err(|_| anyhow!("Failed to decrypt wallet - wrong password?"))?;

    WalletKeys::from_mnemonic(&mnemonic, config.custodial_keys)
}

/// Connect to `mint_url` for `unit`.
pub async fn connect_mint(
    config: &WalletConfig,
    mint_url: &MintUrl,
    unit: &CurrencyUnit,
) -> Result<Arc<HttpMint>> {
    println!("Connecting to {}...", mint_url);
    let mint = HttpMint::connect(mint_url.clone(), unit.clone(), config.request_timeout()).await?;
    Ok(Arc::new(mint))
}

/// Signers in the configured order. Backends without material are skipped.
pub fn build_signers(
    config: &WalletConfig,
    mint_url: &MintUrl,
    keys: Option<&WalletKeys>,
    manual_key: Option<&str>,
) -> Result<Vec<Arc<dyn Signer>>> {
    let mut signers: Vec<Arc<dyn Signer>> = Vec::new();
    for kind in &config.signer_order {
        match kind {
            SignerKind::Custodial => {
                if let Some(keys) = keys {
                    signers.push(Arc::new(keys.custodial_signer(mint_url)));
                }
            }
            SignerKind::Manual => {
                if let Some(secret) = manual_key {
                    let signer = ManualKeySigner::from_hex(secret.trim())?.with_mint(mint_url.clone());
                    signers.push(Arc::new(signer));
                }
            }
        }
    }
    Ok(signers)
}

/// A session over `mint` with the configured fee policy and signers.
pub fn build_session(
    config: &WalletConfig,
    mint: Arc<dyn MintBoundary>,
    signers: Vec<Arc<dyn Signer>>,
) -> WalletSession {
    signers.into_iter().fold(
        WalletSession::new(mint)
            .with_fee_policy(config.fee_policy())
            .with_max_rounds(config.max_negotiation_rounds),
        WalletSession::with_signer,
    )
}
