//! Configuration for the ecash wallet.

use std::{path::Path, time::Duration};

use bth_ecash_lock::{
    CurrencyUnit, FeePolicy, MintUrl, FEE_RATE_ESTIMATE_PPM, MAX_NEGOTIATION_ROUNDS,
    MIN_FEE_FLOOR,
};
use serde::{Deserialize, Serialize};

/// Signer backends the wallet can offer a locked proof to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignerKind {
    /// Keys derived from the wallet mnemonic
    Custodial,
    /// A raw private key given with `--key`
    Manual,
}

/// Wallet configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Mint used when a command is not given a token from another mint
    #[serde(default = "default_mint_url")]
    pub mint_url: String,

    /// Currency unit of the wallet's default pocket
    #[serde(default = "default_unit")]
    pub unit: String,

    /// HTTP timeout for mint and LNURL requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Fee reserve estimate in parts per million of the payment
    #[serde(default = "default_fee_rate_ppm")]
    pub fee_rate_ppm: u64,

    /// Lower bound on the estimated fee reserve
    #[serde(default = "default_min_fee_reserve")]
    pub min_fee_reserve: u64,

    /// Melt negotiation round cap (never above the engine limit)
    #[serde(default = "default_max_negotiation_rounds")]
    pub max_negotiation_rounds: u32,

    /// How long to wait for a pending lightning payment
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Order in which signer backends are tried
    #[serde(default = "default_signer_order")]
    pub signer_order: Vec<SignerKind>,

    /// Number of lock keys derived from the mnemonic
    #[serde(default = "default_custodial_keys")]
    pub custodial_keys: u32,
}

fn default_mint_url() -> String {
    "http://localhost:3338".to_string()
}

fn default_unit() -> String {
    CurrencyUnit::NATIVE.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_fee_rate_ppm() -> u64 {
    FEE_RATE_ESTIMATE_PPM
}

fn default_min_fee_reserve() -> u64 {
    MIN_FEE_FLOOR
}

fn default_max_negotiation_rounds() -> u32 {
    MAX_NEGOTIATION_ROUNDS
}

fn default_confirmation_timeout() -> u64 {
    bth_ecash_lock::PAYMENT_CONFIRMATION_WINDOW.as_secs()
}

fn default_signer_order() -> Vec<SignerKind> {
    vec![SignerKind::Custodial, SignerKind::Manual]
}

fn default_custodial_keys() -> u32 {
    4
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            mint_url: default_mint_url(),
            unit: default_unit(),
            request_timeout_secs: default_request_timeout(),
            fee_rate_ppm: default_fee_rate_ppm(),
            min_fee_reserve: default_min_fee_reserve(),
            max_negotiation_rounds: default_max_negotiation_rounds(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            signer_order: default_signer_order(),
            custodial_keys: default_custodial_keys(),
        }
    }
}

impl WalletConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WalletConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = url::Url::parse(&self.mint_url)
            .map_err(|e| anyhow::anyhow!("mint_url is not a valid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("mint_url must use http or https, got {}", url.scheme());
        }

        if self.unit.trim().is_empty() {
            anyhow::bail!("unit must not be empty");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.fee_rate_ppm > 1_000_000 {
            anyhow::bail!(
                "fee_rate_ppm must be at most 1000000 (100%), got {}",
                self.fee_rate_ppm
            );
        }

        if self.max_negotiation_rounds == 0 || self.max_negotiation_rounds > MAX_NEGOTIATION_ROUNDS
        {
            anyhow::bail!(
                "max_negotiation_rounds must be between 1 and {}, got {}",
                MAX_NEGOTIATION_ROUNDS,
                self.max_negotiation_rounds
            );
        }

        if self.confirmation_timeout_secs == 0 {
            anyhow::bail!("confirmation_timeout_secs must be greater than 0");
        }

        if self.signer_order.is_empty() {
            anyhow::bail!("At least one signer must be listed in signer_order");
        }
        for (i, kind) in self.signer_order.iter().enumerate() {
            if self.signer_order[..i].contains(kind) {
                anyhow::bail!("signer_order lists {:?} more than once", kind);
            }
        }

        if self.custodial_keys == 0 {
            anyhow::bail!("custodial_keys must be greater than 0");
        }

        Ok(())
    }

    pub fn mint_url(&self) -> MintUrl {
        MintUrl::from(self.mint_url.as_str())
    }

    pub fn unit(&self) -> CurrencyUnit {
        CurrencyUnit::from(self.unit.as_str())
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            fee_rate_ppm: self.fee_rate_ppm,
            min_fee_floor: self.min_fee_reserve,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirmation_window(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}
