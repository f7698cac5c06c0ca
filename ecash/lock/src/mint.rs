// Copyright (c) 2024 The Botho Foundation

//! The mint as seen by the lock engine.
//!
//! A [`MintBoundary`] is scoped to exactly one mint URL and one unit. Engine
//! components call [`ensure_scope`] before handing it a token, so a token from
//! another mint or in another unit fails fast instead of reaching the network.

use async_trait::async_trait;
use bth_crypto_p2pk::{BlindingTweak, PublicKey};
use serde::{Deserialize, Serialize};

use crate::{
    error::LockError,
    proof::{CurrencyUnit, MintUrl, Proof, Token},
    secret::LockTemplate,
};

/// Spend state of a proof as reported by the mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpendState {
    Unspent,
    Pending,
    Spent,
}

/// State of a melt quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteState {
    Unpaid,
    Pending,
    Paid,
}

/// Quote for paying a lightning invoice out of ecash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    #[serde(rename = "quote")]
    pub id: String,
    /// Invoice amount, in the boundary's unit.
    pub amount: u64,
    pub fee_reserve: u64,
    /// The invoice this quote pays.
    #[serde(default)]
    pub request: String,
    pub state: QuoteState,
    #[serde(default)]
    pub expiry: Option<u64>,
}

impl MeltQuote {
    /// Value the inputs must cover.
    pub fn total(&self) -> u64 {
        self.amount.saturating_add(self.fee_reserve)
    }
}

/// Quote for issuing ecash against a lightning payment.
///
/// Used here only as a conversion probe: `native_amount` is what `amount`
/// units would cost in the settlement unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintQuote {
    pub id: String,
    pub amount: u64,
    pub request: String,
    pub native_amount: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteRequest {
    /// Quote paying this invoice.
    Melt { request: String },
    /// Quote issuing this many units.
    Mint { amount: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quote {
    Melt(MeltQuote),
    Mint(MintQuote),
}

/// Result of paying a melt quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeltOutcome {
    pub state: QuoteState,
    pub preimage: Option<String>,
    /// Unused fee reserve returned by the mint.
    pub change: Vec<Proof>,
}

/// One requested output of a swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRequest {
    pub amount: u64,
    /// Lock the output proofs to this template. `None` for plain proofs.
    pub lock: Option<LockTemplate>,
}

impl OutputRequest {
    pub fn plain(amount: u64) -> Self {
        Self { amount, lock: None }
    }

    pub fn locked(amount: u64, lock: LockTemplate) -> Self {
        Self {
            amount,
            lock: Some(lock),
        }
    }
}

/// Mint operations the engine depends on.
#[async_trait]
pub trait MintBoundary: Send + Sync {
    fn mint_url(&self) -> &MintUrl;

    fn unit(&self) -> &CurrencyUnit;

    /// Spend state of each proof, in input order.
    async fn check_state(&self, proofs: &[Proof]) -> Result<Vec<SpendState>, LockError>;

    async fn create_quote(&self, request: QuoteRequest) -> Result<Quote, LockError>;

    async fn pay_quote(&self, quote: &MeltQuote, proofs: &[Proof])
        -> Result<MeltOutcome, LockError>;

    /// Swap `inputs` for fresh proofs, one group per requested output.
    ///
    /// The requested amounts plus [`MintBoundary::input_fee`] must equal the
    /// input total.
    async fn split_or_swap(
        &self,
        inputs: &[Proof],
        outputs: &[OutputRequest],
    ) -> Result<Vec<Vec<Proof>>, LockError>;

    /// Fee the mint charges for spending `proofs`.
    fn input_fee(&self, _proofs: &[Proof]) -> u64 {
        0
    }

    /// Key blinded towards this mint: `P + SHA256(domain || url || P)·G`.
    fn blind_key(&self, key: &PublicKey) -> Result<PublicKey, LockError> {
        let tweak = BlindingTweak::for_mint(self.mint_url().as_str(), key);
        Ok(key.blind(&tweak)?)
    }
}

/// Fail unless `token` belongs to the boundary's mint and unit.
pub fn ensure_scope(mint: &dyn MintBoundary, token: &Token) -> Result<(), LockError> {
    if &token.mint_url != mint.mint_url() {
        return Err(LockError::MintMismatch {
            expected: mint.mint_url().to_string(),
            actual: token.mint_url.to_string(),
        });
    }
    if &token.unit != mint.unit() {
        return Err(LockError::UnitMismatch {
            expected: mint.unit().to_string(),
            actual: token.unit.to_string(),
        });
    }
    Ok(())
}

/// Melt quote out of a generic quote response.
pub fn expect_melt_quote(quote: Quote) -> Result<MeltQuote, LockError> {
    match quote {
        Quote::Melt(quote) => Ok(quote),
        Quote::Mint(_) => Err(LockError::MintRequest(
            "mint returned a mint quote for a melt request".to_string(),
        )),
    }
}

/// Mint quote out of a generic quote response.
pub fn expect_mint_quote(quote: Quote) -> Result<MintQuote, LockError> {
    match quote {
        Quote::Mint(quote) => Ok(quote),
        Quote::Melt(_) => Err(LockError::MintRequest(
            "mint returned a melt quote for a mint request".to_string(),
        )),
    }
}
