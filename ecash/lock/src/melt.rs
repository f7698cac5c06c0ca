// Copyright (c) 2024 The Botho Foundation

//! Pay a lightning target out of a token.
//!
//! The mint's fee reserve depends on the invoice amount, and the invoice
//! amount must leave room for the reserve. [`MeltNegotiator::negotiate`]
//! resolves this with a bounded fixed-point iteration:
//!
//! 1. start from `budget - estimate_reserve(budget)`
//! 2. ask the target for an invoice, then the mint for a melt quote
//! 3. if `amount + fee_reserve` exceeds the token value, shrink the invoice by
//!    the ratio `token / total`, minus [`SAFETY_MARGIN`], and go again
//!
//! Every shrink strictly decreases the amount and at most
//! [`MAX_NEGOTIATION_ROUNDS`] rounds run, so the loop always terminates.

use std::{fmt, str::FromStr, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    error::LockError,
    fee::FeePolicy,
    mint::{
        ensure_scope, expect_melt_quote, expect_mint_quote, MeltQuote, MintBoundary,
        QuoteRequest, QuoteState,
    },
    proof::Token,
};

/// Hard cap on (invoice, quote) rounds.
pub const MAX_NEGOTIATION_ROUNDS: u32 = 5;

/// Units shaved off each proportional shrink.
pub const SAFETY_MARGIN: u64 = 1;

/// How long to wait for a payment confirmation before giving up.
pub const PAYMENT_CONFIRMATION_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Where the payment goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentTarget {
    /// A fixed bolt11 invoice.
    Invoice(String),
    /// A lightning address (`name@host`) or LNURL that issues invoices.
    Address(String),
}

impl FromStr for PaymentTarget {
    type Err = LockError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let value = lower.strip_prefix("lightning:").unwrap_or(&lower);

        if value.is_empty() {
            return Err(LockError::PaymentTarget("empty payment target".to_string()));
        }
        if value.contains('@') || value.starts_with("lnurl") {
            return Ok(PaymentTarget::Address(value.to_string()));
        }
        if value.starts_with("ln") {
            return Ok(PaymentTarget::Invoice(value.to_string()));
        }
        Err(LockError::PaymentTarget(format!(
            "unrecognized payment target {trimmed}"
        )))
    }
}

impl fmt::Display for PaymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentTarget::Invoice(invoice) => f.write_str(invoice),
            PaymentTarget::Address(address) => f.write_str(address),
        }
    }
}

/// Invoice amounts an address accepts, in the native unit, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountRange {
    pub min: u64,
    pub max: u64,
}

/// Turns an address into invoices.
#[async_trait]
pub trait PaymentResolver: Send + Sync {
    async fn amount_range(&self, address: &str) -> Result<AmountRange, LockError>;

    /// Invoice for `amount` native units.
    async fn request_invoice(&self, address: &str, amount: u64) -> Result<String, LockError>;
}

/// A quote that fits the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub invoice: String,
    pub quote: MeltQuote,
    pub rounds: u32,
}

/// Result of paying a melt quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub state: QuoteState,
    pub preimage: Option<String>,
    /// Unused reserve returned as a plain token.
    pub change: Option<Token>,
}

/// Next invoice amount after a quote for `amount` came back at `total`.
fn shrink(amount: u64, token_amount: u64, total: u64) -> u64 {
    let scaled = (amount as u128 * token_amount as u128 / total.max(1) as u128) as u64;
    scaled
        .saturating_sub(SAFETY_MARGIN)
        .min(amount.saturating_sub(1))
}

/// Negotiates and settles melts against one mint.
pub struct MeltNegotiator<'a> {
    mint: &'a dyn MintBoundary,
    resolver: Option<&'a dyn PaymentResolver>,
    fee_policy: FeePolicy,
    max_rounds: u32,
}

impl<'a> MeltNegotiator<'a> {
    pub fn new(mint: &'a dyn MintBoundary) -> Self {
        Self {
            mint,
            resolver: None,
            fee_policy: FeePolicy::default(),
            max_rounds: MAX_NEGOTIATION_ROUNDS,
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn PaymentResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_fee_policy(mut self, fee_policy: FeePolicy) -> Self {
        self.fee_policy = fee_policy;
        self
    }

    /// Lower the round cap. Never raises it above [`MAX_NEGOTIATION_ROUNDS`].
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.clamp(1, MAX_NEGOTIATION_ROUNDS);
        self
    }

    /// Find an invoice for `target` whose quote fits in `token`.
    pub async fn negotiate(
        &self,
        token: &Token,
        target: &PaymentTarget,
    ) -> Result<Negotiated, LockError> {
        ensure_scope(self.mint, token)?;
        let token_amount = token.value()?;

        match target {
            PaymentTarget::Invoice(invoice) => self.quote_fixed(invoice, token_amount).await,
            PaymentTarget::Address(address) => self.fit(address, token_amount).await,
        }
    }

    async fn quote_fixed(&self, invoice: &str, token_amount: u64) -> Result<Negotiated, LockError> {
        let quote = self.melt_quote(invoice).await?;
        if quote.total() > token_amount {
            return Err(LockError::InsufficientValue {
                needed: quote.total(),
                available: token_amount,
            });
        }
        Ok(Negotiated {
            invoice: invoice.to_string(),
            quote,
            rounds: 1,
        })
    }

    async fn fit(&self, address: &str, token_amount: u64) -> Result<Negotiated, LockError> {
        let resolver = self.resolver.ok_or_else(|| {
            LockError::PaymentTarget("no resolver configured for payment addresses".to_string())
        })?;

        let budget = self.native_budget(token_amount).await?;
        let range = resolver.amount_range(address).await?;

        let mut amount = self.fee_policy.initial_invoice_amount(budget).min(range.max);
        if amount == 0 || amount < range.min {
            return Err(LockError::InsufficientValue {
                needed: range.min.max(1),
                available: budget,
            });
        }

        for round in 1..=self.max_rounds {
            let invoice = resolver.request_invoice(address, amount).await?;
            let quote = self.melt_quote(&invoice).await?;
            let total = quote.total();
            debug!(round, amount, total, token_amount, "melt negotiation round");

            if total <= token_amount {
                info!(round, amount, fee_reserve = quote.fee_reserve, "melt quote fits");
                return Ok(Negotiated {
                    invoice,
                    quote,
                    rounds: round,
                });
            }

            let next = shrink(amount, token_amount, total);
            if next == 0 || next < range.min {
                return Err(LockError::InsufficientValue {
                    needed: total,
                    available: token_amount,
                });
            }
            amount = next;
        }

        warn!(rounds = self.max_rounds, "melt negotiation gave up");
        Err(LockError::NegotiationDidNotConverge {
            rounds: self.max_rounds,
        })
    }

    /// Token value expressed in the settlement unit.
    async fn native_budget(&self, token_amount: u64) -> Result<u64, LockError> {
        if self.mint.unit().is_native() {
            return Ok(token_amount);
        }
        let probe = expect_mint_quote(
            self.mint
                .create_quote(QuoteRequest::Mint {
                    amount: token_amount,
                })
                .await?,
        )?;
        let native = probe.native_amount.ok_or_else(|| {
            LockError::MintRequest("conversion quote carries no native amount".to_string())
        })?;
        debug!(token_amount, native, unit = %self.mint.unit(), "converted token value");
        Ok(native)
    }

    async fn melt_quote(&self, invoice: &str) -> Result<MeltQuote, LockError> {
        expect_melt_quote(
            self.mint
                .create_quote(QuoteRequest::Melt {
                    request: invoice.to_string(),
                })
                .await?,
        )
    }

    /// Spend every proof of `token` against `quote`.
    pub async fn settle(&self, token: &Token, quote: &MeltQuote) -> Result<Settlement, LockError> {
        ensure_scope(self.mint, token)?;
        let available = token.value()?;
        if quote.total() > available {
            return Err(LockError::InsufficientValue {
                needed: quote.total(),
                available,
            });
        }

        let outcome = self.mint.pay_quote(quote, &token.proofs).await?;
        if outcome.state == QuoteState::Unpaid {
            return Err(LockError::PaymentFailed(format!(
                "mint reports quote {} unpaid",
                quote.id
            )));
        }

        let change = (!outcome.change.is_empty()).then(|| token.with_proofs(outcome.change));
        info!(
            quote = %quote.id,
            state = ?outcome.state,
            change = change.as_ref().map(|t| t.proofs.len()).unwrap_or(0),
            "melt settled"
        );
        Ok(Settlement {
            state: outcome.state,
            preimage: outcome.preimage,
            change,
        })
    }
}

/// Proof that a payment went through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub preimage: Option<String>,
}

/// Source of a payment confirmation, e.g. polling the melt quote.
#[async_trait]
pub trait ConfirmationWatcher: Send {
    /// Resolve once the payment is confirmed. Errors mean it failed.
    async fn confirmed(&mut self) -> Result<Confirmation, LockError>;
}

/// Wait for `watcher`, giving up with [`LockError::PaymentTimedOut`] after
/// `window`.
pub async fn await_confirmation(
    watcher: &mut dyn ConfirmationWatcher,
    window: Duration,
) -> Result<Confirmation, LockError> {
    match tokio::time::timeout(window, watcher.confirmed()).await {
        Ok(result) => result,
        Err(_) => {
            warn!(?window, "payment confirmation timed out");
            Err(LockError::PaymentTimedOut(window))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_payment_target() {
        assert_eq!(
            "alice@getalby.com".parse::<PaymentTarget>().unwrap(),
            PaymentTarget::Address("alice@getalby.com".to_string())
        );
        assert_eq!(
            "lightning:LNBC2500U1PVJLUEZ".parse::<PaymentTarget>().unwrap(),
            PaymentTarget::Invoice("lnbc2500u1pvjluez".to_string())
        );
        assert_matches!(
            "".parse::<PaymentTarget>(),
            Err(LockError::PaymentTarget(_))
        );
        assert_matches!(
            "bitcoin:bc1q".parse::<PaymentTarget>(),
            Err(LockError::PaymentTarget(_))
        );
    }

    #[test]
    fn test_shrink_is_proportional() {
        // 990 quoted at 1012 against 1000 available.
        assert_eq!(shrink(990, 1_000, 1_012), 977);
    }

    #[test]
    fn test_shrink_strictly_decreases() {
        // A total barely above the budget would round back to the same amount.
        assert_eq!(shrink(100, 1_000, 1_001), 98);
        assert_eq!(shrink(1, 10, 11), 0);
        for amount in 1..200u64 {
            for total in 101..300u64 {
                assert!(shrink(amount, 100, total) < amount);
            }
        }
    }

    struct NeverConfirms;

    #[async_trait]
    impl ConfirmationWatcher for NeverConfirms {
        async fn confirmed(&mut self) -> Result<Confirmation, LockError> {
            std::future::pending().await
        }
    }

    struct Fails;

    #[async_trait]
    impl ConfirmationWatcher for Fails {
        async fn confirmed(&mut self) -> Result<Confirmation, LockError> {
            Err(LockError::PaymentFailed("route not found".to_string()))
        }
    }

    #[tokio::test]
    async fn test_confirmation_timeout_is_distinct_from_failure() {
        let window = Duration::from_millis(20);
        assert_matches!(
            await_confirmation(&mut NeverConfirms, window).await,
            Err(LockError::PaymentTimedOut(w)) if w == window
        );
        assert_matches!(
            await_confirmation(&mut Fails, window).await,
            Err(LockError::PaymentFailed(_))
        );
    }
}
