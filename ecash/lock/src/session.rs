// Copyright (c) 2024 The Botho Foundation

//! Caller-owned context threaded through every engine operation.
//!
//! A session binds one mint boundary, an ordered list of signer backends and
//! the melt fee policy. The engine keeps no state of its own; dropping a
//! session abandons whatever it was doing.

use std::sync::Arc;

use tracing::debug;

use crate::{
    authorization::verify_witness,
    builder::{LockPolicy, LockedToken, TokenBuilder},
    error::LockError,
    fee::{CachedFeeRate, FeePolicy},
    melt::{MeltNegotiator, Negotiated, PaymentResolver, PaymentTarget, Settlement},
    mint::{MeltQuote, MintBoundary},
    proof::{unix_time, Proof, Token},
    reconcile::{ProofReconciler, Reconciliation},
    signer::Signer,
    witness::witness_token,
};

/// Source of the current time for authorization decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    /// Frozen at this unix time.
    Fixed(u64),
}

impl Clock {
    pub fn now(&self) -> u64 {
        match self {
            Clock::System => unix_time(),
            Clock::Fixed(now) => *now,
        }
    }
}

/// Everything one wallet needs to talk to one mint.
pub struct WalletSession {
    mint: Arc<dyn MintBoundary>,
    signers: Vec<Arc<dyn Signer>>,
    fee_policy: FeePolicy,
    observed_fees: CachedFeeRate,
    max_rounds: u32,
    clock: Clock,
}

impl WalletSession {
    pub fn new(mint: Arc<dyn MintBoundary>) -> Self {
        Self {
            mint,
            signers: Vec::new(),
            fee_policy: FeePolicy::default(),
            observed_fees: CachedFeeRate::default(),
            max_rounds: crate::melt::MAX_NEGOTIATION_ROUNDS,
            clock: Clock::System,
        }
    }

    /// Append a signer. Signers are tried in the order they were added.
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn with_fee_policy(mut self, fee_policy: FeePolicy) -> Self {
        self.fee_policy = fee_policy;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn mint(&self) -> &dyn MintBoundary {
        self.mint.as_ref()
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn signer_refs(&self) -> Vec<&dyn Signer> {
        self.signers.iter().map(|s| s.as_ref()).collect()
    }

    /// Current fee policy, adjusted by recently observed quotes.
    pub fn fee_policy(&self) -> FeePolicy {
        self.observed_fees.apply(self.fee_policy)
    }

    pub async fn reconcile(&self, token: &Token) -> Result<Reconciliation, LockError> {
        ProofReconciler::new(self.mint()).reconcile(token).await
    }

    pub async fn lock(&self, source: &Token, policy: &LockPolicy) -> Result<LockedToken, LockError> {
        TokenBuilder::new(self.mint()).lock(source, policy).await
    }

    /// Collect witnesses for every locked proof using the session's signers.
    pub async fn witness(&self, token: &Token) -> Result<Token, LockError> {
        witness_token(token, &self.signer_refs(), self.now()).await
    }

    /// Witness, check, and swap `token` into fresh plain proofs.
    pub async fn redeem(&self, token: &Token) -> Result<Vec<Proof>, LockError> {
        let witnessed = self.witness(token).await?;
        let now = self.now();
        for proof in &witnessed.proofs {
            verify_witness(proof, now)?;
        }
        TokenBuilder::new(self.mint()).unlock(&witnessed).await
    }

    fn negotiator<'a>(&'a self, resolver: Option<&'a dyn PaymentResolver>) -> MeltNegotiator<'a> {
        let negotiator = MeltNegotiator::new(self.mint())
            .with_fee_policy(self.fee_policy())
            .with_max_rounds(self.max_rounds);
        match resolver {
            Some(resolver) => negotiator.with_resolver(resolver),
            None => negotiator,
        }
    }

    pub async fn negotiate(
        &mut self,
        token: &Token,
        target: &PaymentTarget,
        resolver: Option<&dyn PaymentResolver>,
    ) -> Result<Negotiated, LockError> {
        let negotiated = self.negotiator(resolver).negotiate(token, target).await?;
        self.observed_fees.observe(&negotiated.quote);
        debug!(rate = ?self.observed_fees.rate(), "updated observed melt fee rate");
        Ok(negotiated)
    }

    pub async fn settle(&self, token: &Token, quote: &MeltQuote) -> Result<Settlement, LockError> {
        self.negotiator(None).settle(token, quote).await
    }

    /// Witness `token`, fit a quote for `target`, and pay it.
    pub async fn melt(
        &mut self,
        token: &Token,
        target: &PaymentTarget,
        resolver: Option<&dyn PaymentResolver>,
    ) -> Result<(Negotiated, Settlement), LockError> {
        let witnessed = self.witness(token).await?;
        let negotiated = self.negotiate(&witnessed, target, resolver).await?;
        let settlement = self.settle(&witnessed, &negotiated.quote).await?;
        Ok((negotiated, settlement))
    }
}
