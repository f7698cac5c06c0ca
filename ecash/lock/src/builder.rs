// Copyright (c) 2024 The Botho Foundation

//! Swap unlocked proofs into locked ones, and locked ones back out.

use bth_crypto_p2pk::PublicKey;
use tracing::{debug, info};

use crate::{
    error::LockError,
    mint::{ensure_scope, MintBoundary, OutputRequest},
    proof::{total_amount, Proof, Token},
    secret::{LockTags, LockTemplate, SigFlag},
};

/// Who may spend the locked output, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    /// Lock keys, primary first. Must not be empty.
    pub lock_keys: Vec<PublicKey>,
    pub required_lock_signatures: u64,
    pub refund_keys: Vec<PublicKey>,
    pub required_refund_signatures: u64,
    /// Unix seconds after which refund keys take over.
    pub locktime: Option<u64>,
    /// Value to lock. `None` locks everything after fees.
    pub amount: Option<u64>,
    /// Blind every key towards the mint before locking.
    pub blind_keys: bool,
}

impl LockPolicy {
    /// Lock everything to a single key.
    pub fn to_key(key: PublicKey) -> Self {
        Self {
            lock_keys: vec![key],
            required_lock_signatures: 1,
            refund_keys: Vec::new(),
            required_refund_signatures: 1,
            locktime: None,
            amount: None,
            blind_keys: false,
        }
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_refund(mut self, locktime: u64, refund_keys: Vec<PublicKey>) -> Self {
        self.locktime = Some(locktime);
        self.refund_keys = refund_keys;
        self
    }

    /// Build the locking template, blinding keys through `mint` if asked.
    pub fn template(&self, mint: &dyn MintBoundary) -> Result<LockTemplate, LockError> {
        let blind = |keys: &[PublicKey]| -> Result<Vec<PublicKey>, LockError> {
            if self.blind_keys {
                keys.iter().map(|key| mint.blind_key(key)).collect()
            } else {
                Ok(keys.to_vec())
            }
        };

        let mut lock_keys = blind(&self.lock_keys)?.into_iter();
        let primary_key = lock_keys
            .next()
            .ok_or_else(|| LockError::MalformedSecret("lock policy has no lock key".to_string()))?;

        LockTemplate::new(
            primary_key,
            LockTags {
                locktime: self.locktime,
                additional_lock_keys: lock_keys.collect(),
                required_lock_signatures: self.required_lock_signatures,
                refund_keys: blind(&self.refund_keys)?,
                required_refund_signatures: self.required_refund_signatures,
                sig_flag: SigFlag::SigInputs,
            },
        )
    }
}

/// A freshly locked token and the plain remainder, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedToken {
    pub token: Token,
    pub change: Option<Token>,
}

/// Builds locked tokens through a mint swap.
pub struct TokenBuilder<'a> {
    mint: &'a dyn MintBoundary,
}

impl<'a> TokenBuilder<'a> {
    pub fn new(mint: &'a dyn MintBoundary) -> Self {
        Self { mint }
    }

    /// Swap `source` into proofs locked by `policy`.
    ///
    /// The whole input is swapped: the locked amount plus a plain remainder
    /// (if any) plus the mint's input fee equals the source value.
    pub async fn lock(&self, source: &Token, policy: &LockPolicy) -> Result<LockedToken, LockError> {
        ensure_scope(self.mint, source)?;
        let total = total_amount(&source.proofs)?;
        let fee = self.mint.input_fee(&source.proofs);
        let available = total.saturating_sub(fee);
        let amount = policy.amount.unwrap_or(available);

        if amount == 0 || amount > available {
            return Err(LockError::InsufficientValue {
                needed: amount.saturating_add(fee).max(1),
                available: total,
            });
        }

        let template = policy.template(self.mint)?;
        let remainder = available - amount;
        let mut outputs = vec![OutputRequest::locked(amount, template)];
        if remainder > 0 {
            outputs.push(OutputRequest::plain(remainder));
        }

        debug!(amount, remainder, fee, "swapping into locked proofs");
        let mut groups = self.mint.split_or_swap(&source.proofs, &outputs).await?.into_iter();
        let locked = groups
            .next()
            .ok_or_else(|| LockError::MintRequest("swap returned no outputs".to_string()))?;
        let change = groups.next().filter(|proofs| !proofs.is_empty());

        info!(amount, proofs = locked.len(), "locked token created");
        Ok(LockedToken {
            token: Token {
                mint_url: source.mint_url.clone(),
                unit: source.unit.clone(),
                proofs: locked,
                memo: source.memo.clone(),
            },
            change: change.map(|proofs| source.with_proofs(proofs)),
        })
    }

    /// Redeem a witnessed token into fresh plain proofs.
    pub async fn unlock(&self, token: &Token) -> Result<Vec<Proof>, LockError> {
        ensure_scope(self.mint, token)?;
        let total = total_amount(&token.proofs)?;
        let fee = self.mint.input_fee(&token.proofs);
        if total <= fee {
            return Err(LockError::InsufficientValue {
                needed: fee + 1,
                available: total,
            });
        }

        let outputs = [OutputRequest::plain(total - fee)];
        let proofs: Vec<Proof> = self
            .mint
            .split_or_swap(&token.proofs, &outputs)
            .await?
            .into_iter()
            .flatten()
            .collect();
        info!(amount = total - fee, fee, "redeemed token");
        Ok(proofs)
    }
}
