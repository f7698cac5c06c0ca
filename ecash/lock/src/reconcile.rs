// Copyright (c) 2024 The Botho Foundation

//! Repair a token by dropping proofs the mint has already seen spent.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::{
    error::LockError,
    mint::{ensure_scope, MintBoundary, SpendState},
    proof::{Proof, Token},
};

/// Proofs split by spend state. Pending proofs count as spent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub unspent: Vec<Proof>,
    pub spent: Vec<Proof>,
}

/// Outcome of reconciling a token against the mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Every proof is unspent.
    Unchanged(Token),
    /// Some proofs were dropped. `removed` lists them.
    Repaired { token: Token, removed: Vec<Proof> },
}

impl Reconciliation {
    pub fn token(&self) -> &Token {
        match self {
            Reconciliation::Unchanged(token) => token,
            Reconciliation::Repaired { token, .. } => token,
        }
    }

    pub fn into_token(self) -> Token {
        match self {
            Reconciliation::Unchanged(token) => token,
            Reconciliation::Repaired { token, .. } => token,
        }
    }
}

/// Keep the first occurrence of each secret.
pub fn dedup_by_secret(proofs: &[Proof]) -> Vec<Proof> {
    let mut seen = HashSet::with_capacity(proofs.len());
    proofs
        .iter()
        .filter(|proof| seen.insert(&proof.secret))
        .cloned()
        .collect()
}

/// Checks tokens against one mint.
pub struct ProofReconciler<'a> {
    mint: &'a dyn MintBoundary,
}

impl<'a> ProofReconciler<'a> {
    pub fn new(mint: &'a dyn MintBoundary) -> Self {
        Self { mint }
    }

    /// Partition `proofs` by their spend state. Duplicate secrets are
    /// collapsed before asking the mint.
    pub async fn partition(&self, proofs: &[Proof]) -> Result<Partition, LockError> {
        let unique = dedup_by_secret(proofs);
        if unique.is_empty() {
            return Ok(Partition::default());
        }

        let states = self.mint.check_state(&unique).await?;
        if states.len() != unique.len() {
            return Err(LockError::MintRequest(format!(
                "mint returned {} states for {} proofs",
                states.len(),
                unique.len()
            )));
        }

        let mut partition = Partition::default();
        for (proof, state) in unique.into_iter().zip(states) {
            match state {
                SpendState::Unspent => partition.unspent.push(proof),
                SpendState::Pending => {
                    warn!(amount = proof.amount, "proof is pending at the mint, treating as spent");
                    partition.spent.push(proof);
                }
                SpendState::Spent => partition.spent.push(proof),
            }
        }
        Ok(partition)
    }

    /// Drop spent and duplicate proofs from `token`.
    ///
    /// Fails with [`LockError::AllProofsSpent`] when nothing remains.
    pub async fn reconcile(&self, token: &Token) -> Result<Reconciliation, LockError> {
        ensure_scope(self.mint, token)?;
        let partition = self.partition(&token.proofs).await?;

        if partition.unspent.is_empty() {
            info!(proofs = token.proofs.len(), "every proof in token is spent");
            return Err(LockError::AllProofsSpent);
        }
        if partition.unspent.len() == token.proofs.len() {
            debug!(proofs = token.proofs.len(), "token is intact");
            return Ok(Reconciliation::Unchanged(token.clone()));
        }

        let kept: HashSet<_> = partition.unspent.iter().map(|p| &p.secret).collect();
        info!(
            kept = partition.unspent.len(),
            dropped = token.proofs.len() - partition.unspent.len(),
            "repaired token"
        );
        // Duplicates of kept secrets are dropped as well; list every removed entry.
        let mut first_seen = HashSet::new();
        let removed = token
            .proofs
            .iter()
            .filter(|p| !(kept.contains(&p.secret) && first_seen.insert(&p.secret)))
            .cloned()
            .collect();

        Ok(Reconciliation::Repaired {
            token: token.with_proofs(partition.unspent),
            removed,
        })
    }
}
