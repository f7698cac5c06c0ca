// Copyright (c) 2024 The Botho Foundation

//! Incremental witness collection for one locked proof.
//!
//! Signatures are offered one backend at a time. Each signature is verified
//! against the active signer set before it counts, and each authorized key
//! counts at most once, so quorum is reached only by distinct valid signers.

use std::collections::BTreeSet;

use bth_crypto_p2pk::{PublicKey, Signature};
use tracing::{debug, warn};

use crate::{
    authorization::{active_signers_for_proof, ActiveSigners},
    error::LockError,
    proof::{Proof, Token, Witness},
    signer::{SignOutcome, Signer},
};

/// What happened to one offered signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Verified against a new authorized key.
    Accepted(PublicKey),
    /// Verified, but that key already counted.
    Duplicate(PublicKey),
    /// Did not verify against any authorized key. Discarded.
    Rejected,
    /// The backend produced nothing.
    Skipped,
}

/// Progress towards quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuorumStatus {
    Satisfied,
    Pending { verified: usize, required: u64 },
    /// More signatures are required than authorized keys exist.
    Unsatisfiable { available: usize, required: u64 },
}

/// Collects signatures for a single proof.
#[derive(Debug, Clone)]
pub struct WitnessCollector {
    proof: Proof,
    active: ActiveSigners,
    signatures: Vec<Signature>,
    verified: BTreeSet<PublicKey>,
}

impl WitnessCollector {
    /// Start collecting for `proof` at `now`. Valid signatures already in
    /// the proof's witness are kept and counted.
    pub fn new(proof: Proof, now: u64) -> Result<Self, LockError> {
        let active = active_signers_for_proof(&proof, now)?;

        let mut collector = Self {
            proof: proof.stripped(),
            active,
            signatures: Vec::new(),
            verified: BTreeSet::new(),
        };
        for signature in proof.witness.iter().flat_map(Witness::parsed_signatures) {
            collector.add_signature(signature);
        }
        Ok(collector)
    }

    pub fn active_signers(&self) -> &ActiveSigners {
        &self.active
    }

    /// Authorized keys that have not signed yet.
    pub fn remaining_keys(&self) -> Vec<PublicKey> {
        self.active
            .keys
            .iter()
            .filter(|key| !self.verified.contains(key))
            .copied()
            .collect()
    }

    /// Ask one backend for a signature over this proof's secret.
    ///
    /// The backend only sees keys that have not signed yet, so a backend
    /// holding several authorized keys answers with a fresh one each time.
    pub async fn offer(&mut self, signer: &dyn Signer) -> OfferOutcome {
        let message = self.proof.secret.as_bytes().to_vec();
        let remaining = self.remaining_keys();
        match signer.try_sign(&message, &remaining).await {
            SignOutcome::Signed(signature) => {
                let outcome = self.add_signature(signature);
                debug!(signer = signer.name(), ?outcome, "offered witness signature");
                outcome
            }
            SignOutcome::Unavailable(reason) => {
                debug!(signer = signer.name(), %reason, "signer unavailable");
                OfferOutcome::Skipped
            }
        }
    }

    /// Offer `signer` until it stops adding new keys or quorum is reached.
    /// Returns how many signatures it contributed.
    pub async fn offer_all(&mut self, signer: &dyn Signer) -> usize {
        let mut accepted = 0;
        while !self.is_satisfied() {
            match self.offer(signer).await {
                OfferOutcome::Accepted(_) => accepted += 1,
                _ => break,
            }
        }
        accepted
    }

    /// Verify and record a signature produced elsewhere.
    pub fn add_signature(&mut self, signature: Signature) -> OfferOutcome {
        let message = self.proof.secret.as_bytes();
        let Some(key) = self
            .active
            .keys
            .iter()
            .find(|key| key.verify(message, &signature).is_ok())
            .copied()
        else {
            warn!("discarding witness signature that matches no authorized key");
            return OfferOutcome::Rejected;
        };

        if !self.verified.insert(key) {
            return OfferOutcome::Duplicate(key);
        }
        self.signatures.push(signature);
        OfferOutcome::Accepted(key)
    }

    pub fn status(&self) -> QuorumStatus {
        let verified = self.verified.len();
        if verified as u64 >= self.active.quorum {
            QuorumStatus::Satisfied
        } else if self.active.is_unreachable() {
            QuorumStatus::Unsatisfiable {
                available: self.active.keys.len(),
                required: self.active.quorum,
            }
        } else {
            QuorumStatus::Pending {
                verified,
                required: self.active.quorum,
            }
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.status() == QuorumStatus::Satisfied
    }

    pub fn verified_signers(&self) -> impl Iterator<Item = &PublicKey> {
        self.verified.iter()
    }

    /// The proof with every accepted signature attached.
    ///
    /// Proofs that need no signature come back without a witness.
    pub fn witnessed_proof(&self) -> Proof {
        if self.signatures.is_empty() {
            return self.proof.clone();
        }
        self.proof
            .with_witness(Witness::from_signatures(self.signatures.iter()))
    }

    /// Finish collection. Fails unless quorum is reached.
    pub fn finish(self) -> Result<Proof, LockError> {
        if !self.is_satisfied() {
            return Err(LockError::Unsatisfiable {
                verified: self.verified.len(),
                required: self.active.quorum,
            });
        }
        Ok(self.witnessed_proof())
    }
}

/// Offer each signer in turn until the proof is satisfied.
pub async fn collect_witness(
    proof: Proof,
    signers: &[&dyn Signer],
    now: u64,
) -> Result<Proof, LockError> {
    let mut collector = WitnessCollector::new(proof, now)?;
    for signer in signers {
        if collector.is_satisfied() {
            break;
        }
        if let QuorumStatus::Unsatisfiable { .. } = collector.status() {
            break;
        }
        collector.offer_all(*signer).await;
    }
    collector.finish()
}

/// Witness every proof of a token. Plain proofs pass through unchanged.
pub async fn witness_token(
    token: &Token,
    signers: &[&dyn Signer],
    now: u64,
) -> Result<Token, LockError> {
    let mut proofs = Vec::with_capacity(token.proofs.len());
    for proof in &token.proofs {
        proofs.push(collect_witness(proof.clone(), signers, now).await?);
    }
    Ok(token.with_proofs(proofs))
}
