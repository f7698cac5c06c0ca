// Copyright (c) 2024 The Botho Foundation

//! Which keys may authorize a locked proof at a given instant.

use std::collections::HashSet;

use bth_crypto_p2pk::PublicKey;
use tracing::trace;

use crate::{error::LockError, proof::Proof, secret::LockingCondition};

/// Which spending path is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationPhase {
    /// Plain secret, anyone holding the proof may spend it.
    Unlocked,
    /// Before the locktime (or no locktime): lock keys sign.
    Lock,
    /// Locktime passed and refund keys exist.
    Refund,
    /// Locktime passed with no refund keys. No signature is required.
    Expired,
}

/// Keys currently able to authorize a proof, and how many must sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSigners {
    pub phase: AuthorizationPhase,
    pub keys: Vec<PublicKey>,
    pub quorum: u64,
}

impl ActiveSigners {
    pub fn unlocked() -> Self {
        Self {
            phase: AuthorizationPhase::Unlocked,
            keys: Vec::new(),
            quorum: 0,
        }
    }

    /// True when no signature is needed to spend.
    pub fn is_open(&self) -> bool {
        self.quorum == 0
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys.contains(key)
    }

    /// More signatures required than keys exist to give them.
    pub fn is_unreachable(&self) -> bool {
        self.quorum > self.keys.len() as u64
    }
}

/// Resolve the active signer set of a condition at `now` (unix seconds).
///
/// The lock path applies while `now` is strictly before the locktime. From
/// the locktime onward the refund keys apply, or nobody if there are none.
pub fn active_signers(condition: &LockingCondition, now: u64) -> ActiveSigners {
    let tags = &condition.tags;
    let expired = tags.locktime.is_some_and(|locktime| now >= locktime);

    if !expired {
        return ActiveSigners {
            phase: AuthorizationPhase::Lock,
            keys: condition.template().lock_keys(),
            quorum: tags.required_lock_signatures,
        };
    }

    if tags.refund_keys.is_empty() {
        ActiveSigners {
            phase: AuthorizationPhase::Expired,
            keys: Vec::new(),
            quorum: 0,
        }
    } else {
        ActiveSigners {
            phase: AuthorizationPhase::Refund,
            keys: tags.refund_keys.clone(),
            quorum: tags.required_refund_signatures,
        }
    }
}

/// Active signers for any proof. Plain proofs are unlocked.
pub fn active_signers_for_proof(proof: &Proof, now: u64) -> Result<ActiveSigners, LockError> {
    Ok(match proof.secret.locking_condition()? {
        Some(condition) => active_signers(&condition, now),
        None => ActiveSigners::unlocked(),
    })
}

/// Distinct active keys that have a valid signature in the proof's witness.
pub fn verified_signers(proof: &Proof, active: &ActiveSigners) -> Vec<PublicKey> {
    let Some(witness) = &proof.witness else {
        return Vec::new();
    };

    let message = proof.secret.as_bytes();
    let mut verified = Vec::new();
    let mut counted = HashSet::new();
    for signature in witness.parsed_signatures() {
        let signer = active
            .keys
            .iter()
            .find(|key| !counted.contains(*key) && key.verify(message, &signature).is_ok());
        if let Some(key) = signer {
            counted.insert(*key);
            verified.push(*key);
        }
    }
    verified
}

/// Check that a proof carries enough valid signatures to be spent at `now`.
pub fn verify_witness(proof: &Proof, now: u64) -> Result<(), LockError> {
    let active = active_signers_for_proof(proof, now)?;
    if active.is_open() {
        return Ok(());
    }
    if proof.witness.is_none() {
        return Err(LockError::SignatureRejected(
            "locked proof has no witness".to_string(),
        ));
    }

    let verified = verified_signers(proof, &active).len() as u64;
    trace!(
        verified,
        quorum = active.quorum,
        phase = ?active.phase,
        "verified witness signatures"
    );
    if verified < active.quorum {
        return Err(LockError::SignatureRejected(format!(
            "{verified} valid signatures, {} required",
            active.quorum
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        proof::{Secret, Witness},
        secret::{LockTags, LockTemplate},
    };
    use bth_crypto_p2pk::P2pkKeypair;

    const LOCKTIME: u64 = 1_000;

    fn condition(locktime: Option<u64>, refund: Vec<PublicKey>) -> LockingCondition {
        LockTemplate::new(
            P2pkKeypair::generate().public_key(),
            LockTags {
                locktime,
                refund_keys: refund,
                ..Default::default()
            },
        )
        .unwrap()
        .instantiate()
    }

    fn locked_proof(condition: &LockingCondition) -> Proof {
        Proof {
            amount: 4,
            keyset_id: "00ad268c4d1f5826".to_string(),
            secret: condition.to_secret().unwrap(),
            c: String::new(),
            witness: None,
        }
    }

    #[test]
    fn test_lock_path_before_locktime() {
        let refund = P2pkKeypair::generate().public_key();
        let c = condition(Some(LOCKTIME), vec![refund]);
        let active = active_signers(&c, LOCKTIME - 1);
        assert_eq!(active.phase, AuthorizationPhase::Lock);
        assert_eq!(active.keys, vec![c.primary_key]);
        assert_eq!(active.quorum, 1);
    }

    #[test]
    fn test_refund_path_from_locktime() {
        let refund = P2pkKeypair::generate().public_key();
        let c = condition(Some(LOCKTIME), vec![refund]);
        let active = active_signers(&c, LOCKTIME);
        assert_eq!(active.phase, AuthorizationPhase::Refund);
        assert_eq!(active.keys, vec![refund]);
        assert!(!active.contains(&c.primary_key));
    }

    #[test]
    fn test_expired_without_refund_is_open() {
        let c = condition(Some(LOCKTIME), vec![]);
        let active = active_signers(&c, LOCKTIME + 1);
        assert_eq!(active.phase, AuthorizationPhase::Expired);
        assert!(active.keys.is_empty());
        assert!(active.is_open());
    }

    #[test]
    fn test_no_locktime_stays_locked() {
        let c = condition(None, vec![]);
        assert_eq!(active_signers(&c, u64::MAX).phase, AuthorizationPhase::Lock);
    }

    #[test]
    fn test_plain_proof_is_unlocked() {
        let proof = Proof {
            amount: 1,
            keyset_id: "00".to_string(),
            secret: Secret::random(),
            c: String::new(),
            witness: None,
        };
        assert_eq!(
            active_signers_for_proof(&proof, 0).unwrap(),
            ActiveSigners::unlocked()
        );
        assert!(verify_witness(&proof, 0).is_ok());
    }

    #[test]
    fn test_verify_witness() {
        let owner = P2pkKeypair::generate();
        let c = LockTemplate::single_key(owner.public_key()).instantiate();
        let proof = locked_proof(&c);

        assert!(matches!(
            verify_witness(&proof, 0),
            Err(LockError::SignatureRejected(_))
        ));

        let signature = owner.sign(proof.secret.as_bytes()).unwrap();
        let signed = proof.with_witness(Witness::from_signatures([&signature]));
        assert!(verify_witness(&signed, 0).is_ok());

        let stranger = P2pkKeypair::generate();
        let forged = proof.with_witness(Witness::from_signatures([&stranger
            .sign(proof.secret.as_bytes())
            .unwrap()]));
        assert!(verify_witness(&forged, 0).is_err());
    }

    #[test]
    fn test_repeated_signature_counts_once() {
        let a = P2pkKeypair::generate();
        let b = P2pkKeypair::generate();
        let template = LockTemplate::new(
            a.public_key(),
            LockTags {
                additional_lock_keys: vec![b.public_key()],
                required_lock_signatures: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let proof = locked_proof(&template.instantiate());
        let sig = a.sign(proof.secret.as_bytes()).unwrap();

        let doubled = proof.with_witness(Witness::from_signatures([&sig, &sig]));
        assert!(verify_witness(&doubled, 0).is_err());

        let sig_b = b.sign(proof.secret.as_bytes()).unwrap();
        let both = proof.with_witness(Witness::from_signatures([&sig, &sig_b]));
        assert!(verify_witness(&both, 0).is_ok());
    }
}
