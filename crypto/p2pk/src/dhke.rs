// Copyright (c) 2024 The Botho Foundation

//! Blind Diffie-Hellman key exchange (BDHKE) as used by Cashu mints.
//!
//! Wallet side: `B_ = Y + r·G` where `Y = hash_to_curve(secret)`, then
//! `C = C_ - r·K` once the mint returns `C_ = k·B_`.
//! Mint side: `C_ = k·B_`, and a proof verifies when `C == k·Y`.

use k256::{NonZeroScalar, ProjectivePoint, SecretKey};
use rand_core::OsRng;
use sha2::{Digest, Sha256};

use crate::{Error, P2pkKeypair, PublicKey};

const DOMAIN_SEPARATOR: &[u8] = b"Secp256k1_HashToCurve_Cashu_";

/// Upper bound on hash-to-curve attempts.
const MAX_HASH_TO_CURVE_ATTEMPTS: u32 = 1 << 16;

/// Blinding factor `r` for one blinded message.
#[derive(Clone)]
pub struct BlindingFactor(NonZeroScalar);

impl BlindingFactor {
    pub fn random() -> Self {
        Self(SecretKey::random(&mut OsRng).to_nonzero_scalar())
    }
}

/// Deterministically map a message onto a curve point.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, Error> {
    let msg_hash: [u8; 32] = Sha256::new()
        .chain_update(DOMAIN_SEPARATOR)
        .chain_update(message)
        .finalize()
        .into();

    for counter in 0..MAX_HASH_TO_CURVE_ATTEMPTS {
        let candidate: [u8; 32] = Sha256::new()
            .chain_update(msg_hash)
            .chain_update(counter.to_le_bytes())
            .finalize()
            .into();

        let mut compressed = [0u8; 33];
        compressed[0] = 0x02;
        compressed[1..].copy_from_slice(&candidate);
        if let Ok(point) = PublicKey::from_slice(&compressed) {
            return Ok(point);
        }
    }

    Err(Error::HashToCurveExhausted)
}

/// Blind a secret for submission to the mint. Returns `B_` and `r`.
pub fn blind_message(
    secret: &[u8],
    factor: Option<BlindingFactor>,
) -> Result<(PublicKey, BlindingFactor), Error> {
    let y = hash_to_curve(secret)?.to_k256()?.to_projective();
    let factor = factor.unwrap_or_else(BlindingFactor::random);
    let blinded = y + ProjectivePoint::GENERATOR * *factor.0;
    Ok((PublicKey::from_projective(blinded)?, factor))
}

/// Remove the blinding from a mint signature: `C = C_ - r·K`.
pub fn unblind_signature(
    blinded_signature: &PublicKey,
    factor: &BlindingFactor,
    mint_key: &PublicKey,
) -> Result<PublicKey, Error> {
    let c_ = blinded_signature.to_k256()?.to_projective();
    let k = mint_key.to_k256()?.to_projective();
    PublicKey::from_projective(c_ - k * *factor.0)
}

/// Mint side: sign a blinded message, `C_ = k·B_`.
pub fn sign_blinded(mint_key: &P2pkKeypair, blinded: &PublicKey) -> Result<PublicKey, Error> {
    let b_ = blinded.to_k256()?.to_projective();
    PublicKey::from_projective(b_ * *mint_key.scalar())
}

/// Mint side: check `C == k·hash_to_curve(secret)`.
pub fn verify_unblinded(
    mint_key: &P2pkKeypair,
    secret: &[u8],
    signature: &PublicKey,
) -> Result<bool, Error> {
    let y = hash_to_curve(secret)?.to_k256()?.to_projective();
    let expected = PublicKey::from_projective(y * *mint_key.scalar())?;
    Ok(&expected == signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_to_curve_vector() {
        let message = [0u8; 32];
        let point = hash_to_curve(&message).unwrap();
        assert_eq!(
            point.to_hex(),
            "024cce997d3b518f739663b757deaec95bcd9473c30a14ac2fd04023a739d1a725"
        );
    }

    #[test]
    fn test_hash_to_curve_is_deterministic() {
        let a = hash_to_curve(b"secret one").unwrap();
        let b = hash_to_curve(b"secret one").unwrap();
        let c = hash_to_curve(b"secret two").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_blind_sign_unblind_verifies() {
        let mint_key = P2pkKeypair::generate();
        let secret = b"407915bc212be61a77e3e6d2aeb4c727980bda51cd06a6afc29e2861768a7837";

        let (blinded, factor) = blind_message(secret, None).unwrap();
        let blinded_signature = sign_blinded(&mint_key, &blinded).unwrap();
        let signature =
            unblind_signature(&blinded_signature, &factor, &mint_key.public_key()).unwrap();

        assert!(verify_unblinded(&mint_key, secret, &signature).unwrap());
        assert!(!verify_unblinded(&mint_key, b"another secret", &signature).unwrap());
    }

    #[test]
    fn test_unblind_with_wrong_mint_key_fails_verification() {
        let mint_key = P2pkKeypair::generate();
        let other_key = P2pkKeypair::generate();
        let secret = b"some secret";

        let (blinded, factor) = blind_message(secret, None).unwrap();
        let blinded_signature = sign_blinded(&mint_key, &blinded).unwrap();
        let signature =
            unblind_signature(&blinded_signature, &factor, &other_key.public_key()).unwrap();

        assert!(!verify_unblinded(&mint_key, secret, &signature).unwrap());
    }
}
