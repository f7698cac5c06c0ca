// Copyright (c) 2024 The Botho Foundation

#![deny(unsafe_code)]

//! Secp256k1 key support for pay-to-public-key locked ecash.
//!
//! This crate provides the primitives the ecash lock engine treats as an
//! external library:
//!
//! - compressed secp256k1 public keys with hex serde
//! - BIP340 Schnorr signatures over a proof secret
//! - additive key blinding (`P + t·G`, `s + t`)
//! - BIP32 lock-key derivation from a BIP39 mnemonic
//! - the Cashu hash-to-curve map and the BDHKE blind/unblind steps
//!
//! # Examples
//!
//! ```
//! use bth_crypto_p2pk::P2pkKeypair;
//!
//! let keypair = P2pkKeypair::generate();
//! let signature = keypair.sign(b"[\"P2PK\",{...}]").unwrap();
//! assert!(keypair.public_key().verify(b"[\"P2PK\",{...}]", &signature).is_ok());
//! ```

mod dhke;
mod keys;

pub use dhke::{
    blind_message, hash_to_curve, sign_blinded, unblind_signature, verify_unblinded,
    BlindingFactor,
};
pub use keys::{BlindingTweak, P2pkKeypair, PublicKey, Signature};

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid mnemonic phrase")]
    InvalidMnemonic,

    #[error("Key derivation failed: {0}")]
    DerivationError(String),

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Invalid signature encoding")]
    InvalidSignatureEncoding,

    #[error("Signature does not verify")]
    InvalidSignature,

    #[error("Signing failed: {0}")]
    SigningError(String),

    #[error("No curve point found for message")]
    HashToCurveExhausted,
}
