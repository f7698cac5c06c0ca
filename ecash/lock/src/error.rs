// Copyright (c) 2024 The Botho Foundation

//! Error taxonomy for the lock engine.
//!
//! Every failure path in this crate maps to exactly one variant. Per-signer
//! failures are recovered inside the witness collector and only surface as
//! [`LockError::Unsatisfiable`] once no path to quorum remains.

use std::time::Duration;

/// Lock engine error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The secret looks like a locking condition but is not a valid one.
    #[error("Malformed secret: {0}")]
    MalformedSecret(String),

    /// The locking condition asks for a signature flag this engine refuses.
    #[error("Unsupported signature flag: {0}")]
    UnsupportedSigFlag(String),

    /// Quorum cannot be reached with the signers that were tried.
    #[error("Quorum unreachable: {verified} of {required} required signatures collected")]
    Unsatisfiable { verified: usize, required: u64 },

    /// A witness signature did not verify against any authorized key.
    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    /// Every proof of the token has already been redeemed at the mint.
    #[error("All proofs in the token are already spent")]
    AllProofsSpent,

    /// The operation targets a different mint than the boundary serves.
    #[error("Mint mismatch: expected {expected}, got {actual}")]
    MintMismatch { expected: String, actual: String },

    /// The operation targets a different unit than the boundary serves.
    #[error("Unit mismatch: expected {expected}, got {actual}")]
    UnitMismatch { expected: String, actual: String },

    /// Not enough value to cover the requested amount plus fees.
    #[error("Insufficient value: need {needed}, have {available}")]
    InsufficientValue { needed: u64, available: u64 },

    /// The fee fitting loop hit its round cap without a fitting quote.
    #[error("Fee negotiation did not converge after {rounds} rounds")]
    NegotiationDidNotConverge { rounds: u32 },

    /// No payment confirmation arrived inside the confirmation window.
    #[error("Payment confirmation timed out after {0:?}")]
    PaymentTimedOut(Duration),

    /// The mint reported the payment as failed.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// The bearer token string could not be decoded.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// A key or signature could not be parsed or used.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Network or protocol failure talking to the mint.
    #[error("Mint request failed: {0}")]
    MintRequest(String),

    /// The payment target could not be resolved or refused an invoice.
    #[error("Payment target error: {0}")]
    PaymentTarget(String),
}

impl From<bth_crypto_p2pk::Error> for LockError {
    fn from(err: bth_crypto_p2pk::Error) -> Self {
        LockError::InvalidKey(err.to_string())
    }
}
