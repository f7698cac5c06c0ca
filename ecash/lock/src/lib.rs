// Copyright (c) 2024 The Botho Foundation

#![deny(unsafe_code)]

//! Pay-to-public-key locked ecash.
//!
//! This crate decides who may spend a locked proof and when, collects and
//! verifies the signatures that authorize it, repairs tokens whose proofs were
//! partly spent elsewhere, locks plain proofs through a mint swap, and fits a
//! lightning payment into a token's value despite fees only known after
//! quoting.
//!
//! The mint, signer backends and payment targets sit behind traits
//! ([`MintBoundary`], [`Signer`], [`PaymentResolver`]). All state lives in a
//! caller-owned [`WalletSession`].

pub mod authorization;
pub mod builder;
pub mod error;
pub mod fee;
pub mod melt;
pub mod mint;
pub mod proof;
pub mod reconcile;
pub mod secret;
pub mod session;
pub mod signer;
pub mod token;
pub mod witness;

pub use authorization::{
    active_signers, active_signers_for_proof, verify_witness, ActiveSigners, AuthorizationPhase,
};
pub use builder::{LockPolicy, LockedToken, TokenBuilder};
pub use error::LockError;
pub use fee::{CachedFeeRate, FeePolicy, FEE_RATE_ESTIMATE_PPM, MIN_FEE_FLOOR};
pub use melt::{
    await_confirmation, AmountRange, Confirmation, ConfirmationWatcher, MeltNegotiator,
    Negotiated, PaymentResolver, PaymentTarget, Settlement, MAX_NEGOTIATION_ROUNDS,
    PAYMENT_CONFIRMATION_WINDOW, SAFETY_MARGIN,
};
pub use mint::{
    ensure_scope, MeltOutcome, MeltQuote, MintBoundary, MintQuote, OutputRequest, Quote,
    QuoteRequest, QuoteState, SpendState,
};
pub use proof::{total_amount, unix_time, CurrencyUnit, MintUrl, Proof, Secret, Token, Witness};
pub use reconcile::{dedup_by_secret, Partition, ProofReconciler, Reconciliation};
pub use secret::{LockTags, LockTemplate, LockingCondition, SecretCodec, SigFlag};
pub use session::{Clock, WalletSession};
pub use signer::{
    Capability, CustodialSigner, ExternalSchnorrBackend, ExternalSigner, ManualKeySigner,
    SignOutcome, Signer, Unavailable,
};
pub use witness::{collect_witness, witness_token, OfferOutcome, QuorumStatus, WitnessCollector};

pub use bth_crypto_p2pk::{P2pkKeypair, PublicKey, Signature};
