// Copyright (c) 2024 The Botho Foundation

//! Signing backends that can produce witness signatures.
//!
//! Three backends exist:
//!
//! - [`ExternalSigner`]: a key held outside this process (a browser extension,
//!   a hardware device, another app) reached through [`ExternalSchnorrBackend`]
//! - [`CustodialSigner`]: keys derived from the wallet seed
//! - [`ManualKeySigner`]: a raw private key supplied by the user
//!
//! Backends never fail the collection as a whole. A backend that cannot or
//! will not sign answers [`SignOutcome::Unavailable`].

use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;
use bth_crypto_p2pk::{BlindingTweak, P2pkKeypair, PublicKey, Signature};
use tracing::debug;

use crate::proof::MintUrl;

/// What a signer backend is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Produce BIP340 signatures over arbitrary bytes.
    SchnorrSignature,
    /// Sign for keys blinded towards a specific mint.
    BlindedKeys,
}

/// Why a backend did not produce a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The backend lacks the capability this proof needs.
    MissingCapability(Capability),
    /// The backend holds no key that is authorized for this proof.
    NoMatchingKey,
    /// The user or device declined.
    Declined,
    /// The backend failed.
    Backend(String),
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::MissingCapability(capability) => {
                write!(f, "missing capability {capability:?}")
            }
            Unavailable::NoMatchingKey => f.write_str("no matching key"),
            Unavailable::Declined => f.write_str("declined"),
            Unavailable::Backend(reason) => write!(f, "backend error: {reason}"),
        }
    }
}

/// Result of asking a backend to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed(Signature),
    Unavailable(Unavailable),
}

/// A signature-producing backend.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> HashSet<Capability>;

    /// Sign `message` on behalf of one of `authorized_keys`, if possible.
    async fn try_sign(&self, message: &[u8], authorized_keys: &[PublicKey]) -> SignOutcome;
}

/// A Schnorr signer living outside this process.
#[async_trait]
pub trait ExternalSchnorrBackend: Send + Sync {
    /// Public key of the external signer.
    async fn public_key(&self) -> Result<PublicKey, String>;

    /// Sign raw bytes. `Ok(None)` means the user declined.
    async fn sign_schnorr(&self, message: &[u8]) -> Result<Option<Signature>, String>;
}

/// Signer that forwards to an external backend, when one is present.
///
/// External signers only know their plain key, so they cannot answer for
/// keys blinded towards a mint.
#[derive(Clone, Default)]
pub struct ExternalSigner {
    backend: Option<Arc<dyn ExternalSchnorrBackend>>,
}

impl ExternalSigner {
    pub fn new(backend: Arc<dyn ExternalSchnorrBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// No external signer is installed in this environment.
    pub fn absent() -> Self {
        Self { backend: None }
    }
}

#[async_trait]
impl Signer for ExternalSigner {
    fn name(&self) -> &str {
        "external"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        match self.backend {
            Some(_) => HashSet::from([Capability::SchnorrSignature]),
            None => HashSet::new(),
        }
    }

    async fn try_sign(&self, message: &[u8], authorized_keys: &[PublicKey]) -> SignOutcome {
        let Some(backend) = &self.backend else {
            return SignOutcome::Unavailable(Unavailable::MissingCapability(
                Capability::SchnorrSignature,
            ));
        };

        match backend.public_key().await {
            Ok(key) if !authorized_keys.contains(&key) => {
                return SignOutcome::Unavailable(Unavailable::NoMatchingKey)
            }
            Ok(_) => {}
            Err(err) => return SignOutcome::Unavailable(Unavailable::Backend(err)),
        }

        match backend.sign_schnorr(message).await {
            Ok(Some(signature)) => SignOutcome::Signed(signature),
            Ok(None) => SignOutcome::Unavailable(Unavailable::Declined),
            Err(err) => SignOutcome::Unavailable(Unavailable::Backend(err)),
        }
    }
}

/// Pick the key (plain or blinded towards `mint`) that is authorized.
fn matching_key(
    keypair: &P2pkKeypair,
    mint: Option<&MintUrl>,
    authorized_keys: &[PublicKey],
) -> Option<P2pkKeypair> {
    let public = keypair.public_key();
    if authorized_keys.contains(&public) {
        return Some(keypair.clone());
    }
    let mint = mint?;
    let blinded = keypair
        .blind(&BlindingTweak::for_mint(mint.as_str(), &public))
        .ok()?;
    authorized_keys
        .contains(&blinded.public_key())
        .then_some(blinded)
}

fn sign_with(keypair: &P2pkKeypair, message: &[u8]) -> SignOutcome {
    match keypair.sign(message) {
        Ok(signature) => SignOutcome::Signed(signature),
        Err(err) => SignOutcome::Unavailable(Unavailable::Backend(err.to_string())),
    }
}

/// Wallet-held keys derived from the seed.
#[derive(Debug, Clone)]
pub struct CustodialSigner {
    keys: Vec<P2pkKeypair>,
    mint: Option<MintUrl>,
}

impl CustodialSigner {
    pub fn new(keys: Vec<P2pkKeypair>) -> Self {
        Self { keys, mint: None }
    }

    /// Also answer for keys blinded towards `mint`.
    pub fn with_mint(mut self, mint: MintUrl) -> Self {
        self.mint = Some(mint);
        self
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.keys.iter().map(P2pkKeypair::public_key).collect()
    }
}

#[async_trait]
impl Signer for CustodialSigner {
    fn name(&self) -> &str {
        "custodial"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::SchnorrSignature, Capability::BlindedKeys])
    }

    async fn try_sign(&self, message: &[u8], authorized_keys: &[PublicKey]) -> SignOutcome {
        // First held key that is authorized wins.
        let found = self
            .keys
            .iter()
            .find_map(|keypair| matching_key(keypair, self.mint.as_ref(), authorized_keys));
        match found {
            Some(keypair) => {
                debug!(key = %keypair.public_key(), "custodial signer matched key");
                sign_with(&keypair, message)
            }
            None => SignOutcome::Unavailable(Unavailable::NoMatchingKey),
        }
    }
}

/// A raw private key typed in by the user.
///
/// Always signs, even when the key is not authorized; the collector decides
/// whether the signature counts.
#[derive(Debug, Clone)]
pub struct ManualKeySigner {
    keypair: P2pkKeypair,
    mint: Option<MintUrl>,
}

impl ManualKeySigner {
    pub fn new(keypair: P2pkKeypair) -> Self {
        Self {
            keypair,
            mint: None,
        }
    }

    pub fn from_hex(secret_hex: &str) -> Result<Self, crate::LockError> {
        Ok(Self::new(P2pkKeypair::from_hex(secret_hex)?))
    }

    pub fn with_mint(mut self, mint: MintUrl) -> Self {
        self.mint = Some(mint);
        self
    }
}

#[async_trait]
impl Signer for ManualKeySigner {
    fn name(&self) -> &str {
        "manual"
    }

    fn capabilities(&self) -> HashSet<Capability> {
        HashSet::from([Capability::SchnorrSignature, Capability::BlindedKeys])
    }

    async fn try_sign(&self, message: &[u8], authorized_keys: &[PublicKey]) -> SignOutcome {
        let keypair = matching_key(&self.keypair, self.mint.as_ref(), authorized_keys)
            .unwrap_or_else(|| self.keypair.clone());
        sign_with(&keypair, message)
    }
}
