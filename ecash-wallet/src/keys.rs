//! Key Management
//!
//! Handles BIP39 mnemonic generation and derivation of secp256k1 lock keys.
//!
//! Security: the mnemonic phrase is kept in a `Zeroizing<String>` so the
//! recovery phrase is overwritten when the keys are dropped.

use anyhow::{anyhow, Result};
use bip39::{Language, Mnemonic, MnemonicType};
use bth_ecash_lock::{CustodialSigner, MintUrl, P2pkKeypair, PublicKey};
use zeroize::Zeroizing;

/// Number of words in the mnemonic phrase
const MNEMONIC_WORDS: usize = 24;

/// Lock keys derived from a BIP39 mnemonic.
#[derive(Clone)]
pub struct WalletKeys {
    mnemonic_phrase: Zeroizing<String>,
    lock_keys: Vec<P2pkKeypair>,
}

impl WalletKeys {
    /// Generate a new wallet with a random mnemonic
    pub fn generate(key_count: u32) -> Result<Self> {
        let mnemonic = Mnemonic::new(MnemonicType::Words24, Language::English);
        Self::derive(mnemonic.phrase(), key_count)
    }

    /// Restore a wallet from a mnemonic phrase
    pub fn from_mnemonic(phrase: &str, key_count: u32) -> Result<Self> {
        validate_mnemonic(phrase)?;
        Self::derive(phrase, key_count)
    }

    fn derive(phrase: &str, key_count: u32) -> Result<Self> {
        if key_count == 0 {
            return Err(anyhow!("At least one lock key is required"));
        }
        let mnemonic_phrase = Zeroizing::new(phrase.to_string());
        let lock_keys = (0..key_count)
            .map(|index| P2pkKeypair::from_mnemonic(&mnemonic_phrase, "", index))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Key derivation failed: {}", e))?;

        Ok(Self {
            mnemonic_phrase,
            lock_keys,
        })
    }

    /// Get the mnemonic phrase as a string
    pub fn mnemonic_phrase(&self) -> &str {
        &self.mnemonic_phrase
    }

    /// Get the mnemonic words as a vector
    pub fn mnemonic_words(&self) -> Vec<&str> {
        self.mnemonic_phrase.split_whitespace().collect()
    }

    /// Public lock key at `index`, the one to hand out for receiving.
    pub fn lock_key(&self, index: usize) -> Option<PublicKey> {
        self.lock_keys.get(index).map(P2pkKeypair::public_key)
    }

    pub fn public_keys(&self) -> Vec<PublicKey> {
        self.lock_keys.iter().map(P2pkKeypair::public_key).collect()
    }

    /// Lock key at `index` blinded towards `mint`.
    pub fn blinded_lock_key(&self, index: usize, mint: &MintUrl) -> Result<Option<PublicKey>> {
        let Some(keypair) = self.lock_keys.get(index) else {
            return Ok(None);
        };
        let tweak = bth_crypto_p2pk::BlindingTweak::for_mint(mint.as_str(), &keypair.public_key());
        Ok(Some(keypair.blind(&tweak)?.public_key()))
    }

    /// A signer holding every derived key, answering for keys blinded towards
    /// `mint` as well.
    pub fn custodial_signer(&self, mint: &MintUrl) -> CustodialSigner {
        CustodialSigner::new(self.lock_keys.clone()).with_mint(mint.clone())
    }
}

/// Validate a mnemonic phrase
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    let word_count = phrase.split_whitespace().count();
    if word_count != MNEMONIC_WORDS {
        return Err(anyhow!(
            "Expected {} word mnemonic, got {} words",
            MNEMONIC_WORDS,
            word_count
        ));
    }

    Mnemonic::from_phrase(phrase, Language::English)
        .map_err(|e| anyhow!("Invalid mnemonic phrase: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";

    #[test]
    fn test_generate_keys() {
        let keys = WalletKeys::generate(2).unwrap();
        assert_eq!(keys.mnemonic_words().len(), 24);
        assert_eq!(keys.public_keys().len(), 2);
        assert_ne!(keys.lock_key(0), keys.lock_key(1));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = WalletKeys::from_mnemonic(TEST_MNEMONIC, 3).unwrap();
        let b = WalletKeys::from_mnemonic(TEST_MNEMONIC, 1).unwrap();
        assert_eq!(a.lock_key(0), b.lock_key(0));
        assert_eq!(b.lock_key(1), None);
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert!(validate_mnemonic("abandon abandon abandon").is_err());

        let bad_checksum = TEST_MNEMONIC.replace(" art", " abandon");
        assert!(validate_mnemonic(&bad_checksum).is_err());
    }

    #[test]
    fn test_custodial_signer_holds_all_keys() {
        let keys = WalletKeys::from_mnemonic(TEST_MNEMONIC, 2).unwrap();
        let signer = keys.custodial_signer(&MintUrl::from("https://mint.test"));
        assert_eq!(signer.public_keys(), keys.public_keys());
    }

    #[test]
    fn test_blinded_key_depends_on_mint() {
        let keys = WalletKeys::from_mnemonic(TEST_MNEMONIC, 1).unwrap();
        let a = keys
            .blinded_lock_key(0, &MintUrl::from("https://a.test"))
            .unwrap()
            .unwrap();
        let b = keys
            .blinded_lock_key(0, &MintUrl::from("https://b.test"))
            .unwrap()
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(Some(a), keys.lock_key(0));
    }
}
