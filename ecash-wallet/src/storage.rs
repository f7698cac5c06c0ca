//! Wallet Storage
//!
//! Two files live in the wallet directory:
//!
//! - `wallet.dat`: the mnemonic, encrypted with an Argon2id-derived key and
//!   ChaCha20-Poly1305
//! - `proofs.json`: unspent proofs grouped by mint and unit, plus a history
//!   of what the wallet did with them. Proofs are bearer money, so the file
//!   is written owner-only.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use bth_ecash_lock::{dedup_by_secret, total_amount, CurrencyUnit, MintUrl, Proof, Secret};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Current wallet file format version
const WALLET_VERSION: u32 = 1;

/// Current proof store format version
const PROOF_STORE_VERSION: u32 = 1;

/// Argon2 parameters (tuned for security vs. usability)
const ARGON2_MEMORY_KB: u32 = 65536; // 64 MB
const ARGON2_ITERATIONS: u32 = 3;
const ARGON2_PARALLELISM: u32 = 4;

/// Encrypted wallet file structure
#[derive(Serialize, Deserialize)]
pub struct EncryptedWallet {
    /// File format version
    version: u32,

    /// Argon2 salt (base64 encoded)
    salt: String,

    /// ChaCha20-Poly1305 nonce (12 bytes, hex encoded)
    nonce: String,

    /// Encrypted mnemonic (hex encoded)
    ciphertext: String,

    /// Unix time the wallet was created
    pub created_at: u64,
}

impl EncryptedWallet {
    /// Create a new encrypted wallet from a mnemonic phrase
    pub fn encrypt(mnemonic: &str, password: &str) -> Result<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let key = derive_key(password, salt.as_str())?;

        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill(&mut nonce_bytes);

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_ref())
            .map_err(|_| anyhow!("Failed to create cipher"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, mnemonic.as_bytes())
            .map_err(|_| anyhow!("Encryption failed"))?;

        Ok(Self {
            version: WALLET_VERSION,
            salt: salt.to_string(),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
            created_at: bth_ecash_lock::unix_time(),
        })
    }

    /// Decrypt the wallet to retrieve the mnemonic
    pub fn decrypt(&self, password: &str) -> Result<Zeroizing<String>> {
        if self.version != WALLET_VERSION {
            return Err(anyhow!(
                "Unsupported wallet version: {} (expected {})",
                self.version,
                WALLET_VERSION
            ));
        }

        let key = derive_key(password, &self.salt)?;

        let nonce_bytes = hex::decode(&self.nonce).map_err(|_| anyhow!("Invalid nonce format"))?;
        let ciphertext =
            hex::decode(&self.ciphertext).map_err(|_| anyhow!("Invalid ciphertext format"))?;

        if nonce_bytes.len() != 12 {
            return Err(anyhow!("Invalid nonce length"));
        }

        let cipher = ChaCha20Poly1305::new_from_slice(key.as_ref())
            .map_err(|_| anyhow!("Failed to create cipher"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(nonce, ciphertext.as_slice())
                .map_err(|_| anyhow!("Decryption failed - wrong password?"))?,
        );

        let phrase = std::str::from_utf8(&plaintext)
            .map_err(|_| anyhow!("Invalid mnemonic encoding"))?;
        Ok(Zeroizing::new(phrase.to_string()))
    }

    /// Save the wallet to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_private(path, json.as_bytes())
    }

    /// Load a wallet from a file
    pub fn load(path: &Path) -> Result<Self> {
        let json =
            fs::read_to_string(path).map_err(|e| anyhow!("Failed to read wallet file: {}", e))?;

        serde_json::from_str(&json).map_err(|e| anyhow!("Failed to parse wallet file: {}", e))
    }

    /// Check if a wallet file exists
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    /// Change the wallet password
    pub fn change_password(&mut self, old_password: &str, new_password: &str) -> Result<()> {
        let mnemonic = self.decrypt(old_password)?;
        let new_wallet = Self::encrypt(&mnemonic, new_password)?;

        self.salt = new_wallet.salt;
        self.nonce = new_wallet.nonce;
        self.ciphertext = new_wallet.ciphertext;

        Ok(())
    }
}

/// Derive a 32-byte encryption key from password using Argon2id
fn derive_key(password: &str, salt: &str) -> Result<Zeroizing<[u8; 32]>> {
    let salt = SaltString::from_b64(salt).map_err(|_| anyhow!("Invalid salt format"))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        argon2::Params::new(
            ARGON2_MEMORY_KB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(32),
        )
        .map_err(|_| anyhow!("Invalid Argon2 parameters"))?,
    );

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|_| anyhow!("Key derivation failed"))?;

    let hash_output = hash.hash.ok_or_else(|| anyhow!("No hash output"))?;
    let hash_bytes = hash_output.as_bytes();
    if hash_bytes.len() < 32 {
        return Err(anyhow!("Key derivation produced a short key"));
    }

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&hash_bytes[..32]);

    Ok(key)
}

/// Write `contents` readable by the owner only.
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        use std::{io::Write, os::unix::fs::OpenOptionsExt};
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents)?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)?;
    }

    Ok(())
}

/// What happened to a token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    /// Plain or locked token swapped into the wallet
    Received,
    /// Proofs locked to someone's keys and handed out
    Locked,
    /// Signatures added to a locked token
    Witnessed,
    /// Locked proofs redeemed into the wallet
    Redeemed,
    /// Proofs spent on a lightning payment
    Melted,
    /// Spent proofs dropped after checking with the mint
    Repaired,
}

impl HistoryKind {
    /// Short code for table display
    pub fn code(&self) -> &'static str {
        match self {
            Self::Received => "RECV",
            Self::Locked => "LOCK",
            Self::Witnessed => "SIGN",
            Self::Redeemed => "REDEEM",
            Self::Melted => "MELT",
            Self::Repaired => "REPAIR",
        }
    }
}

/// One line of wallet history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: u64,
    pub kind: HistoryKind,
    pub mint_url: MintUrl,
    pub unit: CurrencyUnit,
    pub amount: u64,
    /// Encoded token handed out or received, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, mint_url: MintUrl, unit: CurrencyUnit, amount: u64) -> Self {
        Self {
            timestamp: bth_ecash_lock::unix_time(),
            kind,
            mint_url,
            unit,
            amount,
            token: None,
            note: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Unspent proofs of one (mint, unit) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pocket {
    pub mint_url: MintUrl,
    pub unit: CurrencyUnit,
    pub proofs: Vec<Proof>,
}

impl Pocket {
    pub fn balance(&self) -> Result<u64> {
        Ok(total_amount(&self.proofs)?)
    }
}

/// Unspent proofs and history, persisted as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProofStore {
    version: u32,
    #[serde(default)]
    pockets: Vec<Pocket>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
    #[serde(skip)]
    path: PathBuf,
}

impl ProofStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self {
                version: PROOF_STORE_VERSION,
                pockets: Vec::new(),
                history: Vec::new(),
                path: path.to_path_buf(),
            });
        }

        let json = fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read proof store: {}", e))?;
        let mut store: ProofStore = serde_json::from_str(&json)
            .map_err(|e| anyhow!("Failed to parse proof store: {}", e))?;
        if store.version != PROOF_STORE_VERSION {
            return Err(anyhow!(
                "Unsupported proof store version: {} (expected {})",
                store.version,
                PROOF_STORE_VERSION
            ));
        }
        store.path = path.to_path_buf();
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        write_private(&self.path, json.as_bytes())
    }

    pub fn pockets(&self) -> &[Pocket] {
        &self.pockets
    }

    fn pocket(&self, mint_url: &MintUrl, unit: &CurrencyUnit) -> Option<&Pocket> {
        self.pockets
            .iter()
            .find(|p| &p.mint_url == mint_url && &p.unit == unit)
    }

    fn pocket_mut(&mut self, mint_url: &MintUrl, unit: &CurrencyUnit) -> &mut Pocket {
        let index = match self
            .pockets
            .iter()
            .position(|p| &p.mint_url == mint_url && &p.unit == unit)
        {
            Some(index) => index,
            None => {
                self.pockets.push(Pocket {
                    mint_url: mint_url.clone(),
                    unit: unit.clone(),
                    proofs: Vec::new(),
                });
                self.pockets.len() - 1
            }
        };
        &mut self.pockets[index]
    }

    /// Unspent proofs held for `mint_url` in `unit`.
    pub fn proofs(&self, mint_url: &MintUrl, unit: &CurrencyUnit) -> Vec<Proof> {
        self.pocket(mint_url, unit)
            .map(|p| p.proofs.clone())
            .unwrap_or_default()
    }

    pub fn balance(&self, mint_url: &MintUrl, unit: &CurrencyUnit) -> Result<u64> {
        self.pocket(mint_url, unit)
            .map(Pocket::balance)
            .unwrap_or(Ok(0))
    }

    /// Add proofs, ignoring any whose secret is already held.
    pub fn add_proofs(&mut self, mint_url: &MintUrl, unit: &CurrencyUnit, proofs: Vec<Proof>) {
        let pocket = self.pocket_mut(mint_url, unit);
        pocket.proofs.extend(proofs);
        pocket.proofs = dedup_by_secret(&pocket.proofs);
    }

    /// Drop proofs by secret.
    pub fn remove_proofs(&mut self, mint_url: &MintUrl, unit: &CurrencyUnit, proofs: &[Proof]) {
        let spent: Vec<&Secret> = proofs.iter().map(|p| &p.secret).collect();
        let pocket = self.pocket_mut(mint_url, unit);
        pocket.proofs.retain(|p| !spent.contains(&&p.secret));
        if pocket.proofs.is_empty() {
            self.pockets.retain(|p| !p.proofs.is_empty());
        }
    }

    pub fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Most recent history entries first.
    pub fn history(&self, limit: usize) -> Vec<&HistoryEntry> {
        self.history.iter().rev().take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art";
    const TEST_PASSWORD: &str = "test-password-123";

    fn proof(amount: u64) -> Proof {
        Proof {
            amount,
            keyset_id: "00ad268c4d1f5826".to_string(),
            secret: Secret::random(),
            c: "02".to_string() + &"ab".repeat(32),
            witness: None,
        }
    }

    #[test]
    fn test_encrypt_decrypt() {
        let wallet = EncryptedWallet::encrypt(TEST_MNEMONIC, TEST_PASSWORD).unwrap();
        let decrypted = wallet.decrypt(TEST_PASSWORD).unwrap();
        assert_eq!(decrypted.as_str(), TEST_MNEMONIC);
    }

    #[test]
    fn test_wrong_password() {
        let wallet = EncryptedWallet::encrypt(TEST_MNEMONIC, TEST_PASSWORD).unwrap();
        assert!(wallet.decrypt("wrong-password").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let wallet_path = temp_dir.path().join("wallet.dat");

        let wallet = EncryptedWallet::encrypt(TEST_MNEMONIC, TEST_PASSWORD).unwrap();
        wallet.save(&wallet_path).unwrap();

        let loaded = EncryptedWallet::load(&wallet_path).unwrap();
        assert_eq!(loaded.decrypt(TEST_PASSWORD).unwrap().as_str(), TEST_MNEMONIC);
    }

    #[cfg(unix)]
    #[test]
    fn test_wallet_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let wallet_path = temp_dir.path().join("wallet.dat");
        EncryptedWallet::encrypt(TEST_MNEMONIC, TEST_PASSWORD)
            .unwrap()
            .save(&wallet_path)
            .unwrap();

        let mode = fs::metadata(&wallet_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_change_password() {
        let mut wallet = EncryptedWallet::encrypt(TEST_MNEMONIC, TEST_PASSWORD).unwrap();

        let new_password = "new-password-456";
        wallet.change_password(TEST_PASSWORD, new_password).unwrap();

        assert!(wallet.decrypt(TEST_PASSWORD).is_err());
        assert_eq!(wallet.decrypt(new_password).unwrap().as_str(), TEST_MNEMONIC);
    }

    #[test]
    fn test_proof_store_pockets() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("proofs.json");
        let mint = MintUrl::from("https://mint.test");
        let sat = CurrencyUnit::sat();
        let usd = CurrencyUnit::from("usd");

        let mut store = ProofStore::open(&path).unwrap();
        let held = vec![proof(8), proof(2)];
        store.add_proofs(&mint, &sat, held.clone());
        store.add_proofs(&mint, &usd, vec![proof(5)]);
        // Re-adding a held proof is a no-op.
        store.add_proofs(&mint, &sat, vec![held[0].clone()]);
        store.save().unwrap();

        let store = ProofStore::open(&path).unwrap();
        assert_eq!(store.balance(&mint, &sat).unwrap(), 10);
        assert_eq!(store.balance(&mint, &usd).unwrap(), 5);
        assert_eq!(store.pockets().len(), 2);
    }

    #[test]
    fn test_remove_proofs_drops_empty_pocket() {
        let temp_dir = TempDir::new().unwrap();
        let mint = MintUrl::from("https://mint.test");
        let sat = CurrencyUnit::sat();

        let mut store = ProofStore::open(&temp_dir.path().join("proofs.json")).unwrap();
        let held = vec![proof(8), proof(2)];
        store.add_proofs(&mint, &sat, held.clone());

        store.remove_proofs(&mint, &sat, &held[..1]);
        assert_eq!(store.balance(&mint, &sat).unwrap(), 2);

        store.remove_proofs(&mint, &sat, &held[1..]);
        assert!(store.pockets().is_empty());
        assert_eq!(store.balance(&mint, &sat).unwrap(), 0);
    }

    #[test]
    fn test_history_newest_first() {
        let temp_dir = TempDir::new().unwrap();
        let mint = MintUrl::from("https://mint.test");

        let mut store = ProofStore::open(&temp_dir.path().join("proofs.json")).unwrap();
        store.record(HistoryEntry::new(HistoryKind::Received, mint.clone(), CurrencyUnit::sat(), 10));
        store.record(
            HistoryEntry::new(HistoryKind::Locked, mint, CurrencyUnit::sat(), 4)
                .with_token("cashuAabc")
                .with_note("2-of-3"),
        );

        let history = store.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, HistoryKind::Locked);
        assert_eq!(history[0].token.as_deref(), Some("cashuAabc"));
        assert_eq!(store.history(1).len(), 1);
    }
}
