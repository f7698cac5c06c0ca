//! Botho Ecash Wallet
//!
//! A command-line wallet for pay-to-public-key locked ecash. Keys are derived
//! locally from a BIP39 mnemonic; mints are untrusted HTTP services spoken to
//! over the Cashu v1 API.
//!
//! ## Security Model
//!
//! - The mnemonic is stored encrypted (Argon2id + ChaCha20-Poly1305)
//! - Lock keys never leave the wallet; only signatures over secrets do
//! - Every received token is checked against the mint before it is trusted
//! - Melt payments only commit after the quote provably fits the token

pub mod config;
pub mod keys;
pub mod lnurl;
pub mod mint_client;
pub mod storage;

pub mod commands;

pub use config::WalletConfig;
pub use keys::WalletKeys;
pub use lnurl::LnurlResolver;
pub use mint_client::{HttpMint, MeltQuotePoller};
pub use storage::{EncryptedWallet, HistoryEntry, HistoryKind, ProofStore};
