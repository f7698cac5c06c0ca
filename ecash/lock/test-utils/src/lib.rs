// Copyright (c) 2024 The Botho Foundation

//! Test fixtures for the ecash lock engine: an in-memory mint, a scripted
//! lightning address resolver and key helpers.

mod mint;

pub use mint::{split_amount, MockMint};

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bth_crypto_p2pk::P2pkKeypair;
use bth_ecash_lock::{
    AmountRange, LockError, LockTags, LockTemplate, PaymentResolver, PublicKey,
};
use parking_lot::Mutex;

static INVOICE_COUNTER: AtomicU64 = AtomicU64::new(0);

const BECH32_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// A bolt11-shaped invoice for `sats`. Only the amount prefix is meaningful.
pub fn mock_invoice(sats: u64) -> String {
    let mut n = INVOICE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut data = String::from("pp");
    for _ in 0..8 {
        data.push(BECH32_CHARSET[(n % 32) as usize] as char);
        n /= 32;
    }
    format!("lnbc{}n1{data}", sats * 10)
}

/// Amount in sats encoded in a bolt11 human-readable part.
pub fn invoice_amount(invoice: &str) -> Option<u64> {
    let hrp = &invoice[..invoice.rfind('1')?];
    let rest = hrp.strip_prefix("lnbc")?;
    let digits_end = rest.find(|c: char| !c.is_ascii_digit())?;
    let value: u64 = rest[..digits_end].parse().ok()?;
    // Millisats per unit of each multiplier.
    let msat = match rest[digits_end..].chars().next()? {
        'm' => value * 100_000_000,
        'u' => value * 100_000,
        'n' => value * 100,
        'p' => value / 10,
        _ => return None,
    };
    Some(msat / 1000)
}

/// Resolver for a lightning address with a fixed sendable range.
pub struct ScriptedResolver {
    range: AmountRange,
    requested: Mutex<Vec<u64>>,
}

impl ScriptedResolver {
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            range: AmountRange { min, max },
            requested: Mutex::new(Vec::new()),
        }
    }

    /// Amounts invoices were requested for, in order.
    pub fn requested(&self) -> Vec<u64> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl PaymentResolver for ScriptedResolver {
    async fn amount_range(&self, _address: &str) -> Result<AmountRange, LockError> {
        Ok(self.range)
    }

    async fn request_invoice(&self, _address: &str, amount: u64) -> Result<String, LockError> {
        if amount < self.range.min || amount > self.range.max {
            return Err(LockError::PaymentTarget(format!(
                "amount {amount} outside sendable range"
            )));
        }
        self.requested.lock().push(amount);
        Ok(mock_invoice(amount))
    }
}

/// `n` fresh keypairs.
pub fn keypairs(n: usize) -> Vec<P2pkKeypair> {
    (0..n).map(|_| P2pkKeypair::generate()).collect()
}

pub fn public_keys(keys: &[P2pkKeypair]) -> Vec<PublicKey> {
    keys.iter().map(P2pkKeypair::public_key).collect()
}

/// `n_sigs`-of-`keys.len()` template over `keys`, primary first.
pub fn multisig_template(keys: &[PublicKey], n_sigs: u64) -> LockTemplate {
    LockTemplate::new(
        keys[0],
        LockTags {
            additional_lock_keys: keys[1..].to_vec(),
            required_lock_signatures: n_sigs,
            ..Default::default()
        },
    )
    .unwrap()
}
