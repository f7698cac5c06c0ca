//! Lock command: swap wallet proofs into a token only named keys can spend.

use anyhow::{anyhow, bail, Result};
use bth_ecash_lock::{
    total_amount, unix_time, LockPolicy, LockedToken, MintBoundary, Proof, PublicKey, Token,
    WalletSession,
};
use tracing::debug;

use crate::storage::{HistoryEntry, HistoryKind, ProofStore};

use super::{build_session, connect_mint, format_amount, print_success, WalletPaths};

/// Command-line options of `lock`.
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    pub to: Vec<String>,
    pub n_sigs: Option<u64>,
    pub refund: Vec<String>,
    pub n_sigs_refund: Option<u64>,
    pub locktime: Option<String>,
    pub amount: Option<u64>,
    pub blind: bool,
    pub memo: Option<String>,
}

fn parse_keys(raw: &[String]) -> Result<Vec<PublicKey>> {
    raw.iter()
        .map(|key| {
            key.trim()
                .parse::<PublicKey>()
                .map_err(|e| anyhow!("invalid public key {}: {}", key, e))
        })
        .collect()
}

/// Absolute unix seconds, or `+secs` relative to `now`.
pub fn parse_locktime(raw: &str, now: u64) -> Result<u64> {
    let raw = raw.trim();
    match raw.strip_prefix('+') {
        Some(relative) => {
            let secs: u64 = relative
                .parse()
                .map_err(|_| anyhow!("invalid relative locktime {}", raw))?;
            now.checked_add(secs)
                .ok_or_else(|| anyhow!("locktime overflows"))
        }
        None => raw
            .parse()
            .map_err(|_| anyhow!("invalid locktime {}", raw)),
    }
}

impl LockOptions {
    /// Lock policy described by these options at `now`.
    pub fn policy(&self, now: u64) -> Result<LockPolicy> {
        let lock_keys = parse_keys(&self.to)?;
        if lock_keys.is_empty() {
            bail!("at least one --to key is required");
        }
        let refund_keys = parse_keys(&self.refund)?;
        let locktime = self
            .locktime
            .as_deref()
            .map(|raw| parse_locktime(raw, now))
            .transpose()?;

        if !refund_keys.is_empty() && locktime.is_none() {
            bail!("--refund needs --locktime");
        }

        Ok(LockPolicy {
            lock_keys,
            required_lock_signatures: self.n_sigs.unwrap_or(1),
            refund_keys,
            required_refund_signatures: self.n_sigs_refund.unwrap_or(1),
            locktime,
            amount: self.amount,
            blind_keys: self.blind,
        })
    }
}

/// Largest proofs first until their value after the input fee covers
/// `amount`. Without an amount every proof is used.
pub fn select_proofs(
    mint: &dyn MintBoundary,
    mut available: Vec<Proof>,
    amount: Option<u64>,
) -> Result<Vec<Proof>> {
    let Some(amount) = amount else {
        return Ok(available);
    };

    available.sort_by(|a, b| b.amount.cmp(&a.amount));
    let mut selected = Vec::new();
    for proof in available {
        selected.push(proof);
        let total = total_amount(&selected)?;
        if total.saturating_sub(mint.input_fee(&selected)) >= amount {
            return Ok(selected);
        }
    }

    let total = total_amount(&selected)?;
    bail!(
        "insufficient balance: need {} plus fees, have {}",
        amount,
        total
    )
}

/// Lock proofs from `store` under `policy` and keep the change.
pub async fn lock_from_store(
    session: &WalletSession,
    store: &mut ProofStore,
    policy: &LockPolicy,
    memo: Option<&str>,
) -> Result<LockedToken> {
    let mint = session.mint();
    let mint_url = mint.mint_url().clone();
    let unit = mint.unit().clone();

    let held = store.proofs(&mint_url, &unit);
    if held.is_empty() {
        bail!("no proofs held at {}", mint_url);
    }
    let inputs = select_proofs(mint, held, policy.amount)?;
    debug!(inputs = inputs.len(), "selected proofs to lock");

    let mut source = Token::new(mint_url.clone(), unit.clone(), inputs);
    if let Some(memo) = memo {
        source = source.with_memo(memo);
    }

    let locked = session.lock(&source, policy).await?;

    store.remove_proofs(&mint_url, &unit, &source.proofs);
    if let Some(change) = &locked.change {
        store.add_proofs(&mint_url, &unit, change.proofs.clone());
    }
    let mut entry = HistoryEntry::new(HistoryKind::Locked, mint_url, unit, locked.token.value()?)
        .with_token(locked.token.encode()?);
    if let Some(memo) = memo {
        entry = entry.with_note(memo);
    }
    store.record(entry);
    store.save()?;

    Ok(locked)
}

/// Run the lock command
pub async fn run(paths: &WalletPaths, options: &LockOptions) -> Result<()> {
    let config = paths.load_config()?;
    let policy = options.policy(unix_time())?;

    let mint = connect_mint(&config, &config.mint_url(), &config.unit()).await?;
    let session = build_session(&config, mint, Vec::new());

    let mut store = ProofStore::open(&paths.proofs)?;
    let locked = lock_from_store(&session, &mut store, &policy, options.memo.as_deref()).await?;

    println!();
    print_success(&format!(
        "Locked {} to {} key(s), {} signature(s) required",
        format_amount(locked.token.value()?, &locked.token.unit),
        policy.lock_keys.len(),
        policy.required_lock_signatures
    ));
    if let Some(locktime) = policy.locktime {
        println!("Refund path opens at unix time {}", locktime);
    }
    if let Some(change) = &locked.change {
        println!(
            "Change kept: {}",
            format_amount(change.value()?, &change.unit)
        );
    }
    println!();
    println!("{}", locked.token.encode()?);

    Ok(())
}
