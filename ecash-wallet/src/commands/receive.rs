//! Receive command: check a token against its mint and swap it into the
//! wallet.

use anyhow::Result;
use bth_ecash_lock::{total_amount, Reconciliation, Token, WalletSession};
use tracing::warn;

use crate::storage::{HistoryEntry, HistoryKind, ProofStore};

use super::{
    build_session, build_signers, connect_mint, format_amount, has_locked_proofs, print_success,
    print_warning, read_token, unlock_keys, WalletPaths,
};

/// What accepting a token produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Value added to the wallet after mint fees
    pub amount: u64,
    /// Proofs dropped because the mint had already seen them spent
    pub dropped: usize,
}

/// Drop spent proofs from `token`, witness and swap the rest into fresh
/// proofs, and keep them in `store`.
pub async fn accept_token(
    session: &WalletSession,
    store: &mut ProofStore,
    token: &Token,
    kind: HistoryKind,
) -> Result<Accepted> {
    let (usable, dropped) = match session.reconcile(token).await? {
        Reconciliation::Unchanged(token) => (token, 0),
        Reconciliation::Repaired {
            token: repaired,
            removed,
        } => {
            warn!(removed = removed.len(), "token had spent proofs");
            store.record(
                HistoryEntry::new(
                    HistoryKind::Repaired,
                    token.mint_url.clone(),
                    token.unit.clone(),
                    total_amount(&removed)?,
                )
                .with_note(format!("{} spent proof(s) dropped", removed.len())),
            );
            (repaired, removed.len())
        }
    };

    let proofs = session.redeem(&usable).await?;
    let amount = total_amount(&proofs)?;
    store.add_proofs(&token.mint_url, &token.unit, proofs);

    let mut entry = HistoryEntry::new(kind, token.mint_url.clone(), token.unit.clone(), amount)
        .with_token(token.encode()?);
    if let Some(memo) = &token.memo {
        entry = entry.with_note(memo.clone());
    }
    store.record(entry);
    store.save()?;

    Ok(Accepted { amount, dropped })
}

/// Run the receive command
pub async fn run(paths: &WalletPaths, token: &str) -> Result<()> {
    let config = paths.load_config()?;
    let token = read_token(token)?;

    // Locked proofs need the wallet keys; plain ones do not.
    let keys = if has_locked_proofs(&token)? {
        Some(unlock_keys(&paths.wallet, &config)?)
    } else {
        None
    };

    let mint = connect_mint(&config, &token.mint_url, &token.unit).await?;
    let signers = build_signers(&config, &token.mint_url, keys.as_ref(), None)?;
    let session = build_session(&config, mint, signers);

    let mut store = ProofStore::open(&paths.proofs)?;
    let accepted = accept_token(&session, &mut store, &token, HistoryKind::Received).await?;

    println!();
    if accepted.dropped > 0 {
        print_warning(&format!(
            "{} proof(s) were already spent and have been dropped.",
            accepted.dropped
        ));
    }
    print_success(&format!(
        "Received {}",
        format_amount(accepted.amount, &token.unit)
    ));
    if let Some(memo) = &token.memo {
        println!("Memo: {}", memo);
    }

    Ok(())
}
