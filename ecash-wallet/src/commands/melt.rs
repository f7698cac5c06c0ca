//! Melt command: pay a lightning invoice or address out of ecash.

use anyhow::{bail, Result};
use bth_ecash_lock::{
    await_confirmation, total_amount, LockError, Negotiated, PaymentTarget, Proof,
    ProofReconciler, QuoteState, Reconciliation, Settlement, Token, WalletSession,
};
use tracing::{info, warn};

use crate::{
    lnurl::LnurlResolver,
    storage::{HistoryEntry, HistoryKind, ProofStore},
};

use super::{
    build_session, build_signers, connect_mint, format_amount, has_locked_proofs, print_error,
    print_success, print_warning, prompt_confirm, read_token, unlock_keys, WalletPaths,
};

/// Take `proofs` out of the store and note why.
fn retire_proofs(
    store: &mut ProofStore,
    source: &Token,
    proofs: &[Proof],
    kind: HistoryKind,
    note: String,
) -> Result<()> {
    store.remove_proofs(&source.mint_url, &source.unit, proofs);
    store.record(
        HistoryEntry::new(
            kind,
            source.mint_url.clone(),
            source.unit.clone(),
            total_amount(proofs)?,
        )
        .with_note(note),
    );
    store.save()?;
    Ok(())
}

/// Drop store proofs the mint has already seen spent, so a stale proof does
/// not sink the whole melt. Returns what is still spendable.
pub async fn prune_store(
    session: &WalletSession,
    store: &mut ProofStore,
    source: &Token,
) -> Result<Token> {
    match session.reconcile(source).await {
        Ok(Reconciliation::Unchanged(token)) => Ok(token),
        Ok(Reconciliation::Repaired { token, removed }) => {
            warn!(removed = removed.len(), "wallet held spent proofs");
            let note = format!("{} spent proof(s) dropped before melt", removed.len());
            retire_proofs(store, source, &removed, HistoryKind::Repaired, note)?;
            Ok(token)
        }
        Err(LockError::AllProofsSpent) => {
            let note = format!("{} spent proof(s) dropped before melt", source.proofs.len());
            retire_proofs(store, source, &source.proofs, HistoryKind::Repaired, note)?;
            Err(LockError::AllProofsSpent.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// After a melt request timed out, drop the source proofs the mint has
/// taken. Unspent ones stay in the store.
async fn retire_committed_proofs(
    session: &WalletSession,
    store: &mut ProofStore,
    source: &Token,
    negotiated: &Negotiated,
) -> Result<()> {
    let partition = match ProofReconciler::new(session.mint())
        .partition(&source.proofs)
        .await
    {
        Ok(partition) => partition,
        Err(e) => {
            warn!(quote = %negotiated.quote.id, "could not check proofs after timeout: {}", e);
            return Ok(());
        }
    };
    if partition.spent.is_empty() {
        return Ok(());
    }
    let note = format!(
        "quote {} timed out and may still settle ({})",
        negotiated.quote.id, negotiated.invoice
    );
    retire_proofs(store, source, &partition.spent, HistoryKind::Melted, note)
}

/// Settle `negotiated` with `source` and bring the store up to date.
///
/// With `from_store` the source proofs came out of `store` and are removed
/// once the mint takes them. A failed payment leaves the store untouched.
/// A timed-out payment removes only the proofs the mint reports as taken.
pub async fn complete_melt(
    session: &WalletSession,
    store: &mut ProofStore,
    source: &Token,
    negotiated: &Negotiated,
    from_store: bool,
) -> Result<Settlement> {
    let settlement = match session.settle(source, &negotiated.quote).await {
        Ok(settlement) => settlement,
        Err(LockError::PaymentTimedOut(window)) => {
            if from_store {
                retire_committed_proofs(session, store, source, negotiated).await?;
            }
            return Err(LockError::PaymentTimedOut(window).into());
        }
        Err(e) => return Err(e.into()),
    };

    if from_store {
        store.remove_proofs(&source.mint_url, &source.unit, &source.proofs);
    }
    if let Some(change) = &settlement.change {
        store.add_proofs(&change.mint_url, &change.unit, change.proofs.clone());
    }

    let mut entry = HistoryEntry::new(
        HistoryKind::Melted,
        source.mint_url.clone(),
        source.unit.clone(),
        negotiated.quote.amount,
    )
    .with_token(negotiated.invoice.clone());
    if let Some(preimage) = &settlement.preimage {
        entry = entry.with_note(format!("preimage {}", preimage));
    }
    store.record(entry);
    store.save()?;

    Ok(settlement)
}

/// Run the melt command
pub async fn run(paths: &WalletPaths, target: &str, token: Option<&str>, yes: bool) -> Result<()> {
    let config = paths.load_config()?;
    let target: PaymentTarget = target.parse()?;

    let mut store = ProofStore::open(&paths.proofs)?;
    let (source, from_store) = match token {
        Some(arg) => (read_token(arg)?, false),
        None => {
            let mint_url = config.mint_url();
            let unit = config.unit();
            let proofs = store.proofs(&mint_url, &unit);
            if proofs.is_empty() {
                bail!("no proofs held at {}", mint_url);
            }
            (Token::new(mint_url, unit, proofs), true)
        }
    };

    let keys = if has_locked_proofs(&source)? {
        Some(unlock_keys(&paths.wallet, &config)?)
    } else {
        None
    };

    let mint = connect_mint(&config, &source.mint_url, &source.unit).await?;
    let signers = build_signers(&config, &source.mint_url, keys.as_ref(), None)?;
    let mut session = build_session(&config, mint.clone(), signers);
    let resolver = LnurlResolver::new(config.request_timeout())?;

    let source = if from_store {
        prune_store(&session, &mut store, &source).await?
    } else {
        source
    };

    let witnessed = session.witness(&source).await?;
    let negotiated = session
        .negotiate(&witnessed, &target, Some(&resolver))
        .await?;
    let quote = &negotiated.quote;

    println!();
    println!("Pay:         {}", target);
    println!("Amount:      {}", format_amount(quote.amount, &source.unit));
    println!("Fee reserve: {}", format_amount(quote.fee_reserve, &source.unit));
    println!("Available:   {}", format_amount(source.value()?, &source.unit));
    if negotiated.rounds > 1 {
        println!("(fitted after {} quote rounds)", negotiated.rounds);
    }
    println!();

    if !yes && !prompt_confirm("Send this payment?")? {
        println!("Cancelled.");
        return Ok(());
    }

    let settlement =
        match complete_melt(&session, &mut store, &witnessed, &negotiated, from_store).await {
            Ok(settlement) => settlement,
            Err(e) => {
                match e.downcast_ref::<LockError>() {
                    Some(LockError::PaymentFailed(_)) => {
                        print_error("The mint did not pay the invoice. No ecash was spent.");
                    }
                    Some(LockError::PaymentTimedOut(_)) => {
                        print_warning("The mint did not answer in time.");
                        println!("Quote {} may still settle; check the mint later.", quote.id);
                    }
                    _ => {}
                }
                return Err(e);
            }
        };

    let preimage = match settlement.state {
        QuoteState::Pending => {
            print_warning("Payment is pending, waiting for confirmation...");
            let mut poller = mint.poller(quote);
            match await_confirmation(&mut poller, config.confirmation_window()).await {
                Ok(confirmation) => confirmation.preimage,
                Err(e) => {
                    warn!(quote = %quote.id, "payment not confirmed: {}", e);
                    print_error(&format!("Payment not confirmed: {}", e));
                    println!("Quote {} may still settle; check the mint later.", quote.id);
                    return Err(e.into());
                }
            }
        }
        _ => settlement.preimage.clone(),
    };

    info!(quote = %quote.id, "melt settled");
    println!();
    print_success(&format!(
        "Paid {}",
        format_amount(quote.amount, &source.unit)
    ));
    if let Some(preimage) = preimage {
        println!("Preimage: {}", preimage);
    }
    if let Some(change) = &settlement.change {
        let value = change.value()?;
        if from_store {
            println!("Fee change returned: {}", format_amount(value, &change.unit));
        } else {
            println!(
                "Fee change of {} added to the wallet.",
                format_amount(value, &change.unit)
            );
        }
    }

    Ok(())
}
