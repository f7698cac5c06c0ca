//! Sign command: add this wallet's signatures to a locked token.
//!
//! Signing is offline. The token may still be short of its quorum afterwards;
//! hand it to the next co-signer.

use std::sync::Arc;

use anyhow::Result;
use bth_ecash_lock::{unix_time, QuorumStatus, Signer, Token, WitnessCollector};

use crate::{
    config::SignerKind,
    storage::{EncryptedWallet, HistoryEntry, HistoryKind, ProofStore},
};

use super::{
    build_signers, has_locked_proofs, print_success, print_warning, read_token, unlock_keys,
    WalletPaths,
};

/// Offer every proof of `token` to `signers`, keeping whatever signatures
/// verify. Returns the re-witnessed token and each proof's quorum status.
pub async fn sign_token(
    token: &Token,
    signers: &[Arc<dyn Signer>],
    now: u64,
) -> Result<(Token, Vec<QuorumStatus>)> {
    let mut proofs = Vec::with_capacity(token.proofs.len());
    let mut statuses = Vec::with_capacity(token.proofs.len());

    for proof in &token.proofs {
        let mut collector = WitnessCollector::new(proof.clone(), now)?;
        for signer in signers {
            if collector.is_satisfied() {
                break;
            }
            collector.offer_all(signer.as_ref()).await;
        }
        statuses.push(collector.status());
        proofs.push(collector.witnessed_proof());
    }

    Ok((token.with_proofs(proofs), statuses))
}

/// Run the sign command
pub async fn run(paths: &WalletPaths, token: &str, manual_key: Option<&str>) -> Result<()> {
    let config = paths.load_config()?;
    let token = read_token(token)?;

    if !has_locked_proofs(&token)? {
        print_warning("Token carries no locked proofs; nothing to sign.");
        return Ok(());
    }

    let use_custodial = config.signer_order.contains(&SignerKind::Custodial)
        && EncryptedWallet::exists(&paths.wallet);
    let keys = if use_custodial {
        Some(unlock_keys(&paths.wallet, &config)?)
    } else {
        None
    };

    let signers = build_signers(&config, &token.mint_url, keys.as_ref(), manual_key)?;
    let (signed, statuses) = sign_token(&token, &signers, unix_time()).await?;

    println!();
    let mut pending = 0;
    for (i, (proof, status)) in signed.proofs.iter().zip(&statuses).enumerate() {
        let line = match status {
            QuorumStatus::Satisfied => "ready".to_string(),
            QuorumStatus::Pending { verified, required } => {
                pending += 1;
                format!("{} of {} signatures", verified, required)
            }
            QuorumStatus::Unsatisfiable {
                available,
                required,
            } => {
                pending += 1;
                format!("needs {} signatures but only {} keys exist", required, available)
            }
        };
        println!("  {:>3}. {:>10}  {}", i + 1, proof.amount, line);
    }

    let encoded = signed.encode()?;
    let mut store = ProofStore::open(&paths.proofs)?;
    store.record(
        HistoryEntry::new(
            HistoryKind::Witnessed,
            signed.mint_url.clone(),
            signed.unit.clone(),
            signed.value()?,
        )
        .with_token(encoded.clone()),
    );
    store.save()?;

    println!();
    if pending == 0 {
        print_success("All proofs carry enough signatures. Redeem with:");
        println!("  botho-ecash-wallet redeem <token>");
    } else {
        print_warning(&format!(
            "{} proof(s) still need signatures from other keys.",
            pending
        ));
    }
    println!();
    println!("{}", encoded);

    Ok(())
}
