//! Balance command

use anyhow::Result;

use crate::storage::ProofStore;

use super::{format_amount, print_success, WalletPaths};

/// Run the balance command
pub async fn run(paths: &WalletPaths, detailed: bool) -> Result<()> {
    let store = ProofStore::open(&paths.proofs)?;

    if store.pockets().is_empty() {
        println!("No ecash held. Use 'botho-ecash-wallet receive <token>' to add some.");
        return Ok(());
    }

    println!();
    for pocket in store.pockets() {
        print_success(&format!(
            "{}: {}",
            pocket.mint_url,
            format_amount(pocket.balance()?, &pocket.unit)
        ));

        if detailed {
            println!("  Proofs ({}):", pocket.proofs.len());
            for (i, proof) in pocket.proofs.iter().enumerate() {
                let locked = if proof.secret.locking_condition()?.is_some() {
                    " (locked)"
                } else {
                    ""
                };
                println!(
                    "  {:>3}. {:>10}  keyset {}{}",
                    i + 1,
                    proof.amount,
                    proof.keyset_id,
                    locked
                );
            }
        }
    }

    Ok(())
}
