//! Redeem command: spend a locked token into the wallet.

use anyhow::Result;
use bth_ecash_lock::LockError;

use crate::{
    config::SignerKind,
    storage::{EncryptedWallet, HistoryKind, ProofStore},
};

use super::{
    build_session, build_signers, connect_mint, format_amount, has_locked_proofs, print_error,
    print_success, print_warning, read_token, receive::accept_token, unlock_keys, WalletPaths,
};

/// Run the redeem command
pub async fn run(paths: &WalletPaths, token: &str, manual_key: Option<&str>) -> Result<()> {
    let config = paths.load_config()?;
    let token = read_token(token)?;

    if !has_locked_proofs(&token)? {
        print_warning("Token carries no locked proofs; redeeming it like 'receive'.");
    }

    let use_custodial = config.signer_order.contains(&SignerKind::Custodial)
        && EncryptedWallet::exists(&paths.wallet);
    let keys = if use_custodial {
        Some(unlock_keys(&paths.wallet, &config)?)
    } else {
        None
    };

    let mint = connect_mint(&config, &token.mint_url, &token.unit).await?;
    let signers = build_signers(&config, &token.mint_url, keys.as_ref(), manual_key)?;
    let session = build_session(&config, mint, signers);

    let mut store = ProofStore::open(&paths.proofs)?;
    match accept_token(&session, &mut store, &token, HistoryKind::Redeemed).await {
        Ok(accepted) => {
            println!();
            if accepted.dropped > 0 {
                print_warning(&format!(
                    "{} proof(s) were already spent and have been dropped.",
                    accepted.dropped
                ));
            }
            print_success(&format!(
                "Redeemed {}",
                format_amount(accepted.amount, &token.unit)
            ));
            Ok(())
        }
        Err(e) => {
            if let Some(LockError::Unsatisfiable { verified, required }) =
                e.downcast_ref::<LockError>()
            {
                print_error(&format!(
                    "Only {} of {} required signatures are available.",
                    verified, required
                ));
                println!("Collect the missing signatures with 'botho-ecash-wallet sign' first.");
            }
            Err(e)
        }
    }
}
