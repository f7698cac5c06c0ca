//! Show lock keys

use anyhow::{anyhow, Result};

use super::{unlock_keys, WalletPaths};

/// Run the pubkey command
pub async fn run(paths: &WalletPaths, index: Option<usize>, blinded: bool) -> Result<()> {
    let config = paths.load_config()?;
    let keys = unlock_keys(&paths.wallet, &config)?;
    let mint_url = config.mint_url();

    let indices: Vec<usize> = match index {
        Some(index) => vec![index],
        None => (0..keys.public_keys().len()).collect(),
    };

    println!();
    if blinded {
        println!("Lock keys blinded towards {}:", mint_url);
    } else {
        println!("Lock keys:");
    }

    for index in indices {
        let key = if blinded {
            keys.blinded_lock_key(index, &mint_url)?
        } else {
            keys.lock_key(index)
        };
        let key = key.ok_or_else(|| {
            anyhow!(
                "No lock key at index {} (wallet derives {})",
                index,
                config.custodial_keys
            )
        })?;
        println!("  {:>2}. {}", index, key);
    }

    Ok(())
}
