//! Wallet initialization command

use anyhow::{anyhow, Result};
use std::io::{self, Write};

use crate::{
    config::WalletConfig,
    keys::{validate_mnemonic, WalletKeys},
    storage::EncryptedWallet,
};

use super::{print_error, print_success, print_warning, prompt_confirm, prompt_password, WalletPaths};

/// Run the init command
pub async fn run(paths: &WalletPaths, recover: bool) -> Result<()> {
    if EncryptedWallet::exists(&paths.wallet) {
        print_error("Wallet already exists at this location");
        println!("Path: {}", paths.wallet.display());

        if !prompt_confirm("Overwrite existing wallet?")? {
            println!("Aborted.");
            return Ok(());
        }

        print_warning("Existing wallet will be overwritten!");
    }

    let config = paths.load_config()?;

    let mnemonic = if recover {
        prompt_mnemonic()?
    } else {
        generate_mnemonic(&config)?
    };
    validate_mnemonic(&mnemonic)?;

    println!();
    let password = prompt_new_password()?;

    let keys = WalletKeys::from_mnemonic(&mnemonic, config.custodial_keys)?;

    let wallet = EncryptedWallet::encrypt(&mnemonic, &password)?;
    wallet.save(&paths.wallet)?;

    if !paths.config.exists() {
        write_default_config(paths)?;
    }

    println!();
    print_success("Wallet created successfully!");
    println!();
    println!("Your lock key (share it to receive locked ecash):");
    if let Some(key) = keys.lock_key(0) {
        println!("  {}", key);
    }
    println!();
    println!("Wallet saved to: {}", paths.wallet.display());
    println!("Config:          {}", paths.config.display());

    if !recover {
        println!();
        print_warning("IMPORTANT: Write down your recovery phrase and store it safely!");
        print_warning("Anyone with this phrase can spend ecash locked to your keys.");
        print_warning("If you lose it, locked ecash sent to you cannot be redeemed.");
    }

    Ok(())
}

fn write_default_config(paths: &WalletPaths) -> Result<()> {
    let toml = toml::to_string_pretty(&WalletConfig::default())?;
    if let Some(parent) = paths.config.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&paths.config, toml)?;
    Ok(())
}

/// Generate a new mnemonic and display it
fn generate_mnemonic(config: &WalletConfig) -> Result<String> {
    let keys = WalletKeys::generate(config.custodial_keys)?;
    let words = keys.mnemonic_words();

    println!();
    println!("Your recovery phrase (24 words):");
    println!();

    for (i, word) in words.iter().enumerate() {
        print!("{:>2}. {:<12}", i + 1, word);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    println!();

    println!();
    if !prompt_confirm("Have you written down your recovery phrase?")? {
        return Err(anyhow!("Please write down your recovery phrase before continuing"));
    }

    // Verify by asking for a random word
    let verify_index = rand::random::<usize>() % words.len();
    println!();
    print!("Verify: Enter word #{}: ", verify_index + 1);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if input.trim() != words[verify_index] {
        return Err(anyhow!("Verification failed. Please try again."));
    }

    Ok(keys.mnemonic_phrase().to_string())
}

/// Prompt user to enter their recovery phrase
fn prompt_mnemonic() -> Result<String> {
    println!();
    println!("Enter your 24-word recovery phrase:");
    println!("(You can enter all words on one line, separated by spaces)");
    println!();

    print!("> ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let mut words: Vec<String> = input.split_whitespace().map(str::to_lowercase).collect();

    while words.len() < 24 {
        print!("Enter word #{}: ", words.len() + 1);
        io::stdout().flush()?;

        input.clear();
        io::stdin().read_line(&mut input)?;

        let word = input.trim().to_lowercase();
        if !word.is_empty() {
            words.push(word);
        }
    }

    if words.len() != 24 {
        return Err(anyhow!("Expected 24 words, got {}", words.len()));
    }

    Ok(words.join(" "))
}

/// Prompt for a new password with confirmation
fn prompt_new_password() -> Result<String> {
    loop {
        let password = prompt_password("Enter wallet password: ")?;

        if password.len() < 8 {
            print_error("Password must be at least 8 characters");
            continue;
        }

        let confirm = prompt_password("Confirm password: ")?;

        if password != confirm {
            print_error("Passwords do not match");
            continue;
        }

        return Ok(password);
    }
}
