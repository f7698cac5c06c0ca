//! Wallet history command

use anyhow::Result;
use chrono::{TimeZone, Utc};

use crate::storage::{HistoryKind, ProofStore};

use super::{format_amount, print_success, WalletPaths};

/// ANSI color code for terminal display
fn color(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::Received | HistoryKind::Redeemed => "\x1b[32m", // Green
        HistoryKind::Locked | HistoryKind::Melted => "\x1b[33m",     // Yellow
        HistoryKind::Witnessed => "\x1b[36m",                        // Cyan
        HistoryKind::Repaired => "\x1b[31m",                         // Red
    }
}

fn format_timestamp(timestamp: u64) -> String {
    Utc.timestamp_opt(timestamp as i64, 0)
        .single()
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Run the history command
pub async fn run(paths: &WalletPaths, limit: usize) -> Result<()> {
    let store = ProofStore::open(&paths.proofs)?;
    let entries = store.history(limit);

    if entries.is_empty() {
        println!();
        println!("No history yet.");
        return Ok(());
    }

    println!();
    print_success(&format!("Wallet History ({} entries)", entries.len()));
    println!();
    println!(
        "{:<17} {:<16} {:<16} {}",
        "Time", "Type", "Amount", "Mint"
    );
    println!("{}", "-".repeat(78));

    for entry in entries {
        // Pad before coloring so escape codes don't break alignment.
        let kind = format!("{}{:<7}\x1b[0m", color(entry.kind), entry.kind.code());
        println!(
            "{:<17} {}          {:<16} {}",
            format_timestamp(entry.timestamp),
            kind,
            format_amount(entry.amount, &entry.unit),
            entry.mint_url
        );
        if let Some(note) = &entry.note {
            println!("{:<17} {}", "", note);
        }
    }
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13");
    }
}
