//! Check command: show who can spend a token and whether the mint still
//! honours it.

use anyhow::Result;
use bth_ecash_lock::{
    active_signers_for_proof, authorization::verified_signers, AuthorizationPhase, LockError,
    Reconciliation, Token, WalletSession,
};
use chrono::{TimeZone, Utc};

use super::{
    build_session, connect_mint, format_amount, print_error, print_success, print_warning,
    read_token, WalletPaths,
};

/// One proof's spending conditions at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofReport {
    pub amount: u64,
    pub phase: AuthorizationPhase,
    pub quorum: u64,
    pub keys: usize,
    pub verified: usize,
    pub locktime: Option<u64>,
}

/// Spending conditions of every proof in `token` at `now`.
pub fn describe_token(token: &Token, now: u64) -> Result<Vec<ProofReport>> {
    token
        .proofs
        .iter()
        .map(|proof| {
            let active = active_signers_for_proof(proof, now)?;
            let locktime = proof
                .secret
                .locking_condition()?
                .and_then(|condition| condition.tags.locktime);
            Ok(ProofReport {
                amount: proof.amount,
                phase: active.phase,
                quorum: active.quorum,
                keys: active.keys.len(),
                verified: verified_signers(proof, &active).len(),
                locktime,
            })
        })
        .collect()
}

fn phase_label(phase: AuthorizationPhase) -> &'static str {
    match phase {
        AuthorizationPhase::Unlocked => "plain",
        AuthorizationPhase::Lock => "locked",
        AuthorizationPhase::Refund => "refundable",
        AuthorizationPhase::Expired => "lock expired",
    }
}

async fn report_spend_state(session: &WalletSession, token: &Token) -> Result<()> {
    match session.reconcile(token).await {
        Ok(Reconciliation::Unchanged(_)) => {
            print_success("All proofs are unspent.");
        }
        Ok(Reconciliation::Repaired { token, removed }) => {
            print_warning(&format!(
                "{} proof(s) are already spent. Remaining value: {}",
                removed.len(),
                format_amount(token.value()?, &token.unit)
            ));
            println!();
            println!("Repaired token:");
            println!("{}", token.encode()?);
        }
        Err(LockError::AllProofsSpent) => {
            print_error("Every proof in this token has been spent.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Run the check command
pub async fn run(paths: &WalletPaths, token: &str, offline: bool) -> Result<()> {
    let config = paths.load_config()?;
    let token = read_token(token)?;
    let now = bth_ecash_lock::unix_time();

    println!();
    println!("Mint:  {}", token.mint_url);
    println!("Value: {}", format_amount(token.value()?, &token.unit));
    if let Some(memo) = &token.memo {
        println!("Memo:  {}", memo);
    }
    println!();

    for (i, report) in describe_token(&token, now)?.iter().enumerate() {
        let mut line = format!(
            "  {:>3}. {:>10}  {}",
            i + 1,
            report.amount,
            phase_label(report.phase)
        );
        if report.quorum > 0 {
            line.push_str(&format!(
                ", {} of {} signatures from {} keys",
                report.verified, report.quorum, report.keys
            ));
        }
        if let Some(locktime) = report.locktime {
            if let Some(at) = Utc.timestamp_opt(locktime as i64, 0).single() {
                line.push_str(&format!(", locktime {}", at.format("%Y-%m-%d %H:%M UTC")));
            }
        }
        println!("{}", line);
    }

    if offline {
        return Ok(());
    }

    println!();
    let mint = connect_mint(&config, &token.mint_url, &token.unit).await?;
    let session = build_session(&config, mint, Vec::new());
    report_spend_state(&session, &token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_ecash_lock::{
        CurrencyUnit, LockTags, LockTemplate, MintUrl, P2pkKeypair, Proof, Secret,
    };

    fn proof_with(secret: Secret) -> Proof {
        Proof {
            amount: 8,
            keyset_id: "009a1f293253e41e".to_string(),
            secret,
            c: String::new(),
            witness: None,
        }
    }

    #[test]
    fn test_describe_plain_and_locked() {
        let lock = P2pkKeypair::generate().public_key();
        let refund = P2pkKeypair::generate().public_key();
        let template = LockTemplate::new(
            lock,
            LockTags {
                locktime: Some(1_000),
                refund_keys: vec![refund],
                ..Default::default()
            },
        )
        .unwrap();

        let token = Token::new(
            MintUrl::from("https://mint.test"),
            CurrencyUnit::sat(),
            vec![
                proof_with(Secret::random()),
                proof_with(template.instantiate().to_secret().unwrap()),
            ],
        );

        let before = describe_token(&token, 999).unwrap();
        assert_eq!(before[0].phase, AuthorizationPhase::Unlocked);
        assert_eq!(before[1].phase, AuthorizationPhase::Lock);
        assert_eq!(before[1].quorum, 1);
        assert_eq!(before[1].verified, 0);
        assert_eq!(before[1].locktime, Some(1_000));

        let after = describe_token(&token, 1_000).unwrap();
        assert_eq!(after[1].phase, AuthorizationPhase::Refund);
    }
}
