//! Integration tests for bth-ecash-lock
//!
//! These tests drive the engine against an in-memory mint that performs real
//! blind signatures and witness verification:
//! - Authorization and witness collection (single key, multisig, refund)
//! - Token repair after partial spends
//! - Locking and redeeming through a swap
//! - Melt fee negotiation and settlement

use std::{collections::HashSet, sync::Arc};

use assert_matches::assert_matches;
use bth_ecash_lock::{
    active_signers, verify_witness, ActiveSigners, AuthorizationPhase, Clock, CustodialSigner,
    ExternalSchnorrBackend, ExternalSigner, LockError, LockPolicy, LockTags, LockTemplate,
    ManualKeySigner, MeltNegotiator, MintBoundary, OfferOutcome, OutputRequest, P2pkKeypair,
    PaymentTarget, Proof, ProofReconciler, PublicKey, QuoteState, Reconciliation, SecretCodec,
    Signature, Token, WalletSession, WitnessCollector,
};
use bth_ecash_lock_test_utils::{
    keypairs, mock_invoice, multisig_template, public_keys, MockMint, ScriptedResolver,
};

const MINT_URL: &str = "https://mint.test";
const NOW: u64 = 1_700_000_000;

/// Swap fresh value into proofs locked by `template`.
async fn locked_proofs(mint: &MockMint, amount: u64, template: LockTemplate) -> Vec<Proof> {
    let source = mint.issue(amount);
    let mut groups = mint
        .split_or_swap(&source.proofs, &[OutputRequest::locked(amount, template)])
        .await
        .unwrap();
    groups.remove(0)
}

// ============================================================================
// Authorization and Witness Collection
// ============================================================================

mod witness_collection {
    use super::*;

    #[tokio::test]
    async fn test_single_key_satisfied_after_one_offer() {
        let mint = MockMint::new(MINT_URL);
        let owner = P2pkKeypair::generate();
        let refund = P2pkKeypair::generate();
        let template = LockTemplate::new(
            owner.public_key(),
            LockTags {
                locktime: Some(NOW + 3600),
                refund_keys: vec![refund.public_key()],
                ..Default::default()
            },
        )
        .unwrap();
        let proof = locked_proofs(&mint, 1, template).await.remove(0);

        let mut collector = WitnessCollector::new(proof, NOW).unwrap();
        assert!(!collector.is_satisfied());

        let signer = CustodialSigner::new(vec![owner.clone()]);
        assert_eq!(
            collector.offer(&signer).await,
            OfferOutcome::Accepted(owner.public_key())
        );
        assert!(collector.is_satisfied());
        assert!(verify_witness(&collector.finish().unwrap(), NOW).is_ok());
    }

    #[tokio::test]
    async fn test_multisig_satisfied_on_second_distinct_signer() {
        let mint = MockMint::new(MINT_URL);
        let keys = keypairs(3);
        let template = multisig_template(&public_keys(&keys), 2);
        let proof = locked_proofs(&mint, 1, template).await.remove(0);

        let mut collector = WitnessCollector::new(proof, NOW).unwrap();

        // Signer #2 first.
        let second = ManualKeySigner::new(keys[1].clone());
        assert_matches!(collector.offer(&second).await, OfferOutcome::Accepted(_));
        assert!(!collector.is_satisfied());

        // Signer #2 again does not help.
        assert_matches!(collector.offer(&second).await, OfferOutcome::Duplicate(_));
        assert_eq!(collector.verified_signers().count(), 1);
        assert!(!collector.is_satisfied());

        // Signer #1 completes the quorum.
        let first = ManualKeySigner::new(keys[0].clone());
        assert_matches!(collector.offer(&first).await, OfferOutcome::Accepted(_));
        assert!(collector.is_satisfied());
    }

    #[tokio::test]
    async fn test_rejected_signature_is_not_fatal() {
        let mint = MockMint::new(MINT_URL);
        let owner = P2pkKeypair::generate();
        let proof = locked_proofs(&mint, 2, LockTemplate::single_key(owner.public_key()))
            .await
            .remove(0);

        let mut collector = WitnessCollector::new(proof, NOW).unwrap();
        let stranger = ManualKeySigner::new(P2pkKeypair::generate());
        assert_eq!(collector.offer(&stranger).await, OfferOutcome::Rejected);

        let owner_signer = ManualKeySigner::new(owner);
        assert_matches!(collector.offer(&owner_signer).await, OfferOutcome::Accepted(_));
        assert!(collector.is_satisfied());
    }

    #[test]
    fn test_locktime_passed_without_refund_is_effectively_unlocked() {
        let owner = P2pkKeypair::generate();
        let condition = LockTemplate::new(
            owner.public_key(),
            LockTags {
                locktime: Some(NOW),
                ..Default::default()
            },
        )
        .unwrap()
        .instantiate();

        let active = active_signers(&condition, NOW + 1);
        assert_eq!(
            active,
            ActiveSigners {
                phase: AuthorizationPhase::Expired,
                keys: vec![],
                quorum: 0,
            }
        );
    }

    #[test]
    fn test_switchover_is_a_hard_boundary() {
        let lock_keys = public_keys(&keypairs(2));
        let refund_keys = public_keys(&keypairs(2));
        let condition = LockTemplate::new(
            lock_keys[0],
            LockTags {
                locktime: Some(NOW),
                additional_lock_keys: vec![lock_keys[1]],
                refund_keys: refund_keys.clone(),
                ..Default::default()
            },
        )
        .unwrap()
        .instantiate();

        assert_eq!(active_signers(&condition, NOW - 1).keys, lock_keys);
        assert_eq!(active_signers(&condition, NOW).keys, refund_keys);
    }

    #[tokio::test]
    async fn test_refund_key_takes_over_after_locktime() {
        let mint = MockMint::new(MINT_URL);
        let owner = P2pkKeypair::generate();
        let refund = P2pkKeypair::generate();
        let policy = LockPolicy::to_key(owner.public_key())
            .with_refund(NOW, vec![refund.public_key()]);
        let source = mint.issue(8);

        let locked = bth_ecash_lock::TokenBuilder::new(&mint)
            .lock(&source, &policy)
            .await
            .unwrap()
            .token;

        // Owner can no longer sign once the locktime is reached.
        mint.set_now(NOW);
        let owner_only = CustodialSigner::new(vec![owner]);
        let result = bth_ecash_lock::witness_token(&locked, &[&owner_only], NOW).await;
        assert_matches!(result, Err(LockError::Unsatisfiable { .. }));

        let refund_signer = CustodialSigner::new(vec![refund]);
        let witnessed = bth_ecash_lock::witness_token(&locked, &[&refund_signer], NOW)
            .await
            .unwrap();
        let redeemed = bth_ecash_lock::TokenBuilder::new(&mint)
            .unlock(&witnessed)
            .await
            .unwrap();
        assert_eq!(redeemed.iter().map(|p| p.amount).sum::<u64>(), 8);
    }

    #[test]
    fn test_sig_all_rejected_before_witness_stage() {
        let key = P2pkKeypair::generate().public_key();
        let raw = format!(
            r#"["P2PK",{{"nonce":"5d11913ee0f92fefdc82a6764fd2457a","data":"{}","tags":[["sigflag","SIG_ALL"]]}}]"#,
            key.to_hex()
        );
        assert_matches!(SecretCodec::parse(&raw), Err(LockError::UnsupportedSigFlag(_)));

        let proof = Proof {
            amount: 1,
            keyset_id: "00ad268c4d1f5826".to_string(),
            secret: bth_ecash_lock::Secret::new(raw),
            c: String::new(),
            witness: None,
        };
        assert_matches!(
            WitnessCollector::new(proof, NOW),
            Err(LockError::UnsupportedSigFlag(_))
        );
    }
}

// ============================================================================
// Token Repair
// ============================================================================

mod reconciliation {
    use super::*;

    #[tokio::test]
    async fn test_partially_spent_token_is_repaired() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue_each(&[100, 100, 100]);
        let encoded = token.encode().unwrap();
        mint.mark_spent(&token.proofs[..1]);

        let result = ProofReconciler::new(&mint).reconcile(&token).await.unwrap();
        let Reconciliation::Repaired { token: repaired, removed } = result else {
            panic!("expected a repaired token");
        };
        assert_eq!(repaired.proofs.len(), 2);
        assert_eq!(repaired.value().unwrap(), 200);
        assert_eq!(removed, vec![token.proofs[0].clone()]);
        // The original encoding no longer describes spendable value.
        assert_ne!(repaired.encode().unwrap(), encoded);
    }

    #[tokio::test]
    async fn test_intact_token_is_unchanged() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue_each(&[1, 2, 4]);
        let result = ProofReconciler::new(&mint).reconcile(&token).await.unwrap();
        assert_eq!(result, Reconciliation::Unchanged(token));
    }

    #[tokio::test]
    async fn test_fully_spent_token_fails() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue_each(&[1, 2]);
        mint.mark_spent(&token.proofs);
        assert_matches!(
            ProofReconciler::new(&mint).reconcile(&token).await,
            Err(LockError::AllProofsSpent)
        );
    }

    #[tokio::test]
    async fn test_pending_counts_as_spent() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue_each(&[1, 2]);
        mint.mark_pending(&token.proofs[1..]);

        let partition = ProofReconciler::new(&mint)
            .partition(&token.proofs)
            .await
            .unwrap();
        assert_eq!(partition.unspent, vec![token.proofs[0].clone()]);
        assert_eq!(partition.spent, vec![token.proofs[1].clone()]);
    }

    #[tokio::test]
    async fn test_duplicate_proofs_are_dropped() {
        let mint = MockMint::new(MINT_URL);
        let mut token = mint.issue_each(&[4, 8]);
        token.proofs.push(token.proofs[0].clone());

        let result = ProofReconciler::new(&mint).reconcile(&token).await.unwrap();
        let Reconciliation::Repaired { token: repaired, removed } = result else {
            panic!("duplicates must be reported as a repair");
        };
        assert_eq!(repaired.value().unwrap(), 12);
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue_each(&[1, 2, 4]);
        mint.mark_spent(&token.proofs[2..]);

        let reconciler = ProofReconciler::new(&mint);
        let first = reconciler.reconcile(&token).await.unwrap();
        let second = reconciler.reconcile(&token).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_other_mint_fails_fast() {
        let mint = MockMint::new(MINT_URL);
        let other = MockMint::new("https://other.mint");
        let token = other.issue(4);

        assert_matches!(
            ProofReconciler::new(&mint).reconcile(&token).await,
            Err(LockError::MintMismatch { .. })
        );
        assert_eq!(mint.check_state_calls(), 0);
    }

    #[tokio::test]
    async fn test_other_unit_fails_fast() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue(4);
        let usd = Token::new(token.mint_url.clone(), "usd".into(), token.proofs);
        assert_matches!(
            ProofReconciler::new(&mint).reconcile(&usd).await,
            Err(LockError::UnitMismatch { .. })
        );
    }
}

// ============================================================================
// Locking and Redeeming
// ============================================================================

mod lock_and_redeem {
    use super::*;

    struct FixedBackend(P2pkKeypair);

    #[async_trait::async_trait]
    impl ExternalSchnorrBackend for FixedBackend {
        async fn public_key(&self) -> Result<PublicKey, String> {
            Ok(self.0.public_key())
        }

        async fn sign_schnorr(&self, message: &[u8]) -> Result<Option<Signature>, String> {
            self.0.sign(message).map(Some).map_err(|e| e.to_string())
        }
    }

    #[tokio::test]
    async fn test_lock_splits_value_and_redeems() {
        let mint = Arc::new(MockMint::new(MINT_URL));
        let owner = P2pkKeypair::generate();
        let session = WalletSession::new(mint.clone())
            .with_signer(Arc::new(CustodialSigner::new(vec![owner.clone()])));

        let source = mint.issue(64);
        let locked = session
            .lock(&source, &LockPolicy::to_key(owner.public_key()).with_amount(40))
            .await
            .unwrap();
        assert_eq!(locked.token.value().unwrap(), 40);
        assert_eq!(locked.change.as_ref().unwrap().value().unwrap(), 24);
        for proof in &locked.token.proofs {
            let condition = proof.secret.locking_condition().unwrap().unwrap();
            assert_eq!(condition.primary_key, owner.public_key());
        }

        // Every locked proof has its own secret.
        let secrets: HashSet<_> = locked.token.proofs.iter().map(|p| &p.secret).collect();
        assert_eq!(secrets.len(), locked.token.proofs.len());

        let redeemed = session.redeem(&locked.token).await.unwrap();
        assert_eq!(redeemed.iter().map(|p| p.amount).sum::<u64>(), 40);
        assert!(redeemed
            .iter()
            .all(|p| p.secret.locking_condition().unwrap().is_none()));
    }

    #[tokio::test]
    async fn test_lock_more_than_available_fails() {
        let mint = MockMint::new(MINT_URL);
        let source = mint.issue(10);
        let policy = LockPolicy::to_key(P2pkKeypair::generate().public_key()).with_amount(11);
        assert_matches!(
            bth_ecash_lock::TokenBuilder::new(&mint).lock(&source, &policy).await,
            Err(LockError::InsufficientValue {
                needed: 11,
                available: 10
            })
        );
        assert_eq!(mint.swaps(), 0);
    }

    #[tokio::test]
    async fn test_input_fee_is_deducted() {
        let mint = MockMint::new(MINT_URL).with_input_fee_ppk(1000);
        let source = mint.issue_each(&[4, 4]);
        let policy = LockPolicy::to_key(P2pkKeypair::generate().public_key());
        let locked = bth_ecash_lock::TokenBuilder::new(&mint)
            .lock(&source, &policy)
            .await
            .unwrap();
        assert_eq!(locked.token.value().unwrap(), 6);
        assert!(locked.change.is_none());
    }

    #[tokio::test]
    async fn test_blinded_lock_needs_blind_aware_signer() {
        let mint = Arc::new(MockMint::new(MINT_URL));
        let owner = P2pkKeypair::generate();
        let policy = LockPolicy {
            blind_keys: true,
            ..LockPolicy::to_key(owner.public_key())
        };
        let locked = WalletSession::new(mint.clone())
            .lock(&mint.issue(16), &policy)
            .await
            .unwrap()
            .token;

        let embedded = locked.proofs[0]
            .secret
            .locking_condition()
            .unwrap()
            .unwrap()
            .primary_key;
        assert_ne!(embedded, owner.public_key());
        assert_eq!(embedded, mint.blind_key(&owner.public_key()).unwrap());

        // The external signer only knows the plain key.
        let external = WalletSession::new(mint.clone())
            .with_signer(Arc::new(ExternalSigner::new(Arc::new(FixedBackend(owner.clone())))));
        assert_matches!(
            external.redeem(&locked).await,
            Err(LockError::Unsatisfiable { .. })
        );

        let custodial = WalletSession::new(mint.clone()).with_signer(Arc::new(
            CustodialSigner::new(vec![owner]).with_mint(mint.mint_url().clone()),
        ));
        let redeemed = custodial.redeem(&locked).await.unwrap();
        assert_eq!(redeemed.iter().map(|p| p.amount).sum::<u64>(), 16);
    }

    #[tokio::test]
    async fn test_signers_tried_in_session_order() {
        let mint = Arc::new(MockMint::new(MINT_URL));
        let keys = keypairs(3);
        let template = multisig_template(&public_keys(&keys), 2);
        let proofs = locked_proofs(&mint, 4, template).await;
        let token = Token::new(mint.mint_url().clone(), Default::default(), proofs);

        let session = WalletSession::new(mint.clone())
            .with_signer(Arc::new(ExternalSigner::absent()))
            .with_signer(Arc::new(CustodialSigner::new(vec![keys[2].clone()])))
            .with_signer(Arc::new(ManualKeySigner::new(keys[0].clone())));
        let witnessed = session.witness(&token).await.unwrap();
        for proof in &witnessed.proofs {
            assert_eq!(proof.witness.as_ref().unwrap().signatures.len(), 2);
        }
        assert_eq!(session.redeem(&token).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_lock_redeems_without_signature() {
        let mint = Arc::new(MockMint::new(MINT_URL));
        mint.set_now(NOW);
        let template = LockTemplate::new(
            P2pkKeypair::generate().public_key(),
            LockTags {
                locktime: Some(NOW - 1),
                ..Default::default()
            },
        )
        .unwrap();
        let proofs = locked_proofs(&mint, 2, template).await;
        let token = Token::new(mint.mint_url().clone(), Default::default(), proofs);

        let session = WalletSession::new(mint.clone()).with_clock(Clock::Fixed(NOW));
        assert_eq!(session.redeem(&token).await.unwrap()[0].amount, 2);
    }
}

// ============================================================================
// Melt Negotiation
// ============================================================================

mod melt {
    use super::*;

    const ADDRESS: &str = "alice@wallet.test";

    fn address() -> PaymentTarget {
        PaymentTarget::Address(ADDRESS.to_string())
    }

    /// Reserve of 22 for large invoices, 10 otherwise.
    fn stepped_fee(amount: u64) -> u64 {
        if amount >= 985 {
            22
        } else {
            10
        }
    }

    #[tokio::test]
    async fn test_shrinks_once_and_converges() {
        let mint = MockMint::new(MINT_URL).with_fee_schedule(stepped_fee);
        let resolver = ScriptedResolver::new(1, 1_000_000);
        let token = mint.issue(1000);

        let negotiated = MeltNegotiator::new(&mint)
            .with_resolver(&resolver)
            .negotiate(&token, &address())
            .await
            .unwrap();

        assert_eq!(resolver.requested(), vec![990, 977]);
        assert_eq!(negotiated.rounds, 2);
        assert_eq!(negotiated.quote.amount, 977);
        assert!(negotiated.quote.total() <= 1000);
    }

    #[tokio::test]
    async fn test_settle_returns_change() {
        let mint = MockMint::new(MINT_URL).with_fee_schedule(stepped_fee);
        let resolver = ScriptedResolver::new(1, 1_000_000);
        let token = mint.issue(1000);
        let negotiator = MeltNegotiator::new(&mint).with_resolver(&resolver);

        let negotiated = negotiator.negotiate(&token, &address()).await.unwrap();
        let settlement = negotiator.settle(&token, &negotiated.quote).await.unwrap();

        assert_eq!(settlement.state, QuoteState::Paid);
        assert!(settlement.preimage.is_some());
        // 1000 - 977 - 10 / 2
        assert_eq!(settlement.change.unwrap().value().unwrap(), 18);
    }

    #[tokio::test]
    async fn test_adversarial_fees_stop_at_round_cap() {
        let mint = MockMint::new(MINT_URL).with_fee_schedule(|_| 1000);
        let resolver = ScriptedResolver::new(1, 1_000_000);
        let token = mint.issue(1000);

        let result = MeltNegotiator::new(&mint)
            .with_resolver(&resolver)
            .negotiate(&token, &address())
            .await;
        assert_matches!(
            result,
            Err(LockError::NegotiationDidNotConverge {
                rounds: bth_ecash_lock::MAX_NEGOTIATION_ROUNDS
            })
        );
        assert_eq!(
            resolver.requested().len(),
            bth_ecash_lock::MAX_NEGOTIATION_ROUNDS as usize
        );
    }

    #[tokio::test]
    async fn test_shrinking_below_range_is_insufficient_value() {
        let mint = MockMint::new(MINT_URL).with_fee_schedule(|_| 1000);
        let resolver = ScriptedResolver::new(300, 1_000_000);
        let token = mint.issue(1000);

        let result = MeltNegotiator::new(&mint)
            .with_resolver(&resolver)
            .negotiate(&token, &address())
            .await;
        assert_matches!(result, Err(LockError::InsufficientValue { .. }));
        assert!(resolver.requested().iter().all(|amount| *amount >= 300));
    }

    #[tokio::test]
    async fn test_initial_estimate_clamped_to_range_max() {
        let mint = MockMint::new(MINT_URL);
        let resolver = ScriptedResolver::new(1, 500);
        let token = mint.issue(1000);

        let negotiated = MeltNegotiator::new(&mint)
            .with_resolver(&resolver)
            .negotiate(&token, &address())
            .await
            .unwrap();
        assert_eq!(resolver.requested(), vec![500]);
        assert_eq!(negotiated.rounds, 1);
    }

    #[tokio::test]
    async fn test_fixed_invoice_is_quoted_once() {
        let mint = MockMint::new(MINT_URL);
        let token = mint.issue(100);

        let fits = PaymentTarget::Invoice(mock_invoice(90));
        let negotiated = MeltNegotiator::new(&mint)
            .negotiate(&token, &fits)
            .await
            .unwrap();
        assert_eq!(negotiated.quote.amount, 90);

        let too_big = PaymentTarget::Invoice(mock_invoice(99));
        assert_matches!(
            MeltNegotiator::new(&mint).negotiate(&token, &too_big).await,
            Err(LockError::InsufficientValue {
                needed: 101,
                available: 100
            })
        );
        assert_eq!(mint.melt_quote_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_non_native_unit_converts_first() {
        // One unit costs two sats.
        let mint = MockMint::new(MINT_URL).with_unit("usd", 2, 1);
        let resolver = ScriptedResolver::new(1, 1_000_000);
        let token = mint.issue(500);

        let negotiated = MeltNegotiator::new(&mint)
            .with_resolver(&resolver)
            .negotiate(&token, &address())
            .await
            .unwrap();
        assert_eq!(resolver.requested(), vec![990]);
        assert_eq!(negotiated.quote.amount, 495);
        assert!(negotiated.quote.total() <= 500);
    }

    #[tokio::test]
    async fn test_unpaid_melt_is_payment_failure() {
        let mint = MockMint::new(MINT_URL).with_melt_state(QuoteState::Unpaid);
        let token = mint.issue(100);
        let negotiator = MeltNegotiator::new(&mint);
        let negotiated = negotiator
            .negotiate(&token, &PaymentTarget::Invoice(mock_invoice(50)))
            .await
            .unwrap();
        assert_matches!(
            negotiator.settle(&token, &negotiated.quote).await,
            Err(LockError::PaymentFailed(_))
        );
    }

    #[tokio::test]
    async fn test_session_melt_learns_fee_rate() {
        let mint = Arc::new(MockMint::new(MINT_URL).with_fee_schedule(stepped_fee));
        let resolver = ScriptedResolver::new(1, 1_000_000);
        let mut session = WalletSession::new(mint.clone());

        let (negotiated, settlement) = session
            .melt(&mint.issue(1000), &address(), Some(&resolver))
            .await
            .unwrap();
        assert_eq!(negotiated.rounds, 2);
        assert_eq!(settlement.state, QuoteState::Paid);
        // 10 reserve on 977 rounds up to 10236 ppm.
        assert_eq!(session.fee_policy().fee_rate_ppm, 10_236);
    }
}
