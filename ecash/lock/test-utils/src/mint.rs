// Copyright (c) 2024 The Botho Foundation

//! In-memory mint with real blind signatures and witness checks.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bth_crypto_p2pk::{
    blind_message, sign_blinded, unblind_signature, verify_unblinded, P2pkKeypair,
};
use bth_ecash_lock::{
    total_amount, verify_witness, CurrencyUnit, LockError, MeltOutcome, MeltQuote, MintBoundary,
    MintQuote, MintUrl, OutputRequest, Proof, Quote, QuoteRequest, QuoteState, Secret, SpendState,
    Token, PAYMENT_CONFIRMATION_WINDOW,
};
use parking_lot::Mutex;

use crate::{invoice_amount, mock_invoice};

type FeeSchedule = Box<dyn Fn(u64) -> u64 + Send + Sync>;

/// Split `amount` into powers of two, largest first.
pub fn split_amount(amount: u64) -> Vec<u64> {
    (0..64)
        .rev()
        .map(|bit| 1u64 << bit)
        .filter(|denomination| amount & denomination != 0)
        .collect()
}

#[derive(Default)]
struct MintState {
    spent: HashSet<Secret>,
    pending: HashSet<Secret>,
    quotes: HashMap<String, MeltQuote>,
    next_quote: u64,
    now: Option<u64>,
    check_state_calls: usize,
    melt_quote_requests: Vec<String>,
    swaps: usize,
}

/// A single-keyset mint living in memory.
pub struct MockMint {
    url: MintUrl,
    unit: CurrencyUnit,
    keyset_id: String,
    key: P2pkKeypair,
    input_fee_ppk: u64,
    /// `(sats, units)`: `units` token units cost `sats` native units.
    conversion: Option<(u64, u64)>,
    fee_schedule: FeeSchedule,
    melt_state: QuoteState,
    melt_times_out: bool,
    state: Mutex<MintState>,
}

impl MockMint {
    pub fn new(url: &str) -> Self {
        Self {
            url: MintUrl::from(url),
            unit: CurrencyUnit::sat(),
            keyset_id: "00ad268c4d1f5826".to_string(),
            key: P2pkKeypair::generate(),
            input_fee_ppk: 0,
            conversion: None,
            fee_schedule: Box::new(|amount| (amount / 100).max(2)),
            melt_state: QuoteState::Paid,
            melt_times_out: false,
            state: Mutex::new(MintState::default()),
        }
    }

    /// Serve a non-native unit where `units` cost `sats`.
    pub fn with_unit(mut self, unit: &str, sats: u64, units: u64) -> Self {
        self.unit = CurrencyUnit::from(unit);
        self.conversion = Some((sats, units));
        self
    }

    /// Fee reserve as a function of the quoted amount.
    pub fn with_fee_schedule(mut self, schedule: impl Fn(u64) -> u64 + Send + Sync + 'static) -> Self {
        self.fee_schedule = Box::new(schedule);
        self
    }

    pub fn with_input_fee_ppk(mut self, ppk: u64) -> Self {
        self.input_fee_ppk = ppk;
        self
    }

    /// State reported after paying a melt quote.
    pub fn with_melt_state(mut self, state: QuoteState) -> Self {
        self.melt_state = state;
        self
    }

    /// Take melt inputs as pending, then never answer the melt request.
    pub fn with_melt_timeout(mut self) -> Self {
        self.melt_times_out = true;
        self
    }

    /// Freeze the mint's clock used for witness checks.
    pub fn set_now(&self, now: u64) {
        self.state.lock().now = Some(now);
    }

    fn now(&self) -> u64 {
        self.state
            .lock()
            .now
            .unwrap_or_else(bth_ecash_lock::unix_time)
    }

    fn sign_secret(&self, secret: Secret, amount: u64) -> Proof {
        let (blinded, factor) = blind_message(secret.as_bytes(), None).unwrap();
        let blinded_signature = sign_blinded(&self.key, &blinded).unwrap();
        let c = unblind_signature(&blinded_signature, &factor, &self.key.public_key()).unwrap();
        Proof {
            amount,
            keyset_id: self.keyset_id.clone(),
            secret,
            c: c.to_hex(),
            witness: None,
        }
    }

    fn issue_output(&self, output: &OutputRequest) -> Result<Vec<Proof>, LockError> {
        split_amount(output.amount)
            .into_iter()
            .map(|amount| {
                let secret = match &output.lock {
                    Some(template) => template.instantiate().to_secret()?,
                    None => Secret::random(),
                };
                Ok(self.sign_secret(secret, amount))
            })
            .collect()
    }

    /// Issue fresh plain proofs worth `amount`.
    pub fn issue(&self, amount: u64) -> Token {
        let proofs = self.issue_output(&OutputRequest::plain(amount)).unwrap();
        Token::new(self.url.clone(), self.unit.clone(), proofs)
    }

    /// Issue one plain proof per listed amount.
    pub fn issue_each(&self, amounts: &[u64]) -> Token {
        let proofs = amounts
            .iter()
            .map(|amount| self.sign_secret(Secret::random(), *amount))
            .collect();
        Token::new(self.url.clone(), self.unit.clone(), proofs)
    }

    /// Redeem `proofs` behind the wallet's back.
    pub fn mark_spent(&self, proofs: &[Proof]) {
        let mut state = self.state.lock();
        state.spent.extend(proofs.iter().map(|p| p.secret.clone()));
    }

    pub fn mark_pending(&self, proofs: &[Proof]) {
        let mut state = self.state.lock();
        state.pending.extend(proofs.iter().map(|p| p.secret.clone()));
    }

    pub fn check_state_calls(&self) -> usize {
        self.state.lock().check_state_calls
    }

    /// Invoices melt quotes were requested for, in order.
    pub fn melt_quote_requests(&self) -> Vec<String> {
        self.state.lock().melt_quote_requests.clone()
    }

    pub fn swaps(&self) -> usize {
        self.state.lock().swaps
    }

    /// Reject inputs the way a real mint would.
    fn validate_inputs(&self, inputs: &[Proof]) -> Result<u64, LockError> {
        let now = self.now();
        let state = self.state.lock();
        let mut seen = HashSet::new();
        for proof in inputs {
            if !seen.insert(&proof.secret) {
                return Err(LockError::MintRequest("duplicate inputs".to_string()));
            }
            if state.spent.contains(&proof.secret) || state.pending.contains(&proof.secret) {
                return Err(LockError::MintRequest("token already spent".to_string()));
            }
            let c = proof
                .c
                .parse()
                .map_err(|_| LockError::MintRequest("invalid proof signature".to_string()))?;
            if !verify_unblinded(&self.key, proof.secret.as_bytes(), &c)? {
                return Err(LockError::MintRequest("proof not signed by mint".to_string()));
            }
            verify_witness(proof, now)
                .map_err(|e| LockError::MintRequest(format!("witness check failed: {e}")))?;
        }
        total_amount(inputs)
    }

    fn unit_amount(&self, sats: u64) -> u64 {
        match self.conversion {
            Some((rate_sats, units)) => (sats * units).div_ceil(rate_sats),
            None => sats,
        }
    }
}

#[async_trait]
impl MintBoundary for MockMint {
    fn mint_url(&self) -> &MintUrl {
        &self.url
    }

    fn unit(&self) -> &CurrencyUnit {
        &self.unit
    }

    async fn check_state(&self, proofs: &[Proof]) -> Result<Vec<SpendState>, LockError> {
        let mut state = self.state.lock();
        state.check_state_calls += 1;
        Ok(proofs
            .iter()
            .map(|proof| {
                if state.spent.contains(&proof.secret) {
                    SpendState::Spent
                } else if state.pending.contains(&proof.secret) {
                    SpendState::Pending
                } else {
                    SpendState::Unspent
                }
            })
            .collect())
    }

    async fn create_quote(&self, request: QuoteRequest) -> Result<Quote, LockError> {
        let mut state = self.state.lock();
        state.next_quote += 1;
        let id = format!("quote-{}", state.next_quote);

        match request {
            QuoteRequest::Mint { amount } => {
                let native_amount = match self.conversion {
                    Some((sats, units)) => amount * sats / units,
                    None => amount,
                };
                Ok(Quote::Mint(MintQuote {
                    id,
                    amount,
                    request: mock_invoice(native_amount),
                    native_amount: Some(native_amount),
                }))
            }
            QuoteRequest::Melt { request } => {
                state.melt_quote_requests.push(request.clone());
                let sats = invoice_amount(&request).ok_or_else(|| {
                    LockError::MintRequest(format!("cannot read invoice {request}"))
                })?;
                let amount = self.unit_amount(sats);
                let quote = MeltQuote {
                    id: id.clone(),
                    amount,
                    fee_reserve: (self.fee_schedule)(amount),
                    request,
                    state: QuoteState::Unpaid,
                    expiry: None,
                };
                state.quotes.insert(id, quote.clone());
                Ok(Quote::Melt(quote))
            }
        }
    }

    async fn pay_quote(&self, quote: &MeltQuote, proofs: &[Proof]) -> Result<MeltOutcome, LockError> {
        if !self.state.lock().quotes.contains_key(&quote.id) {
            return Err(LockError::MintRequest(format!("unknown quote {}", quote.id)));
        }
        let total = self.validate_inputs(proofs)?;
        if total < quote.total() {
            return Err(LockError::MintRequest("inputs do not cover quote".to_string()));
        }

        if self.melt_times_out {
            let mut state = self.state.lock();
            state
                .pending
                .extend(proofs.iter().map(|p| p.secret.clone()));
            return Err(LockError::PaymentTimedOut(PAYMENT_CONFIRMATION_WINDOW));
        }

        if self.melt_state == QuoteState::Unpaid {
            return Ok(MeltOutcome {
                state: QuoteState::Unpaid,
                preimage: None,
                change: Vec::new(),
            });
        }

        {
            let mut state = self.state.lock();
            let secrets = proofs.iter().map(|p| p.secret.clone());
            if self.melt_state == QuoteState::Pending {
                state.pending.extend(secrets);
            } else {
                state.spent.extend(secrets);
            }
        }

        // Half the reserve is used by routing; the rest comes back.
        let change_amount = total - quote.amount - quote.fee_reserve / 2;
        let change = if change_amount > 0 && self.melt_state == QuoteState::Paid {
            self.issue_output(&OutputRequest::plain(change_amount))?
        } else {
            Vec::new()
        };
        Ok(MeltOutcome {
            state: self.melt_state,
            preimage: (self.melt_state == QuoteState::Paid).then(|| "00".repeat(32)),
            change,
        })
    }

    async fn split_or_swap(
        &self,
        inputs: &[Proof],
        outputs: &[OutputRequest],
    ) -> Result<Vec<Vec<Proof>>, LockError> {
        let total = self.validate_inputs(inputs)?;
        let requested = outputs.iter().map(|o| o.amount).sum::<u64>();
        let fee = self.input_fee(inputs);
        if requested + fee != total {
            return Err(LockError::MintRequest(format!(
                "outputs {requested} plus fee {fee} do not match inputs {total}"
            )));
        }

        {
            let mut state = self.state.lock();
            state.spent.extend(inputs.iter().map(|p| p.secret.clone()));
            state.swaps += 1;
        }
        outputs.iter().map(|output| self.issue_output(output)).collect()
    }

    fn input_fee(&self, proofs: &[Proof]) -> u64 {
        (proofs.len() as u64 * self.input_fee_ppk).div_ceil(1000)
    }
}
