//! HTTP Mint Client
//!
//! Implements [`MintBoundary`] over a mint's Cashu v1 REST API:
//!
//! - keysets and keys are fetched once when connecting
//! - outputs are split into power-of-two denominations and blinded locally
//! - idempotent requests are retried on transport failures and 5xx answers
//! - melt change comes back through blank outputs

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use bth_crypto_p2pk::{blind_message, hash_to_curve, unblind_signature, BlindingFactor};
use bth_ecash_lock::{
    Confirmation, ConfirmationWatcher, CurrencyUnit, LockError, MeltOutcome, MeltQuote,
    MintBoundary, MintQuote, MintUrl, OutputRequest, Proof, PublicKey, Quote, QuoteRequest,
    QuoteState, Secret, SpendState, PAYMENT_CONFIRMATION_WINDOW,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lnurl::invoice_amount;

/// Attempts for requests that are safe to repeat
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries, multiplied by the attempt number
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// How often a pending melt quote is polled
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct KeysetsResponse {
    keysets: Vec<KeysetInfo>,
}

#[derive(Debug, Deserialize)]
struct KeysetInfo {
    id: String,
    unit: String,
    active: bool,
    #[serde(default)]
    input_fee_ppk: u64,
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    keysets: Vec<KeysetKeys>,
}

#[derive(Debug, Deserialize)]
struct KeysetKeys {
    id: String,
    keys: BTreeMap<String, PublicKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlindedMessage {
    amount: u64,
    id: String,
    #[serde(rename = "B_")]
    blinded: PublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlindSignature {
    amount: u64,
    id: String,
    #[serde(rename = "C_")]
    signature: PublicKey,
}

#[derive(Debug, Serialize)]
struct CheckStateRequest {
    #[serde(rename = "Ys")]
    ys: Vec<PublicKey>,
}

#[derive(Debug, Deserialize)]
struct CheckStateResponse {
    states: Vec<ProofStateEntry>,
}

#[derive(Debug, Deserialize)]
struct ProofStateEntry {
    #[serde(rename = "Y")]
    y: PublicKey,
    state: SpendState,
}

#[derive(Debug, Serialize)]
struct SwapRequest<'a> {
    inputs: &'a [Proof],
    outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    signatures: Vec<BlindSignature>,
}

#[derive(Debug, Serialize)]
struct MintQuoteRequest<'a> {
    amount: u64,
    unit: &'a str,
}

#[derive(Debug, Deserialize)]
struct MintQuoteResponse {
    quote: String,
    request: String,
}

#[derive(Debug, Serialize)]
struct MeltQuoteRequest<'a> {
    request: &'a str,
    unit: &'a str,
}

/// Melt quote as returned by the quote and status endpoints. Older mints
/// report `paid` instead of `state`.
#[derive(Debug, Deserialize)]
struct MeltQuoteResponse {
    quote: String,
    amount: u64,
    fee_reserve: u64,
    #[serde(default)]
    state: Option<QuoteState>,
    #[serde(default)]
    paid: Option<bool>,
    #[serde(default)]
    expiry: Option<u64>,
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    payment_preimage: Option<String>,
}

impl MeltQuoteResponse {
    fn state(&self) -> QuoteState {
        match (self.state, self.paid) {
            (Some(state), _) => state,
            (None, Some(true)) => QuoteState::Paid,
            _ => QuoteState::Unpaid,
        }
    }
}

#[derive(Debug, Serialize)]
struct MeltRequest<'a> {
    quote: &'a str,
    inputs: &'a [Proof],
    outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Deserialize)]
struct MeltResponse {
    #[serde(default)]
    state: Option<QuoteState>,
    #[serde(default)]
    paid: Option<bool>,
    #[serde(default)]
    payment_preimage: Option<String>,
    #[serde(default)]
    change: Vec<BlindSignature>,
}

/// Error body returned by the mint.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    code: Option<u64>,
}

impl ErrorResponse {
    fn describe(&self) -> String {
        let detail = self.detail.as_deref().unwrap_or("unknown error");
        match self.code {
            Some(code) => format!("mint error {code}: {detail}"),
            None => format!("mint error: {detail}"),
        }
    }
}

/// A blinded output waiting for the mint's signature.
#[derive(Clone)]
struct PendingOutput {
    message: BlindedMessage,
    secret: Secret,
    factor: BlindingFactor,
}

/// A failed request, and whether repeating it might help.
struct RequestFailure {
    error: LockError,
    transient: bool,
    /// No answer arrived before the request timeout.
    timed_out: bool,
}

impl RequestFailure {
    /// A melt that outlived `window` may still settle at the mint, so it is
    /// not reported as an ordinary request failure.
    fn into_melt_error(self, window: Duration) -> LockError {
        if self.timed_out {
            LockError::PaymentTimedOut(window)
        } else {
            self.error
        }
    }
}

/// Split `amount` into powers of two, smallest first.
pub fn split_amount(amount: u64) -> Vec<u64> {
    (0..64)
        .map(|bit| 1u64 << bit)
        .filter(|denomination| amount & denomination != 0)
        .collect()
}

/// Blank outputs needed to receive up to `fee_reserve` in change.
pub fn blank_output_count(fee_reserve: u64) -> usize {
    if fee_reserve == 0 {
        return 0;
    }
    // ceil(log2(fee_reserve)), at least one.
    let bits = 64 - (fee_reserve - 1).leading_zeros();
    bits.max(1) as usize
}

/// The active keyset of one unit.
#[derive(Debug, Clone)]
struct ActiveKeyset {
    id: String,
    keys: BTreeMap<u64, PublicKey>,
}

impl ActiveKeyset {
    fn key(&self, amount: u64) -> Result<&PublicKey, LockError> {
        self.keys.get(&amount).ok_or_else(|| {
            LockError::MintRequest(format!("keyset {} has no key for amount {amount}", self.id))
        })
    }

    fn blind(&self, amount: u64, secret: Secret) -> Result<PendingOutput, LockError> {
        self.key(amount)?;
        let (blinded, factor) = blind_message(secret.as_bytes(), None)?;
        Ok(PendingOutput {
            message: BlindedMessage {
                amount,
                id: self.id.clone(),
                blinded,
            },
            secret,
            factor,
        })
    }

    fn prepare(&self, output: &OutputRequest) -> Result<Vec<PendingOutput>, LockError> {
        split_amount(output.amount)
            .into_iter()
            .map(|amount| {
                let secret = match &output.lock {
                    Some(template) => template.instantiate().to_secret()?,
                    None => Secret::random(),
                };
                self.blind(amount, secret)
            })
            .collect()
    }

    fn unblind(&self, pending: PendingOutput, signature: &BlindSignature) -> Result<Proof, LockError> {
        if signature.id != self.id {
            return Err(LockError::MintRequest(format!(
                "signature from unexpected keyset {}",
                signature.id
            )));
        }
        let key = self.key(signature.amount)?;
        let c = unblind_signature(&signature.signature, &pending.factor, key)?;
        Ok(Proof {
            amount: signature.amount,
            keyset_id: signature.id.clone(),
            secret: pending.secret,
            c: c.to_hex(),
            witness: None,
        })
    }
}

/// A mint reached over HTTP, bound to one unit.
pub struct HttpMint {
    url: MintUrl,
    unit: CurrencyUnit,
    client: reqwest::Client,
    keyset: ActiveKeyset,
    /// Input fee per keyset id, in parts per thousand per proof
    input_fees: HashMap<String, u64>,
}

impl HttpMint {
    /// Fetch the mint's keysets and the active keys for `unit`.
    pub async fn connect(
        url: MintUrl,
        unit: CurrencyUnit,
        timeout: Duration,
    ) -> Result<Self, LockError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LockError::MintRequest(format!("failed to create HTTP client: {e}")))?;

        let keysets: KeysetsResponse = get_json(&client, &url.join("v1/keysets")).await?;
        let input_fees: HashMap<String, u64> = keysets
            .keysets
            .iter()
            .map(|k| (k.id.clone(), k.input_fee_ppk))
            .collect();

        let active = keysets
            .keysets
            .iter()
            .find(|k| k.active && CurrencyUnit::from(k.unit.as_str()) == unit)
            .ok_or_else(|| {
                LockError::MintRequest(format!("{url} has no active keyset for unit {unit}"))
            })?;

        let keys: KeysResponse =
            get_json(&client, &url.join(&format!("v1/keys/{}", active.id))).await?;
        let keyset = keys
            .keysets
            .into_iter()
            .find(|k| k.id == active.id)
            .ok_or_else(|| LockError::MintRequest(format!("keys for {} missing", active.id)))?;

        let keys = keyset
            .keys
            .into_iter()
            .map(|(amount, key)| {
                amount
                    .parse::<u64>()
                    .map(|amount| (amount, key))
                    .map_err(|_| LockError::MintRequest(format!("invalid key amount {amount}")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        info!(
            mint = %url,
            %unit,
            keyset = %keyset.id,
            input_fee_ppk = active.input_fee_ppk,
            "connected to mint"
        );

        Ok(Self {
            url,
            unit,
            client,
            keyset: ActiveKeyset {
                id: keyset.id,
                keys,
            },
            input_fees,
        })
    }

    pub fn keyset_id(&self) -> &str {
        &self.keyset.id
    }

    /// Watch a pending melt quote until it settles.
    pub fn poller(&self, quote: &MeltQuote) -> MeltQuotePoller {
        MeltQuotePoller {
            client: self.client.clone(),
            url: self.url.join(&format!("v1/melt/quote/bolt11/{}", quote.id)),
            interval: POLL_INTERVAL,
        }
    }
}

async fn send_once<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<T, RequestFailure> {
    let response = request.send().await.map_err(|e| RequestFailure {
        error: LockError::MintRequest(format!("{url}: {e}")),
        transient: true,
        timed_out: e.is_timeout(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let detail = match response.json::<ErrorResponse>().await {
            Ok(body) => body.describe(),
            Err(_) => format!("HTTP error: {status}"),
        };
        return Err(RequestFailure {
            error: LockError::MintRequest(format!("{url}: {detail}")),
            transient: status.is_server_error(),
            timed_out: false,
        });
    }

    response.json().await.map_err(|e| RequestFailure {
        error: LockError::MintRequest(format!("{url}: invalid response: {e}")),
        transient: false,
        timed_out: e.is_timeout(),
    })
}

/// Send a request built by `build`, repeating transient failures.
async fn with_retry<T, F>(url: &str, attempts: u32, build: F) -> Result<T, LockError>
where
    T: DeserializeOwned,
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 1;
    loop {
        match send_once(build(), url).await {
            Ok(value) => return Ok(value),
            Err(failure) if failure.transient && attempt < attempts => {
                warn!(url, attempt, error = %failure.error, "mint request failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(failure) => return Err(failure.error),
        }
    }
}

async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, LockError> {
    debug!(url, "GET");
    with_retry(url, MAX_ATTEMPTS, || client.get(url)).await
}

async fn post_json<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
    attempts: u32,
) -> Result<T, LockError> {
    debug!(url, "POST");
    with_retry(url, attempts, || client.post(url).json(body)).await
}

#[async_trait]
impl MintBoundary for HttpMint {
    fn mint_url(&self) -> &MintUrl {
        &self.url
    }

    fn unit(&self) -> &CurrencyUnit {
        &self.unit
    }

    async fn check_state(&self, proofs: &[Proof]) -> Result<Vec<SpendState>, LockError> {
        let ys = proofs
            .iter()
            .map(|p| hash_to_curve(p.secret.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let response: CheckStateResponse = post_json(
            &self.client,
            &self.url.join("v1/checkstate"),
            &CheckStateRequest { ys: ys.clone() },
            MAX_ATTEMPTS,
        )
        .await?;

        let states: HashMap<PublicKey, SpendState> = response
            .states
            .into_iter()
            .map(|entry| (entry.y, entry.state))
            .collect();
        ys.iter()
            .map(|y| {
                states.get(y).copied().ok_or_else(|| {
                    LockError::MintRequest(format!("mint did not report state for {y}"))
                })
            })
            .collect()
    }

    async fn create_quote(&self, request: QuoteRequest) -> Result<Quote, LockError> {
        match request {
            QuoteRequest::Mint { amount } => {
                let response: MintQuoteResponse = post_json(
                    &self.client,
                    &self.url.join("v1/mint/quote/bolt11"),
                    &MintQuoteRequest {
                        amount,
                        unit: self.unit.as_str(),
                    },
                    1,
                )
                .await?;
                Ok(Quote::Mint(MintQuote {
                    native_amount: invoice_amount(&response.request),
                    id: response.quote,
                    amount,
                    request: response.request,
                }))
            }
            QuoteRequest::Melt { request } => {
                let response: MeltQuoteResponse = post_json(
                    &self.client,
                    &self.url.join("v1/melt/quote/bolt11"),
                    &MeltQuoteRequest {
                        request: &request,
                        unit: self.unit.as_str(),
                    },
                    1,
                )
                .await?;
                let state = response.state();
                Ok(Quote::Melt(MeltQuote {
                    id: response.quote,
                    amount: response.amount,
                    fee_reserve: response.fee_reserve,
                    request: response.request.unwrap_or(request),
                    state,
                    expiry: response.expiry,
                }))
            }
        }
    }

    async fn pay_quote(&self, quote: &MeltQuote, proofs: &[Proof]) -> Result<MeltOutcome, LockError> {
        let blanks = (0..blank_output_count(quote.fee_reserve))
            .map(|_| self.keyset.blind(1, Secret::random()))
            .collect::<Result<Vec<_>, _>>()?;

        let url = self.url.join("v1/melt/bolt11");
        let body = MeltRequest {
            quote: &quote.id,
            inputs: proofs,
            outputs: blanks.iter().map(|b| b.message.clone()).collect(),
        };
        // The mint holds the request open while the payment routes. Never
        // repeated: the inputs may already be committed.
        debug!(url, "POST");
        let request = self
            .client
            .post(&url)
            .timeout(PAYMENT_CONFIRMATION_WINDOW)
            .json(&body);
        let response: MeltResponse = send_once(request, &url).await.map_err(|failure| {
            let error = failure.into_melt_error(PAYMENT_CONFIRMATION_WINDOW);
            if let LockError::PaymentTimedOut(_) = error {
                warn!(quote = %quote.id, "melt request timed out, payment may still settle");
            }
            error
        })?;

        if response.change.len() > blanks.len() {
            return Err(LockError::MintRequest(format!(
                "mint returned {} change signatures for {} blank outputs",
                response.change.len(),
                blanks.len()
            )));
        }
        let change = blanks
            .into_iter()
            .zip(&response.change)
            .map(|(pending, signature)| self.keyset.unblind(pending, signature))
            .collect::<Result<Vec<_>, _>>()?;

        let state = match (response.state, response.paid) {
            (Some(state), _) => state,
            (None, Some(true)) => QuoteState::Paid,
            _ => QuoteState::Unpaid,
        };
        Ok(MeltOutcome {
            state,
            preimage: response.payment_preimage,
            change,
        })
    }

    async fn split_or_swap(
        &self,
        inputs: &[Proof],
        outputs: &[OutputRequest],
    ) -> Result<Vec<Vec<Proof>>, LockError> {
        let groups = outputs
            .iter()
            .map(|output| self.keyset.prepare(output))
            .collect::<Result<Vec<_>, _>>()?;

        let messages: Vec<BlindedMessage> = groups
            .iter()
            .flatten()
            .map(|pending| pending.message.clone())
            .collect();
        let expected = messages.len();

        let response: SwapResponse = post_json(
            &self.client,
            &self.url.join("v1/swap"),
            &SwapRequest {
                inputs,
                outputs: messages,
            },
            1,
        )
        .await?;

        if response.signatures.len() != expected {
            return Err(LockError::MintRequest(format!(
                "mint returned {} signatures for {expected} outputs",
                response.signatures.len()
            )));
        }

        let mut signatures = response.signatures.iter();
        let mut proofs = Vec::with_capacity(groups.len());
        for group in groups {
            let mut group_proofs = Vec::with_capacity(group.len());
            for pending in group {
                let signature = signatures.next().ok_or_else(|| {
                    LockError::MintRequest("mint returned too few signatures".to_string())
                })?;
                group_proofs.push(self.keyset.unblind(pending, signature)?);
            }
            proofs.push(group_proofs);
        }

        debug!(inputs = inputs.len(), outputs = expected, "swap complete");
        Ok(proofs)
    }

    fn input_fee(&self, proofs: &[Proof]) -> u64 {
        let total_ppk: u64 = proofs
            .iter()
            .map(|p| self.input_fees.get(&p.keyset_id).copied().unwrap_or(0))
            .sum();
        total_ppk.div_ceil(1000)
    }
}

/// Polls a melt quote until the mint reports it paid or unpaid.
///
/// A failed poll is logged and retried; the caller bounds the wait with
/// [`bth_ecash_lock::await_confirmation`].
pub struct MeltQuotePoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

#[async_trait]
impl ConfirmationWatcher for MeltQuotePoller {
    async fn confirmed(&mut self) -> Result<Confirmation, LockError> {
        loop {
            let response: MeltQuoteResponse = match get_json(&self.client, &self.url).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %self.url, "melt quote poll failed: {}", e);
                    tokio::time::sleep(self.interval).await;
                    continue;
                }
            };
            match response.state() {
                QuoteState::Paid => {
                    return Ok(Confirmation {
                        preimage: response.payment_preimage,
                    })
                }
                QuoteState::Unpaid => {
                    return Err(LockError::PaymentFailed(format!(
                        "quote {} returned to unpaid",
                        response.quote
                    )))
                }
                QuoteState::Pending => {
                    debug!(quote = %response.quote, "payment still pending");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}
