//! Lightning Address Resolution
//!
//! Resolves `name@domain` addresses through LNURL-pay: the well-known
//! endpoint reports a sendable range and a callback that issues invoices for
//! a chosen amount.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bth_ecash_lock::{AmountRange, LockError, PaymentResolver};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::debug;

/// Bolt11 network prefixes, longest first so `lnbcrt` wins over `lnbc`.
const INVOICE_PREFIXES: &[&str] = &["lnbcrt", "lntbs", "lnbc", "lntb"];

/// Amount in sats encoded in a bolt11 invoice's human-readable part.
///
/// Only the amount prefix is read; the invoice is not otherwise validated.
/// Returns `None` for amountless or unreadable invoices.
pub fn invoice_amount(invoice: &str) -> Option<u64> {
    let invoice = invoice.trim().to_ascii_lowercase();
    let invoice = invoice.strip_prefix("lightning:").unwrap_or(&invoice);
    let hrp = &invoice[..invoice.rfind('1')?];
    let amount = INVOICE_PREFIXES
        .iter()
        .find_map(|prefix| hrp.strip_prefix(prefix))?;

    let digits_end = amount
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(amount.len());
    let value: u64 = amount[..digits_end].parse().ok()?;

    // Millisats per unit of each multiplier; no multiplier means whole BTC.
    let msat = match &amount[digits_end..] {
        "" => value.checked_mul(100_000_000_000)?,
        "m" => value.checked_mul(100_000_000)?,
        "u" => value.checked_mul(100_000)?,
        "n" => value.checked_mul(100)?,
        "p" => value / 10,
        _ => return None,
    };
    Some(msat / 1000)
}

/// LNURL-pay metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayRequest {
    callback: String,
    min_sendable: u64,
    max_sendable: u64,
    tag: String,
}

/// Callback response; errors come back as `{"status":"ERROR","reason":..}`.
#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    pr: Option<String>,
    status: Option<String>,
    reason: Option<String>,
}

/// LNURL-pay resolver for lightning addresses.
pub struct LnurlResolver {
    client: reqwest::Client,
    pay_requests: Mutex<HashMap<String, PayRequest>>,
}

impl LnurlResolver {
    pub fn new(timeout: Duration) -> Result<Self, LockError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LockError::PaymentTarget(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            pay_requests: Mutex::new(HashMap::new()),
        })
    }

    /// `https://domain/.well-known/lnurlp/name` for `name@domain`.
    pub fn well_known_url(address: &str) -> Result<String, LockError> {
        let (name, domain) = address
            .split_once('@')
            .filter(|(name, domain)| !name.is_empty() && !domain.is_empty())
            .ok_or_else(|| {
                LockError::PaymentTarget(format!("{address} is not a lightning address"))
            })?;
        let scheme = if domain.ends_with(".onion") || domain.starts_with("localhost") {
            "http"
        } else {
            "https"
        };
        Ok(format!("{scheme}://{domain}/.well-known/lnurlp/{name}"))
    }

    async fn pay_request(&self, address: &str) -> Result<PayRequest, LockError> {
        let cached = self.pay_requests.lock().get(address).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let url = Self::well_known_url(address)?;
        debug!(%url, "fetching LNURL-pay metadata");
        let request: PayRequest = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LockError::PaymentTarget(format!("{address}: {e}")))?
            .json()
            .await
            .map_err(|e| LockError::PaymentTarget(format!("{address}: invalid metadata: {e}")))?;

        if request.tag != "payRequest" {
            return Err(LockError::PaymentTarget(format!(
                "{address}: unexpected LNURL tag {}",
                request.tag
            )));
        }
        if request.min_sendable > request.max_sendable {
            return Err(LockError::PaymentTarget(format!(
                "{address}: empty sendable range"
            )));
        }

        self.pay_requests
            .lock()
            .insert(address.to_string(), request.clone());
        Ok(request)
    }
}

#[async_trait]
impl PaymentResolver for LnurlResolver {
    async fn amount_range(&self, address: &str) -> Result<AmountRange, LockError> {
        let request = self.pay_request(address).await?;
        // Sendable bounds are in millisats; round inwards.
        Ok(AmountRange {
            min: request.min_sendable.div_ceil(1000),
            max: request.max_sendable / 1000,
        })
    }

    async fn request_invoice(&self, address: &str, amount: u64) -> Result<String, LockError> {
        let request = self.pay_request(address).await?;
        let msat = amount
            .checked_mul(1000)
            .ok_or_else(|| LockError::PaymentTarget(format!("amount {amount} too large")))?;

        let response: InvoiceResponse = self
            .client
            .get(&request.callback)
            .query(&[("amount", msat)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| LockError::PaymentTarget(format!("{address}: {e}")))?
            .json()
            .await
            .map_err(|e| LockError::PaymentTarget(format!("{address}: invalid response: {e}")))?;

        if response.status.as_deref() == Some("ERROR") {
            return Err(LockError::PaymentTarget(format!(
                "{address}: {}",
                response.reason.unwrap_or_else(|| "invoice request refused".to_string())
            )));
        }
        let invoice = response
            .pr
            .ok_or_else(|| LockError::PaymentTarget(format!("{address}: no invoice returned")))?;

        if invoice_amount(&invoice) != Some(amount) {
            return Err(LockError::PaymentTarget(format!(
                "{address}: invoice amount does not match requested {amount} sat"
            )));
        }
        debug!(address, amount, "received invoice");
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_invoice_amount_multipliers() {
        assert_eq!(invoice_amount("lnbc2500u1pvjluezpp5qqqsyq"), Some(250_000));
        assert_eq!(invoice_amount("lnbc9900n1pjqqqqq"), Some(990));
        assert_eq!(invoice_amount("lnbc1m1pvjluez"), Some(100_000));
        assert_eq!(invoice_amount("lnbc20p1pvjluez"), Some(0));
        assert_eq!(invoice_amount("LIGHTNING:LNBC10U1PVJLUEZ"), Some(1_000));
    }

    #[test]
    fn test_invoice_amount_networks() {
        assert_eq!(invoice_amount("lntb100u1pvjluez"), Some(10_000));
        assert_eq!(invoice_amount("lnbcrt50u1pvjluez"), Some(5_000));
        assert_eq!(invoice_amount("lntbs1u1pvjluez"), Some(100));
    }

    #[test]
    fn test_amountless_invoice() {
        assert_eq!(invoice_amount("lnbc1pvjluezpp5qqqsyq"), None);
        assert_eq!(invoice_amount("not an invoice"), None);
    }

    #[test]
    fn test_well_known_url() {
        assert_eq!(
            LnurlResolver::well_known_url("bob@wallet.example.com").unwrap(),
            "https://wallet.example.com/.well-known/lnurlp/bob"
        );
        assert_eq!(
            LnurlResolver::well_known_url("alice@localhost:8080").unwrap(),
            "http://localhost:8080/.well-known/lnurlp/alice"
        );
        assert_matches!(
            LnurlResolver::well_known_url("@wallet.example.com"),
            Err(LockError::PaymentTarget(_))
        );
        assert_matches!(
            LnurlResolver::well_known_url("lnurl1dp68gurn8ghj7"),
            Err(LockError::PaymentTarget(_))
        );
    }

    #[test]
    fn test_pay_request_parse() {
        let json = r#"{
            "callback": "https://wallet.example.com/lnurlp/bob/callback",
            "minSendable": 1000,
            "maxSendable": 100000000,
            "metadata": "[[\"text/plain\",\"bob\"]]",
            "tag": "payRequest"
        }"#;
        let request: PayRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.min_sendable, 1000);
        assert_eq!(request.max_sendable, 100_000_000);
    }
}
