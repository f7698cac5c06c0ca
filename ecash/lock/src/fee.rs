// Copyright (c) 2024 The Botho Foundation

//! Lightning fee reserve estimation for melts.
//!
//! A melt must cover the invoice plus the mint's fee reserve, and the reserve
//! is only known after quoting. The negotiator starts from an estimate:
//!
//! ```text
//! reserve = max(min_fee_floor, ceil(amount * fee_rate_ppm / 1_000_000))
//! ```
//!
//! The rate defaults to [`FEE_RATE_ESTIMATE_PPM`]. Reserves actually quoted by
//! the mint can be fed into a [`CachedFeeRate`] so later melts start closer to
//! the real figure.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::mint::MeltQuote;

/// Default reserve estimate: 1% of the invoice.
pub const FEE_RATE_ESTIMATE_PPM: u64 = 10_000;

/// Smallest reserve ever estimated.
pub const MIN_FEE_FLOOR: u64 = 2;

/// How long an observed rate stays usable.
pub const DEFAULT_FEE_RATE_TTL: Duration = Duration::from_secs(600);

const PPM: u128 = 1_000_000;

/// Parameters for the initial fee reserve estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub fee_rate_ppm: u64,
    pub min_fee_floor: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_rate_ppm: FEE_RATE_ESTIMATE_PPM,
            min_fee_floor: MIN_FEE_FLOOR,
        }
    }
}

impl FeePolicy {
    /// Same floor, different rate.
    pub fn with_rate(self, fee_rate_ppm: u64) -> Self {
        Self {
            fee_rate_ppm,
            ..self
        }
    }

    /// Estimated reserve for paying `amount`.
    pub fn estimate_reserve(&self, amount: u64) -> u64 {
        let scaled = (amount as u128 * self.fee_rate_ppm as u128).div_ceil(PPM);
        (scaled.min(u64::MAX as u128) as u64).max(self.min_fee_floor)
    }

    /// Largest invoice amount expected to fit in `available` after fees.
    pub fn initial_invoice_amount(&self, available: u64) -> u64 {
        available.saturating_sub(self.estimate_reserve(available))
    }
}

/// Fee rate observed in recent melt quotes, with TTL expiry.
#[derive(Debug, Clone)]
pub struct CachedFeeRate {
    rate_ppm: u64,
    last_updated: Option<Instant>,
    ttl: Duration,
}

impl Default for CachedFeeRate {
    fn default() -> Self {
        Self {
            rate_ppm: FEE_RATE_ESTIMATE_PPM,
            last_updated: None,
            ttl: DEFAULT_FEE_RATE_TTL,
        }
    }
}

impl CachedFeeRate {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    pub fn update(&mut self, rate_ppm: u64) {
        self.rate_ppm = rate_ppm;
        self.last_updated = Some(Instant::now());
    }

    /// Record the reserve-to-amount ratio of a quote.
    pub fn observe(&mut self, quote: &MeltQuote) {
        if quote.amount == 0 {
            return;
        }
        let ppm = (quote.fee_reserve as u128 * PPM).div_ceil(quote.amount as u128);
        self.update(ppm.min(u64::MAX as u128) as u64);
    }

    /// Observed rate, or `None` once expired.
    pub fn rate(&self) -> Option<u64> {
        self.last_updated
            .filter(|t| t.elapsed() < self.ttl)
            .map(|_| self.rate_ppm)
    }

    pub fn needs_refresh(&self) -> bool {
        self.rate().is_none()
    }

    /// `policy` with its rate replaced by the observed one, if fresh.
    pub fn apply(&self, policy: FeePolicy) -> FeePolicy {
        match self.rate() {
            Some(rate) => policy.with_rate(rate),
            None => policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::QuoteState;

    #[test]
    fn test_estimate_uses_floor_for_small_amounts() {
        let policy = FeePolicy::default();
        assert_eq!(policy.estimate_reserve(0), MIN_FEE_FLOOR);
        assert_eq!(policy.estimate_reserve(100), MIN_FEE_FLOOR);
        assert_eq!(policy.estimate_reserve(1_000), 10);
        // Rounds up.
        assert_eq!(policy.estimate_reserve(1_050), 11);
    }

    #[test]
    fn test_initial_invoice_amount() {
        let policy = FeePolicy::default();
        assert_eq!(policy.initial_invoice_amount(1_000), 990);
        assert_eq!(policy.initial_invoice_amount(1), 0);
    }

    #[test]
    fn test_cached_rate_expiry() {
        let mut cache = CachedFeeRate::with_ttl(Duration::from_millis(10));
        assert!(cache.needs_refresh());

        cache.update(20_000);
        assert_eq!(cache.rate(), Some(20_000));
        assert_eq!(cache.apply(FeePolicy::default()).fee_rate_ppm, 20_000);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.needs_refresh());
        assert_eq!(
            cache.apply(FeePolicy::default()).fee_rate_ppm,
            FEE_RATE_ESTIMATE_PPM
        );
    }

    #[test]
    fn test_observe_quote() {
        let mut cache = CachedFeeRate::default();
        cache.observe(&MeltQuote {
            id: "q".to_string(),
            amount: 1_000,
            fee_reserve: 22,
            request: String::new(),
            state: QuoteState::Unpaid,
            expiry: None,
        });
        assert_eq!(cache.rate(), Some(22_000));
    }
}
