// Pricing calculator: nights, subtotal, service fee and total for a stay
//
// All amounts are whole currency units. Rounding is round-half-up done in
// integer arithmetic, so `total == subtotal + fee == round(subtotal * (1 + rate))`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeePolicy {
    // Service fee rate in basis points (500 = 5%)
    pub fee_bps: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self { fee_bps: 500 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub nights: u32,
    pub subtotal: u64,
    pub fee: u64,
    pub total: u64,
}

impl PriceBreakdown {
    /// Breakdown for a known night count.
    pub fn for_nights(price_per_night: u64, nights: u32, policy: &FeePolicy) -> Self {
        if nights == 0 {
            return Self::default();
        }

        let subtotal = price_per_night.saturating_mul(u64::from(nights));
        let fee = service_fee(subtotal, policy);

        Self {
            nights,
            subtotal,
            fee,
            total: subtotal.saturating_add(fee),
        }
    }

    // Zero nights means the date range is not usable yet
    pub fn is_complete(&self) -> bool {
        self.nights > 0
    }
}

/// Whole calendar days from `check_in` to `check_out`, or 0 when the range is empty or inverted.
pub fn nights_between(check_in: NaiveDate, check_out: NaiveDate) -> u32 {
    let days = check_out.signed_duration_since(check_in).num_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

pub fn service_fee(subtotal: u64, policy: &FeePolicy) -> u64 {
    let scaled = u128::from(subtotal) * u128::from(policy.fee_bps);
    round_half_up(scaled, BPS_DENOMINATOR)
}

pub fn compute_totals(
    price_per_night: u64,
    check_in: NaiveDate,
    check_out: NaiveDate,
    policy: &FeePolicy,
) -> PriceBreakdown {
    PriceBreakdown::for_nights(
        price_per_night,
        nights_between(check_in, check_out),
        policy,
    )
}

// Unset dates yield an incomplete (all-zero) breakdown
pub fn compute_optional_totals(
    price_per_night: u64,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    policy: &FeePolicy,
) -> PriceBreakdown {
    match (check_in, check_out) {
        (Some(check_in), Some(check_out)) => {
            compute_totals(price_per_night, check_in, check_out, policy)
        }
        _ => PriceBreakdown::default(),
    }
}

fn round_half_up(numerator: u128, denominator: u128) -> u64 {
    let rounded = (numerator + denominator / 2) / denominator;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}
