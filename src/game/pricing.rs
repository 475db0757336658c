//! Throne Price Escalation
//!
//! Integer-only arithmetic for the throne's asking price. Every successful
//! claim raises the price by 10%, rounded up, so the price rises strictly
//! even from the minimum bid of 1.
//!
//! All operations are `u64` with saturating semantics. A rollback restores
//! the previous record's price, which may sit below a price already paid;
//! the escalation rule applies per commit, not across administrative edits.

/// Numerator of the per-claim growth factor (11/10, rounded up).
pub const GROWTH_NUM: u64 = 11;

/// Denominator of the per-claim growth factor.
pub const GROWTH_DEN: u64 = 10;

/// Next asking price after a claim that paid `paid`: `ceil(paid * 1.1)`.
///
/// Computed as `(paid * 11 + 9) / 10` so no floating point is involved.
/// Saturates at `u64::MAX` instead of overflowing.
#[inline]
pub const fn next_price(paid: u64) -> u64 {
    match paid.checked_mul(GROWTH_NUM) {
        Some(scaled) => scaled.saturating_add(GROWTH_DEN - 1) / GROWTH_DEN,
        None => u64::MAX,
    }
}

/// Invoice total for a claim at `base_price` with the chosen bid multiplier.
///
/// The multiplier scales the bid, not the resulting price: paying more up
/// front feeds the larger amount into [`next_price`] at commit time.
/// Callers validate `multiplier >= 1` before invoicing.
#[inline]
pub const fn invoice_total(base_price: u64, multiplier: u32) -> u64 {
    base_price.saturating_mul(multiplier as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_price_table() {
        assert_eq!(next_price(1), 2);
        assert_eq!(next_price(10), 11);
        assert_eq!(next_price(20), 22);
        assert_eq!(next_price(100), 110);
    }

    #[test]
    fn test_next_price_rounds_up() {
        // 9 * 1.1 = 9.9 -> 10, 11 * 1.1 = 12.1 -> 13
        assert_eq!(next_price(9), 10);
        assert_eq!(next_price(11), 13);
        assert_eq!(next_price(19), 21);
    }

    #[test]
    fn test_next_price_strictly_grows() {
        for paid in 1..10_000u64 {
            assert!(next_price(paid) > paid, "price must rise after paying {paid}");
        }
    }

    #[test]
    fn test_next_price_saturates() {
        // paid * 11 overflows u64 for anything past MAX / 11
        assert_eq!(next_price(u64::MAX), u64::MAX);
        assert_eq!(next_price(u64::MAX / 2), u64::MAX);

        // Largest non-overflowing input still rises
        let paid = u64::MAX / GROWTH_NUM;
        assert!(next_price(paid) > paid);
    }

    #[test]
    fn test_invoice_total() {
        assert_eq!(invoice_total(1, 1), 1);
        assert_eq!(invoice_total(2, 10), 20);
        assert_eq!(invoice_total(5, 100), 500);
        assert_eq!(invoice_total(u64::MAX, 2), u64::MAX);
    }
}
