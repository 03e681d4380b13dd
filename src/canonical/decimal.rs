//! Fixed-scale decimal quantization.
//!
//! Every numeric value that reaches a hash or the substrate is quantized
//! to an explicit scale with banker's rounding, then rendered with
//! trailing zeros preserved. Floats never touch these paths.

use rust_decimal::{Decimal, RoundingStrategy};

/// Ledger/price/quantity scale (38,18 in the relational contract).
pub const SCALE_18: u32 = 18;
/// Confidence and position-fraction scale.
pub const SCALE_10: u32 = 10;
/// Fee and slippage rate scale.
pub const SCALE_6: u32 = 6;

/// Quantize to `scale` fractional digits with banker's rounding, keeping
/// the scale exact so trailing zeros survive rendering.
pub fn quantize(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(scale);
    rounded
}

/// Quantize at the ledger scale (1e-18).
#[inline]
pub fn quantize_18(value: Decimal) -> Decimal {
    quantize(value, SCALE_18)
}

/// Quantize a confidence or sizing fraction (1e-10).
#[inline]
pub fn quantize_size_fraction(value: Decimal) -> Decimal {
    quantize(value, SCALE_10)
}

/// Quantize a fee or slippage rate (1e-6).
#[inline]
pub fn quantize_rate(value: Decimal) -> Decimal {
    quantize(value, SCALE_6)
}

/// Canonical 18-digit fixed-point rendering used in hash tokens and in
/// every persisted decimal column.
pub fn canonical_decimal_str(value: Decimal) -> String {
    quantize_18(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_preserves_trailing_zeros() {
        assert_eq!(canonical_decimal_str(dec!(1)), "1.000000000000000000");
        assert_eq!(canonical_decimal_str(dec!(0.5)), "0.500000000000000000");
        assert_eq!(
            canonical_decimal_str(dec!(-0.005)),
            "-0.005000000000000000"
        );
    }

    #[test]
    fn quantize_uses_bankers_rounding() {
        // Ties round to even at the target scale.
        assert_eq!(quantize(dec!(0.25), 1), dec!(0.2));
        assert_eq!(quantize(dec!(0.35), 1), dec!(0.4));
        assert_eq!(quantize(dec!(0.00000000000000000015), 18).to_string(), "0.000000000000000000");
        assert_eq!(quantize(dec!(0.00000000000000000025), 18).to_string(), "0.000000000000000000");
    }

    #[test]
    fn rate_and_fraction_scales() {
        assert_eq!(quantize_rate(dec!(0.0012345678)).to_string(), "0.001235");
        assert_eq!(
            quantize_size_fraction(dec!(0.123456789012345)).to_string(),
            "0.1234567890"
        );
    }
}
