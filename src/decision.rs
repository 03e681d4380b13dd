//! Pure deterministic decision function.
//!
//! Maps the five upstream state hashes to (action, confidence, size) with
//! no external inputs; identical hashes always yield identical output.

use rust_decimal::Decimal;

use crate::canonical::{quantize_size_fraction, stable_hash};
use crate::domain::{Direction, SignalAction};
use crate::tokens;

/// Namespace prefix for the decision preimage.
const DECISION_NAMESPACE: &str = "phase_1d_decision_v1";

/// Pure deterministic decision payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionResult {
    pub decision_hash: String,
    pub action: SignalAction,
    pub direction: Direction,
    pub confidence: Decimal,
    pub position_size_fraction: Decimal,
}

/// Compute the decision for one prediction surface.
pub fn deterministic_decision(
    prediction_hash: &str,
    regime_hash: &str,
    capital_state_hash: &str,
    risk_state_hash: &str,
    cluster_state_hash: &str,
) -> DecisionResult {
    let decision_hash = stable_hash(tokens![
        DECISION_NAMESPACE,
        prediction_hash,
        regime_hash,
        capital_state_hash,
        risk_state_hash,
        cluster_state_hash,
    ]);

    let score = u64::from_str_radix(&decision_hash[..16], 16)
        .expect("first 16 chars of a hex digest always parse");

    let (action, direction) = match score % 3 {
        0 => (SignalAction::Enter, Direction::Long),
        1 => (SignalAction::Hold, Direction::Flat),
        _ => (SignalAction::Exit, Direction::Flat),
    };

    let confidence =
        quantize_size_fraction(Decimal::from(score % 10_000) / Decimal::from(10_000));

    // Runtime risk constraints cap base position size at 2%; the raw
    // fraction here stays within [0, 0.02).
    let position_size_fraction = if action == SignalAction::Enter {
        quantize_size_fraction(Decimal::from((score / 10_000) % 2_000) / Decimal::from(100_000))
    } else {
        quantize_size_fraction(Decimal::ZERO)
    };

    DecisionResult {
        decision_hash,
        action,
        direction,
        confidence,
        position_size_fraction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const C: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";
    const D: &str = "dddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddddd";
    const E: &str = "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

    #[test]
    fn known_answer_decision() {
        let result = deterministic_decision(A, B, C, D, E);
        assert_eq!(
            result.decision_hash,
            "8e8405e7b174fa383bdc92e9a90d2abc7574e99572744669a582361bf7983dff"
        );
        assert_eq!(result.action, SignalAction::Exit);
        assert_eq!(result.direction, Direction::Flat);
        assert_eq!(result.confidence, dec!(0.1224000000));
        // Non-entry actions carry zero size.
        assert_eq!(result.position_size_fraction.to_string(), "0.0000000000");
    }

    #[test]
    fn referential_transparency() {
        let first = deterministic_decision(A, B, C, D, E);
        let second = deterministic_decision(A, B, C, D, E);
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_inputs_change_hash() {
        let base = deterministic_decision(A, B, C, D, E);
        let other = deterministic_decision(B, A, C, D, E);
        assert_ne!(base.decision_hash, other.decision_hash);
    }

    #[test]
    fn confidence_and_fraction_scales() {
        let result = deterministic_decision(A, B, C, D, E);
        assert_eq!(result.confidence.scale(), 10);
        assert_eq!(result.position_size_fraction.scale(), 10);
        assert!(result.confidence >= Decimal::ZERO && result.confidence < Decimal::ONE);
    }
}
