use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::*;
use crate::domain::{PositionState, PredictionState, RunMode, VolatilityFeatureState};
use crate::testkit::{fixture_hour, sample_execution_context, sample_prediction};

fn hash(ch: char) -> String {
    std::iter::repeat(ch).take(64).collect()
}

fn test_context() -> ExecutionContext {
    sample_execution_context()
}

fn prediction(prob_up: Decimal, expected_return: Decimal) -> PredictionState {
    sample_prediction(&hash('5'), prob_up, expected_return)
}

fn with_open_position(context: &mut ExecutionContext, quantity: Decimal) {
    context.positions = vec![PositionState {
        run_mode: RunMode::Live,
        account_id: 1,
        asset_id: 9,
        hour_ts_utc: fixture_hour(),
        source_run_id: context.run_context.run_id,
        quantity,
        exposure_pct: dec!(0.01),
        unrealized_pnl: dec!(0),
        row_hash: hash('q'),
    }];
}

#[test]
fn state_machine_kill_switch_takes_precedence() {
    let mut context = test_context();
    context.risk_state.kill_switch_active = true;
    context.risk_state.halt_new_entries = true;
    let eval = evaluate_risk_state_machine(&context, None);
    assert_eq!(eval.state, RiskStateMode::KillSwitchLockdown);
    assert_eq!(eval.reason_code, "KILL_SWITCH_ACTIVE");
}

#[test]
fn state_machine_halt_then_severe_then_normal() {
    let mut context = test_context();
    context.risk_state.halt_new_entries = true;
    assert_eq!(
        evaluate_risk_state_machine(&context, None).state,
        RiskStateMode::EntryHalt
    );

    context.risk_state.halt_new_entries = false;
    context.risk_state.drawdown_pct = dec!(0.20);
    assert_eq!(
        evaluate_risk_state_machine(&context, None).state,
        RiskStateMode::SevereLossRecovery
    );

    context.risk_state.drawdown_pct = dec!(0.05);
    assert_eq!(
        evaluate_risk_state_machine(&context, None).state,
        RiskStateMode::Normal
    );
}

#[test]
fn runtime_risk_gate_kill_switch_wins_over_halt() {
    let mut context = test_context();
    context.risk_state.kill_switch_active = true;
    context.risk_state.halt_new_entries = true;
    let violations = enforce_runtime_risk_gate(SignalAction::Enter, &context);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].reason_code, "KILL_SWITCH_ACTIVE");

    // Non-entry actions pass untouched.
    assert!(enforce_runtime_risk_gate(SignalAction::Exit, &context).is_empty());
}

#[test]
fn position_count_cap_blocks_at_limit() {
    let mut context = test_context();
    context.capital_state.open_position_count = 10;
    let violations = enforce_position_count_cap(SignalAction::Enter, &context, None);
    assert_eq!(violations[0].reason_code, "MAX_CONCURRENT_POSITIONS_EXCEEDED");

    context.capital_state.open_position_count = 9;
    assert!(enforce_position_count_cap(SignalAction::Enter, &context, None).is_empty());
}

#[test]
fn capital_preservation_blocks_overdraw_and_cap() {
    let context = test_context();
    let violations =
        enforce_capital_preservation(SignalAction::Enter, dec!(10001), &context, None);
    assert!(violations
        .iter()
        .any(|v| v.reason_code == "INSUFFICIENT_AVAILABLE_CASH"));

    let violations =
        enforce_capital_preservation(SignalAction::Enter, dec!(2500), &context, None);
    assert!(violations
        .iter()
        .any(|v| v.reason_code == "TOTAL_EXPOSURE_CAP_EXCEEDED"));

    assert!(
        enforce_capital_preservation(SignalAction::Enter, dec!(100), &context, None).is_empty()
    );
}

#[test]
fn capital_preservation_absolute_amount_mode() {
    let mut context = test_context();
    context.risk_profile.total_exposure_mode = ExposureMode::AbsoluteAmount;
    context.risk_profile.max_total_exposure_amount = Some(dec!(500));
    context.capital_state.total_exposure_pct = dec!(0.04);

    // Current exposure notional = 0.04 * 10000 = 400; +150 breaches 500.
    let violations =
        enforce_capital_preservation(SignalAction::Enter, dec!(150), &context, None);
    assert!(violations
        .iter()
        .any(|v| v.reason_code == "TOTAL_EXPOSURE_AMOUNT_CAP_EXCEEDED"));

    assert!(
        enforce_capital_preservation(SignalAction::Enter, dec!(50), &context, None).is_empty()
    );
}

#[test]
fn cluster_cap_boundary_is_inclusive() {
    let mut context = test_context();
    context.cluster_states[0].exposure_pct = dec!(0.079);

    // 0.079 + 100/10000 = 0.089 > 0.08 blocks.
    let violations = enforce_cluster_cap(SignalAction::Enter, 9, dec!(100), &context, None);
    assert_eq!(violations[0].reason_code, "CLUSTER_CAP_EXCEEDED");

    // Exactly at the cap passes (violation only when projected > cap).
    let violations = enforce_cluster_cap(SignalAction::Enter, 9, dec!(10), &context, None);
    assert!(violations.is_empty());
}

#[test]
fn cluster_cap_missing_membership_or_state() {
    let mut context = test_context();
    let violations = enforce_cluster_cap(SignalAction::Enter, 404, dec!(10), &context, None);
    assert_eq!(violations[0].reason_code, "MISSING_CLUSTER_MEMBERSHIP");

    context.cluster_states.clear();
    let violations = enforce_cluster_cap(SignalAction::Enter, 9, dec!(10), &context, None);
    assert_eq!(violations[0].reason_code, "MISSING_CLUSTER_STATE");
}

#[test]
fn severe_entry_gate_blocks_enter_only_in_recovery() {
    let mut context = test_context();
    context.risk_state.drawdown_pct = dec!(0.20);
    let violations = enforce_severe_loss_entry_gate(SignalAction::Enter, &context, None);
    assert_eq!(violations[0].reason_code, "SEVERE_LOSS_RECOVERY_ENTRY_BLOCKED");

    assert!(enforce_severe_loss_entry_gate(SignalAction::Exit, &context, None).is_empty());
}

#[test]
fn adaptive_horizon_requires_open_position() {
    let context = test_context();
    let eval = evaluate_adaptive_horizon_action(
        SignalAction::Exit,
        &prediction(dec!(0.5), dec!(0.01)),
        &context,
        None,
    );
    assert_eq!(eval.action, SignalAction::Exit);
    assert_eq!(eval.reason_code, "ADAPTIVE_HORIZON_NO_OPEN_POSITION");
}

#[test]
fn adaptive_horizon_extends_hold_on_positive_expectation() {
    let mut context = test_context();
    with_open_position(&mut context, dec!(1));
    let eval = evaluate_adaptive_horizon_action(
        SignalAction::Exit,
        &prediction(dec!(0.5), dec!(0.01)),
        &context,
        None,
    );
    assert_eq!(eval.action, SignalAction::Hold);
    assert_eq!(eval.reason_code, "ADAPTIVE_HORIZON_HOLD_EXTENDED");
}

#[test]
fn adaptive_horizon_exit_vs_persistence() {
    let mut context = test_context();
    with_open_position(&mut context, dec!(1));

    let eval = evaluate_adaptive_horizon_action(
        SignalAction::Hold,
        &prediction(dec!(0.5), dec!(-0.01)),
        &context,
        None,
    );
    assert_eq!(eval.action, SignalAction::Exit);
    assert_eq!(eval.reason_code, "ADAPTIVE_HORIZON_EXIT_PERSISTENT_NEGATIVE");

    context.risk_profile.signal_persistence_required = 2;
    let eval = evaluate_adaptive_horizon_action(
        SignalAction::Hold,
        &prediction(dec!(0.5), dec!(-0.01)),
        &context,
        None,
    );
    assert_eq!(eval.action, SignalAction::Hold);
    assert_eq!(eval.reason_code, "ADAPTIVE_HORIZON_PERSISTENCE_PENDING");
}

#[test]
fn severe_recovery_branches() {
    let mut context = test_context();
    context.risk_state.drawdown_pct = dec!(0.20);

    let hold = evaluate_severe_loss_recovery_action(
        SignalAction::Hold,
        &prediction(dec!(0.70), dec!(0.01)),
        &context,
        None,
    );
    assert_eq!(hold.reason_code, "SEVERE_RECOVERY_HOLD");

    let exit = evaluate_severe_loss_recovery_action(
        SignalAction::Hold,
        &prediction(dec!(0.30), dec!(0.01)),
        &context,
        None,
    );
    assert_eq!(exit.action, SignalAction::Exit);
    assert_eq!(exit.reason_code, "SEVERE_RECOVERY_EXIT");

    let derisk = evaluate_severe_loss_recovery_action(
        SignalAction::Hold,
        &prediction(dec!(0.50), dec!(0.01)),
        &context,
        None,
    );
    assert_eq!(derisk.action, SignalAction::Hold);
    assert_eq!(derisk.reason_code, SEVERE_RECOVERY_DERISK_INTENT);
}

#[test]
fn volatility_sizing_scales_and_clips() {
    let mut context = test_context();
    context.volatility_features = vec![VolatilityFeatureState {
        asset_id: 9,
        feature_id: 42,
        feature_value: dec!(0.04),
        row_hash: hash('v'),
    }];

    // target 0.02 / vol 0.04 = 0.5 (floor).
    let eval =
        compute_volatility_adjusted_fraction(SignalAction::Enter, dec!(0.01), 9, &context, None);
    assert_eq!(eval.reason_code, "VOLATILITY_SIZED");
    assert_eq!(eval.volatility_scale, dec!(0.5000000000));
    assert_eq!(eval.adjusted_fraction, dec!(0.0050000000));

    // Very low volatility clips at the ceiling.
    context.volatility_features[0].feature_value = dec!(0.001);
    let eval =
        compute_volatility_adjusted_fraction(SignalAction::Enter, dec!(0.01), 9, &context, None);
    assert_eq!(eval.volatility_scale, dec!(1.5000000000));
}

#[test]
fn volatility_sizing_falls_back_without_feature() {
    let context = test_context();
    let eval =
        compute_volatility_adjusted_fraction(SignalAction::Enter, dec!(0.01), 9, &context, None);
    assert_eq!(eval.reason_code, "VOLATILITY_FALLBACK_BASE");
    assert_eq!(eval.adjusted_fraction, dec!(0.0100000000));
}

#[test]
fn volatility_sizing_caps_candidate_by_base_risk_fraction() {
    let context = test_context();
    let eval =
        compute_volatility_adjusted_fraction(SignalAction::Enter, dec!(0.05), 9, &context, None);
    assert_eq!(eval.base_fraction, dec!(0.0200000000));
}

#[test]
fn volatility_sizing_not_applicable_outside_enter() {
    let context = test_context();
    let eval =
        compute_volatility_adjusted_fraction(SignalAction::Hold, dec!(0.01), 9, &context, None);
    assert_eq!(eval.reason_code, "VOLATILITY_SIZING_NOT_APPLICABLE");
    assert!(eval.adjusted_fraction.is_zero());
}

#[test]
fn cross_account_isolation_flags_foreign_rows() {
    let mut context = test_context();
    context.capital_state.account_id = 2;
    context.cluster_states[0].account_id = 3;
    let violations = enforce_cross_account_isolation(&context);
    let codes: Vec<&str> = violations.iter().map(|v| v.reason_code.as_str()).collect();
    assert!(codes.contains(&"CROSS_ACCOUNT_CAPITAL_STATE"));
    assert!(codes.contains(&"CROSS_ACCOUNT_CLUSTER_STATE"));
    assert!(!codes.contains(&"CROSS_ACCOUNT_RISK_STATE"));
}
