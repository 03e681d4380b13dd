//! Runtime risk enforcement: state machine, admission gates, adaptive
//! horizon overrides, severe-loss recovery, and volatility sizing.
//!
//! Gates return zero or more violations; any non-empty result forces the
//! final signal action to HOLD. Nothing in this module writes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::{quantize, quantize_size_fraction, SCALE_18};
use crate::context::ExecutionContext;
use crate::domain::{
    ExposureMode, PredictionState, RiskEventType, RiskStateMode, Severity, SignalAction,
};

/// Reason code emitted when severe-loss recovery wants a partial de-risk.
pub const SEVERE_RECOVERY_DERISK_INTENT: &str = "SEVERE_RECOVERY_DERISK_INTENT";
/// Reason code when the state machine is not in severe-loss recovery.
pub const NO_SEVERE_LOSS_RECOVERY: &str = "NO_SEVERE_LOSS_RECOVERY";

/// Deterministic risk enforcement violation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskViolation {
    pub event_type: RiskEventType,
    pub severity: Severity,
    pub reason_code: String,
    pub detail: String,
}

impl RiskViolation {
    fn new(
        event_type: RiskEventType,
        severity: Severity,
        reason_code: &str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            severity,
            reason_code: reason_code.to_string(),
            detail: detail.into(),
        }
    }
}

/// Runtime risk profile surface for configurable exposure controls.
///
/// Defaults mirror the baseline schema profile; a caller-supplied profile
/// overrides the context's assigned one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRiskProfile {
    pub profile_version: String,
    pub max_concurrent_positions: Option<i64>,
    pub total_exposure_mode: ExposureMode,
    pub max_total_exposure_pct: Option<Decimal>,
    pub max_total_exposure_amount: Option<Decimal>,
    pub cluster_exposure_mode: ExposureMode,
    pub max_cluster_exposure_pct: Option<Decimal>,
    pub max_cluster_exposure_amount: Option<Decimal>,
    pub severe_loss_drawdown_trigger: Decimal,
    pub volatility_feature_id: Option<i64>,
    pub volatility_target: Decimal,
    pub volatility_scale_floor: Decimal,
    pub volatility_scale_ceiling: Decimal,
    pub hold_min_expected_return: Decimal,
    pub exit_expected_return_threshold: Decimal,
    pub recovery_hold_prob_up_threshold: Decimal,
    pub recovery_exit_prob_up_threshold: Decimal,
    pub derisk_fraction: Decimal,
    pub signal_persistence_required: i64,
}

impl Default for RuntimeRiskProfile {
    fn default() -> Self {
        Self {
            profile_version: "schema_baseline_v1".to_string(),
            max_concurrent_positions: None,
            total_exposure_mode: ExposureMode::PercentOfPv,
            max_total_exposure_pct: None,
            max_total_exposure_amount: None,
            cluster_exposure_mode: ExposureMode::PercentOfPv,
            max_cluster_exposure_pct: None,
            max_cluster_exposure_amount: None,
            severe_loss_drawdown_trigger: Decimal::new(2, 1), // 0.2
            volatility_feature_id: None,
            volatility_target: Decimal::new(2, 2),     // 0.02
            volatility_scale_floor: Decimal::new(5, 1), // 0.5
            volatility_scale_ceiling: Decimal::new(15, 1), // 1.5
            hold_min_expected_return: Decimal::ZERO,
            exit_expected_return_threshold: Decimal::new(-5, 3), // -0.005
            recovery_hold_prob_up_threshold: Decimal::new(6, 1), // 0.6
            recovery_exit_prob_up_threshold: Decimal::new(35, 2), // 0.35
            derisk_fraction: Decimal::new(5, 1), // 0.5
            signal_persistence_required: 1,
        }
    }
}

/// Risk-state machine evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskStateEvaluation {
    pub state: RiskStateMode,
    pub reason_code: &'static str,
    pub detail: &'static str,
}

/// Volatility-adjusted sizing evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatilitySizingEvaluation {
    pub adjusted_fraction: Decimal,
    pub reason_code: &'static str,
    pub detail: &'static str,
    pub base_fraction: Decimal,
    pub observed_volatility: Option<Decimal>,
    pub volatility_scale: Decimal,
}

/// Action-override evaluation (adaptive horizon / severe recovery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEvaluation {
    pub action: SignalAction,
    pub reason_code: &'static str,
    pub detail: &'static str,
}

fn resolve_runtime_profile(
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> RuntimeRiskProfile {
    if let Some(profile) = risk_profile {
        return profile.clone();
    }
    let assigned = &context.risk_profile;
    RuntimeRiskProfile {
        profile_version: assigned.profile_version.clone(),
        max_concurrent_positions: Some(assigned.max_concurrent_positions),
        total_exposure_mode: assigned.total_exposure_mode,
        max_total_exposure_pct: assigned.max_total_exposure_pct,
        max_total_exposure_amount: assigned.max_total_exposure_amount,
        cluster_exposure_mode: assigned.cluster_exposure_mode,
        max_cluster_exposure_pct: assigned.max_cluster_exposure_pct,
        max_cluster_exposure_amount: assigned.max_cluster_exposure_amount,
        severe_loss_drawdown_trigger: assigned.severe_loss_drawdown_trigger,
        volatility_feature_id: Some(assigned.volatility_feature_id),
        volatility_target: assigned.volatility_target,
        volatility_scale_floor: assigned.volatility_scale_floor,
        volatility_scale_ceiling: assigned.volatility_scale_ceiling,
        hold_min_expected_return: assigned.hold_min_expected_return,
        exit_expected_return_threshold: assigned.exit_expected_return_threshold,
        recovery_hold_prob_up_threshold: assigned.recovery_hold_prob_up_threshold,
        recovery_exit_prob_up_threshold: assigned.recovery_exit_prob_up_threshold,
        derisk_fraction: assigned.derisk_fraction,
        signal_persistence_required: assigned.signal_persistence_required,
    }
}

/// Evaluate the deterministic risk-state machine for the hour.
pub fn evaluate_risk_state_machine(
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> RiskStateEvaluation {
    let profile = resolve_runtime_profile(context, risk_profile);
    if context.risk_state.kill_switch_active {
        return RiskStateEvaluation {
            state: RiskStateMode::KillSwitchLockdown,
            reason_code: "KILL_SWITCH_ACTIVE",
            detail: "Kill switch is active; new entries are blocked.",
        };
    }
    if context.risk_state.halt_new_entries {
        return RiskStateEvaluation {
            state: RiskStateMode::EntryHalt,
            reason_code: "HALT_NEW_ENTRIES_ACTIVE",
            detail: "Drawdown/risk halt is active; new entries are blocked.",
        };
    }
    if context.risk_state.drawdown_pct >= profile.severe_loss_drawdown_trigger {
        return RiskStateEvaluation {
            state: RiskStateMode::SevereLossRecovery,
            reason_code: "SEVERE_LOSS_RECOVERY_MODE",
            detail: "Severe-loss recovery mode active; prioritize de-risking over new exposure.",
        };
    }
    RiskStateEvaluation {
        state: RiskStateMode::Normal,
        reason_code: "NORMAL",
        detail: "Risk state within normal admission bounds.",
    }
}

/// Deterministically scale entry size by profile volatility controls.
///
/// Non-entry actions always result in zero target fraction.
pub fn compute_volatility_adjusted_fraction(
    action: SignalAction,
    candidate_fraction: Decimal,
    asset_id: i64,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> VolatilitySizingEvaluation {
    if action != SignalAction::Enter {
        let zero = quantize_size_fraction(Decimal::ZERO);
        return VolatilitySizingEvaluation {
            adjusted_fraction: zero,
            reason_code: "VOLATILITY_SIZING_NOT_APPLICABLE",
            detail: "Volatility sizing is only applied to ENTER actions.",
            base_fraction: zero,
            observed_volatility: None,
            volatility_scale: zero,
        };
    }

    let profile = resolve_runtime_profile(context, risk_profile);
    let capped_candidate = candidate_fraction.min(context.risk_state.base_risk_fraction);
    let base_fraction = quantize_size_fraction(capped_candidate.max(Decimal::ZERO));

    let volatility_state = context.find_volatility_feature(asset_id);
    let observed = volatility_state.map(|state| state.feature_value);
    match observed {
        Some(value) if value > Decimal::ZERO => {
            let epsilon = Decimal::new(1, 10);
            let raw_scale = profile.volatility_target / value.max(epsilon);
            let clipped = raw_scale
                .max(profile.volatility_scale_floor)
                .min(profile.volatility_scale_ceiling);
            let volatility_scale = quantize_size_fraction(clipped);
            let adjusted = quantize_size_fraction(base_fraction * volatility_scale);
            let adjusted_fraction = adjusted.max(Decimal::ZERO).min(Decimal::ONE);
            VolatilitySizingEvaluation {
                adjusted_fraction,
                reason_code: "VOLATILITY_SIZED",
                detail: "Applied deterministic volatility-adjusted sizing.",
                base_fraction,
                observed_volatility: observed,
                volatility_scale,
            }
        }
        _ => VolatilitySizingEvaluation {
            adjusted_fraction: base_fraction,
            reason_code: "VOLATILITY_FALLBACK_BASE",
            detail: "Missing or non-positive volatility input; using base fraction without scaling.",
            base_fraction,
            observed_volatility: observed,
            volatility_scale: quantize_size_fraction(Decimal::ONE),
        },
    }
}

/// Apply adaptive horizon action overrides for open positions.
///
/// Persistence policy is safety-biased for open positions: when a
/// negative signal is detected but persistence confirmations are still
/// pending, EXIT-like intent is deferred to HOLD.
pub fn evaluate_adaptive_horizon_action(
    candidate_action: SignalAction,
    prediction: &PredictionState,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> ActionEvaluation {
    let profile = resolve_runtime_profile(context, risk_profile);
    let position = context.find_position(prediction.asset_id);
    let has_open_position = position.map_or(false, |p| p.quantity > Decimal::ZERO);
    if !has_open_position {
        return ActionEvaluation {
            action: candidate_action,
            reason_code: "ADAPTIVE_HORIZON_NO_OPEN_POSITION",
            detail: "No open position exists for adaptive horizon override.",
        };
    }

    const PERSISTENCE_PENDING: ActionEvaluation = ActionEvaluation {
        action: SignalAction::Hold,
        reason_code: "ADAPTIVE_HORIZON_PERSISTENCE_PENDING",
        detail: "Negative signal detected but persistence window requires additional \
                 confirmations; forcing HOLD until persistence is satisfied.",
    };

    if candidate_action == SignalAction::Enter {
        if prediction.expected_return <= profile.exit_expected_return_threshold
            && profile.signal_persistence_required > 1
        {
            return PERSISTENCE_PENDING;
        }
        return ActionEvaluation {
            action: candidate_action,
            reason_code: "ADAPTIVE_HORIZON_NO_OVERRIDE",
            detail: "Entry candidates are governed by admission gates, not horizon extension logic.",
        };
    }

    if prediction.expected_return >= profile.hold_min_expected_return {
        return ActionEvaluation {
            action: SignalAction::Hold,
            reason_code: "ADAPTIVE_HORIZON_HOLD_EXTENDED",
            detail: "Expected return remains above hold threshold; extending hold horizon.",
        };
    }

    if prediction.expected_return <= profile.exit_expected_return_threshold {
        if profile.signal_persistence_required <= 1 {
            return ActionEvaluation {
                action: SignalAction::Exit,
                reason_code: "ADAPTIVE_HORIZON_EXIT_PERSISTENT_NEGATIVE",
                detail: "Negative expectation threshold breached with satisfied persistence policy.",
            };
        }
        return PERSISTENCE_PENDING;
    }

    ActionEvaluation {
        action: candidate_action,
        reason_code: "ADAPTIVE_HORIZON_NO_OVERRIDE",
        detail: "Adaptive horizon thresholds did not require action override.",
    }
}

/// Determine the severe-loss recovery branch action.
pub fn evaluate_severe_loss_recovery_action(
    candidate_action: SignalAction,
    prediction: &PredictionState,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> ActionEvaluation {
    let profile = resolve_runtime_profile(context, risk_profile);
    let state = evaluate_risk_state_machine(context, risk_profile);
    if state.state != RiskStateMode::SevereLossRecovery {
        return ActionEvaluation {
            action: candidate_action,
            reason_code: NO_SEVERE_LOSS_RECOVERY,
            detail: "Risk state is not in severe-loss recovery mode.",
        };
    }

    if candidate_action == SignalAction::Enter {
        return ActionEvaluation {
            action: candidate_action,
            reason_code: "SEVERE_RECOVERY_ENTRY_PENDING_GATE",
            detail: "Entry candidate is deferred to severe-loss entry gate enforcement.",
        };
    }

    if prediction.prob_up >= profile.recovery_hold_prob_up_threshold {
        return ActionEvaluation {
            action: SignalAction::Hold,
            reason_code: "SEVERE_RECOVERY_HOLD",
            detail: "Recovery probability is credible; continue holding.",
        };
    }

    if prediction.prob_up <= profile.recovery_exit_prob_up_threshold
        || prediction.expected_return <= profile.exit_expected_return_threshold
    {
        return ActionEvaluation {
            action: SignalAction::Exit,
            reason_code: "SEVERE_RECOVERY_EXIT",
            detail: "Recovery outlook is weak; full exit is required.",
        };
    }

    ActionEvaluation {
        action: SignalAction::Hold,
        reason_code: SEVERE_RECOVERY_DERISK_INTENT,
        detail: "Mixed recovery outlook; emit deterministic de-risk intent sized by derisk_fraction.",
    }
}

/// Validate account isolation across runtime state surfaces.
pub fn enforce_cross_account_isolation(context: &ExecutionContext) -> Vec<RiskViolation> {
    let account_id = context.run_context.account_id;
    let mut violations = Vec::new();
    if context.risk_state.account_id != account_id {
        violations.push(RiskViolation::new(
            RiskEventType::RiskGate,
            Severity::Critical,
            "CROSS_ACCOUNT_RISK_STATE",
            "risk_hourly_state account_id does not match run_context account_id.",
        ));
    }
    if context.capital_state.account_id != account_id {
        violations.push(RiskViolation::new(
            RiskEventType::RiskGate,
            Severity::Critical,
            "CROSS_ACCOUNT_CAPITAL_STATE",
            "portfolio_hourly_state account_id does not match run_context account_id.",
        ));
    }
    if context
        .cluster_states
        .iter()
        .any(|state| state.account_id != account_id)
    {
        violations.push(RiskViolation::new(
            RiskEventType::RiskGate,
            Severity::Critical,
            "CROSS_ACCOUNT_CLUSTER_STATE",
            "cluster_exposure_hourly_state account_id mismatch.",
        ));
    }
    violations
}

/// Enforce halt/kill-switch runtime admission rules.
///
/// Kill-switch precedence is strict: when both halt and kill switch are
/// active, the emitted gating reason is KILL_SWITCH_ACTIVE.
pub fn enforce_runtime_risk_gate(
    action: SignalAction,
    context: &ExecutionContext,
) -> Vec<RiskViolation> {
    if action != SignalAction::Enter {
        return Vec::new();
    }
    if context.risk_state.kill_switch_active {
        return vec![RiskViolation::new(
            RiskEventType::RiskGate,
            Severity::Critical,
            "KILL_SWITCH_ACTIVE",
            "kill_switch_active is TRUE; new entries are blocked.",
        )];
    }
    if context.risk_state.halt_new_entries {
        return vec![RiskViolation::new(
            RiskEventType::RiskGate,
            Severity::High,
            "HALT_NEW_ENTRIES_ACTIVE",
            "halt_new_entries is TRUE; new entries are blocked.",
        )];
    }
    Vec::new()
}

/// Enforce the max-concurrent-position admission cap.
pub fn enforce_position_count_cap(
    action: SignalAction,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> Vec<RiskViolation> {
    if action != SignalAction::Enter {
        return Vec::new();
    }

    let profile = resolve_runtime_profile(context, risk_profile);
    let max_positions = profile
        .max_concurrent_positions
        .unwrap_or(context.risk_state.max_concurrent_positions);

    if max_positions < 0 {
        return vec![RiskViolation::new(
            RiskEventType::CapitalRule,
            Severity::Critical,
            "INVALID_MAX_CONCURRENT_POSITIONS_CONFIG",
            "max_concurrent_positions must be >= 0.",
        )];
    }

    if context.capital_state.open_position_count >= max_positions {
        return vec![RiskViolation::new(
            RiskEventType::CapitalRule,
            Severity::High,
            "MAX_CONCURRENT_POSITIONS_EXCEEDED",
            "open_position_count exceeds max_concurrent_positions.",
        )];
    }

    Vec::new()
}

/// Block new risk admission while in severe-loss recovery mode.
pub fn enforce_severe_loss_entry_gate(
    action: SignalAction,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> Vec<RiskViolation> {
    if action != SignalAction::Enter {
        return Vec::new();
    }
    let evaluation = evaluate_risk_state_machine(context, risk_profile);
    if evaluation.state != RiskStateMode::SevereLossRecovery {
        return Vec::new();
    }
    vec![RiskViolation::new(
        RiskEventType::RiskGate,
        Severity::High,
        "SEVERE_LOSS_RECOVERY_ENTRY_BLOCKED",
        "Severe-loss recovery mode is active; new entries are blocked.",
    )]
}

/// Enforce deterministic capital and exposure preservation rules.
pub fn enforce_capital_preservation(
    action: SignalAction,
    target_position_notional: Decimal,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> Vec<RiskViolation> {
    if action != SignalAction::Enter {
        return Vec::new();
    }

    let profile = resolve_runtime_profile(context, risk_profile);
    let mut violations = Vec::new();
    if target_position_notional > context.capital_state.cash_balance {
        violations.push(RiskViolation::new(
            RiskEventType::CapitalRule,
            Severity::High,
            "INSUFFICIENT_AVAILABLE_CASH",
            "target_position_notional exceeds cash_balance.",
        ));
    }

    if context.capital_state.portfolio_value <= Decimal::ZERO {
        violations.push(RiskViolation::new(
            RiskEventType::CapitalRule,
            Severity::High,
            "NON_POSITIVE_PORTFOLIO_VALUE",
            "portfolio_value is non-positive; order admission is blocked.",
        ));
        return violations;
    }

    match profile.total_exposure_mode {
        ExposureMode::PercentOfPv => {
            let cap_pct = profile
                .max_total_exposure_pct
                .unwrap_or(context.risk_state.max_total_exposure_pct);
            let projected = quantize(
                context.capital_state.total_exposure_pct
                    + (target_position_notional / context.capital_state.portfolio_value),
                SCALE_18,
            );
            if projected > cap_pct {
                violations.push(RiskViolation::new(
                    RiskEventType::CapitalRule,
                    Severity::High,
                    "TOTAL_EXPOSURE_CAP_EXCEEDED",
                    "Projected total exposure exceeds max_total_exposure_pct.",
                ));
            }
        }
        ExposureMode::AbsoluteAmount => {
            let cap_amount = profile.max_total_exposure_amount;
            match cap_amount {
                None => {
                    violations.push(RiskViolation::new(
                        RiskEventType::CapitalRule,
                        Severity::Critical,
                        "INVALID_TOTAL_EXPOSURE_ABSOLUTE_CAP",
                        "ABSOLUTE_AMOUNT mode requires max_total_exposure_amount > 0.",
                    ));
                }
                Some(cap) if cap <= Decimal::ZERO => {
                    violations.push(RiskViolation::new(
                        RiskEventType::CapitalRule,
                        Severity::Critical,
                        "INVALID_TOTAL_EXPOSURE_ABSOLUTE_CAP",
                        "ABSOLUTE_AMOUNT mode requires max_total_exposure_amount > 0.",
                    ));
                }
                Some(cap) => {
                    let current = quantize(
                        context.capital_state.total_exposure_pct
                            * context.capital_state.portfolio_value,
                        SCALE_18,
                    );
                    let projected = quantize(current + target_position_notional, SCALE_18);
                    if projected > cap {
                        violations.push(RiskViolation::new(
                            RiskEventType::CapitalRule,
                            Severity::High,
                            "TOTAL_EXPOSURE_AMOUNT_CAP_EXCEEDED",
                            "Projected total exposure exceeds max_total_exposure_amount.",
                        ));
                    }
                }
            }
        }
    }
    violations
}

/// Enforce the deterministic cluster-cap admission rule.
pub fn enforce_cluster_cap(
    action: SignalAction,
    asset_id: i64,
    target_position_notional: Decimal,
    context: &ExecutionContext,
    risk_profile: Option<&RuntimeRiskProfile>,
) -> Vec<RiskViolation> {
    if action != SignalAction::Enter {
        return Vec::new();
    }

    let profile = resolve_runtime_profile(context, risk_profile);
    let membership = match context.find_membership(asset_id) {
        Some(membership) => membership,
        None => {
            return vec![RiskViolation::new(
                RiskEventType::ClusterCap,
                Severity::High,
                "MISSING_CLUSTER_MEMBERSHIP",
                format!("No active cluster membership for asset_id={asset_id}."),
            )]
        }
    };
    let cluster_state = match context.find_cluster_state(membership.cluster_id) {
        Some(state) => state,
        None => {
            return vec![RiskViolation::new(
                RiskEventType::ClusterCap,
                Severity::High,
                "MISSING_CLUSTER_STATE",
                format!(
                    "No cluster exposure state for cluster_id={}.",
                    membership.cluster_id
                ),
            )]
        }
    };

    if context.capital_state.portfolio_value <= Decimal::ZERO {
        return vec![RiskViolation::new(
            RiskEventType::ClusterCap,
            Severity::High,
            "NON_POSITIVE_PORTFOLIO_VALUE",
            "portfolio_value is non-positive; cannot compute cluster cap projection.",
        )];
    }

    match profile.cluster_exposure_mode {
        ExposureMode::PercentOfPv => {
            let cap_pct = profile
                .max_cluster_exposure_pct
                .unwrap_or(cluster_state.max_cluster_exposure_pct);
            let projected = quantize(
                cluster_state.exposure_pct
                    + (target_position_notional / context.capital_state.portfolio_value),
                SCALE_18,
            );
            if projected > cap_pct {
                return vec![RiskViolation::new(
                    RiskEventType::ClusterCap,
                    Severity::High,
                    "CLUSTER_CAP_EXCEEDED",
                    "Projected cluster exposure exceeds max_cluster_exposure_pct.",
                )];
            }
            Vec::new()
        }
        ExposureMode::AbsoluteAmount => {
            let cap_amount = match profile.max_cluster_exposure_amount {
                Some(cap) if cap > Decimal::ZERO => cap,
                _ => {
                    return vec![RiskViolation::new(
                        RiskEventType::ClusterCap,
                        Severity::Critical,
                        "INVALID_CLUSTER_EXPOSURE_ABSOLUTE_CAP",
                        "ABSOLUTE_AMOUNT mode requires max_cluster_exposure_amount > 0.",
                    )]
                }
            };
            let current = quantize(
                cluster_state.exposure_pct * context.capital_state.portfolio_value,
                SCALE_18,
            );
            let projected = quantize(current + target_position_notional, SCALE_18);
            if projected > cap_amount {
                return vec![RiskViolation::new(
                    RiskEventType::ClusterCap,
                    Severity::High,
                    "CLUSTER_CAP_AMOUNT_EXCEEDED",
                    "Projected cluster exposure exceeds max_cluster_exposure_amount.",
                )];
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests;
