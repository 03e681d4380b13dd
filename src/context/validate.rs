//! Cross-validation of the loaded context surface.
//!
//! Every failure aborts the hour before any write happens. Lineage rules
//! apply to predictions and regimes alike.

use crate::context::ExecutionContext;
use crate::domain::{ExposureMode, PredictionState, RegimeState, RunMode};
use crate::error::{CoreError, CoreResult};

pub(super) fn validate_context(context: &ExecutionContext) -> CoreResult<()> {
    if context.predictions.is_empty() {
        return Err(CoreError::InputMissing(
            "no model_prediction rows available for execution hour".into(),
        ));
    }
    if context.regimes.is_empty() {
        return Err(CoreError::InputMissing(
            "no regime_output rows available for execution hour".into(),
        ));
    }

    let run_id = context.run_context.run_id;
    let account_id = context.run_context.account_id;
    let run_mode = context.run_context.run_mode;

    if context.risk_state.source_run_id != run_id {
        return Err(CoreError::InvariantViolation(
            "risk state source_run_id mismatch".into(),
        ));
    }
    if context.capital_state.source_run_id != run_id {
        return Err(CoreError::InvariantViolation(
            "capital state source_run_id mismatch".into(),
        ));
    }

    if context.risk_state.account_id != account_id
        || context.capital_state.account_id != account_id
    {
        return Err(CoreError::InvariantViolation(
            "cross-account contamination on risk/capital state".into(),
        ));
    }

    for cluster_state in &context.cluster_states {
        if cluster_state.account_id != account_id {
            return Err(CoreError::InvariantViolation(
                "cross-account contamination in cluster_exposure_hourly_state".into(),
            ));
        }
        if cluster_state.parent_risk_hash != context.risk_state.row_hash {
            return Err(CoreError::LineageMismatch(
                "cluster parent_risk_hash lineage mismatch".into(),
            ));
        }
    }

    for prediction in &context.predictions {
        if prediction.account_id != account_id || prediction.run_id != run_id {
            return Err(CoreError::InvariantViolation(
                "cross-account contamination in model_prediction".into(),
            ));
        }
        if prediction.run_mode != run_mode {
            return Err(CoreError::InvariantViolation(
                "model_prediction run_mode mismatch".into(),
            ));
        }
        validate_prediction_lineage(prediction, context)?;
    }

    for regime in &context.regimes {
        if regime.account_id != account_id || regime.run_id != run_id {
            return Err(CoreError::InvariantViolation(
                "cross-account contamination in regime_output".into(),
            ));
        }
        if regime.run_mode != run_mode {
            return Err(CoreError::InvariantViolation(
                "regime_output run_mode mismatch".into(),
            ));
        }
        validate_regime_lineage(regime, context)?;
    }

    for prediction in &context.predictions {
        if context
            .find_regime(prediction.asset_id, prediction.model_version_id)
            .is_none()
        {
            return Err(CoreError::InputMissing(format!(
                "missing regime_output for asset_id={} model_version_id={}",
                prediction.asset_id, prediction.model_version_id
            )));
        }
        if context.find_membership(prediction.asset_id).is_none() {
            return Err(CoreError::InputMissing(format!(
                "missing asset_cluster_membership for asset_id={} at hour",
                prediction.asset_id
            )));
        }
        if context.find_asset_precision(prediction.asset_id).is_none() {
            return Err(CoreError::InputMissing(format!(
                "missing asset precision metadata for asset_id={}",
                prediction.asset_id
            )));
        }
    }

    if let Some(prior) = &context.prior_economic_state {
        if prior.ledger_seq > 1
            && prior
                .prev_ledger_hash
                .as_deref()
                .map_or(true, |hash| hash.is_empty())
        {
            return Err(CoreError::LedgerContinuityBroken { violations: 1 });
        }
    }

    // Exposure modes are closed enums, so only the numeric profile fields
    // need shape checks here.
    if context.risk_profile.signal_persistence_required < 1 {
        return Err(CoreError::InvariantViolation(
            "risk_profile signal_persistence_required must be >= 1".into(),
        ));
    }
    if context.risk_profile.volatility_scale_floor > context.risk_profile.volatility_scale_ceiling
    {
        return Err(CoreError::InvariantViolation(
            "risk_profile volatility scale floor/ceiling invalid".into(),
        ));
    }
    if context.risk_profile.total_exposure_mode == ExposureMode::AbsoluteAmount
        && context.risk_profile.max_total_exposure_amount.is_none()
    {
        return Err(CoreError::InvariantViolation(
            "ABSOLUTE_AMOUNT total exposure mode requires max_total_exposure_amount".into(),
        ));
    }

    for feature in &context.volatility_features {
        if feature.feature_id != context.risk_profile.volatility_feature_id {
            return Err(CoreError::InvariantViolation(
                "configured volatility_feature_id mismatch in feature_snapshot".into(),
            ));
        }
    }

    for lot in &context.existing_position_lots {
        if context.find_existing_fill(lot.open_fill_id).is_none() {
            return Err(CoreError::InputMissing(format!(
                "position_lot open_fill_id={} missing matching order_fill row",
                lot.open_fill_id
            )));
        }
    }

    Ok(())
}

fn validate_prediction_lineage(
    prediction: &PredictionState,
    context: &ExecutionContext,
) -> CoreResult<()> {
    if context.run_context.run_mode == RunMode::Backtest {
        let training_window_id = prediction.training_window_id.ok_or_else(|| {
            CoreError::LineageMismatch("BACKTEST prediction missing training_window_id".into())
        })?;
        let window = context.find_training_window(training_window_id).ok_or_else(|| {
            CoreError::LineageMismatch("BACKTEST prediction training window not found".into())
        })?;
        if prediction.lineage_backtest_run_id != Some(window.backtest_run_id) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction lineage_backtest_run_id mismatch".into(),
            ));
        }
        if prediction.lineage_fold_index != Some(window.fold_index) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction lineage_fold_index mismatch".into(),
            ));
        }
        if prediction.lineage_horizon != Some(window.horizon) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction lineage_horizon mismatch".into(),
            ));
        }
        if prediction.model_version_id != window.model_version_id {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction model_version_id mismatch in lineage".into(),
            ));
        }
        // No-forward-leakage guard.
        if prediction.hour_ts_utc <= window.train_end_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction leaks into training period".into(),
            ));
        }
        if prediction.hour_ts_utc < window.valid_start_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction before validation window".into(),
            ));
        }
        if prediction.hour_ts_utc >= window.valid_end_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction after validation window".into(),
            ));
        }
        if prediction.activation_id.is_some() {
            return Err(CoreError::LineageMismatch(
                "BACKTEST prediction must not carry activation_id".into(),
            ));
        }
        return Ok(());
    }

    let activation_id = prediction.activation_id.ok_or_else(|| {
        CoreError::LineageMismatch("LIVE/PAPER prediction missing activation_id".into())
    })?;
    let activation = context.find_activation(activation_id).ok_or_else(|| {
        CoreError::LineageMismatch("LIVE/PAPER prediction activation record missing".into())
    })?;
    // Status and validation-window policy is the activation gate's job;
    // it records violations as risk events instead of aborting the hour.
    if activation.model_version_id != prediction.model_version_id {
        return Err(CoreError::LineageMismatch(
            "LIVE/PAPER prediction activation model_version mismatch".into(),
        ));
    }
    if activation.run_mode != context.run_context.run_mode {
        return Err(CoreError::LineageMismatch(
            "LIVE/PAPER prediction activation run_mode mismatch".into(),
        ));
    }
    Ok(())
}

fn validate_regime_lineage(regime: &RegimeState, context: &ExecutionContext) -> CoreResult<()> {
    if context.run_context.run_mode == RunMode::Backtest {
        let training_window_id = regime.training_window_id.ok_or_else(|| {
            CoreError::LineageMismatch("BACKTEST regime_output missing training_window_id".into())
        })?;
        let window = context.find_training_window(training_window_id).ok_or_else(|| {
            CoreError::LineageMismatch("BACKTEST regime_output training window not found".into())
        })?;
        if regime.lineage_backtest_run_id != Some(window.backtest_run_id) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output lineage_backtest_run_id mismatch".into(),
            ));
        }
        if regime.lineage_fold_index != Some(window.fold_index) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output lineage_fold_index mismatch".into(),
            ));
        }
        if regime.lineage_horizon != Some(window.horizon) {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output lineage_horizon mismatch".into(),
            ));
        }
        if regime.model_version_id != window.model_version_id {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output model_version_id mismatch in lineage".into(),
            ));
        }
        if regime.hour_ts_utc <= window.train_end_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output leaks into training period".into(),
            ));
        }
        if regime.hour_ts_utc < window.valid_start_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output before validation window".into(),
            ));
        }
        if regime.hour_ts_utc >= window.valid_end_utc {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output after validation window".into(),
            ));
        }
        if regime.activation_id.is_some() {
            return Err(CoreError::LineageMismatch(
                "BACKTEST regime_output must not carry activation_id".into(),
            ));
        }
        return Ok(());
    }

    let activation_id = regime.activation_id.ok_or_else(|| {
        CoreError::LineageMismatch("LIVE/PAPER regime_output missing activation_id".into())
    })?;
    let activation = context.find_activation(activation_id).ok_or_else(|| {
        CoreError::LineageMismatch("LIVE/PAPER regime_output activation record missing".into())
    })?;
    if activation.model_version_id != regime.model_version_id {
        return Err(CoreError::LineageMismatch(
            "LIVE/PAPER regime_output activation model_version mismatch".into(),
        ));
    }
    if activation.run_mode != context.run_context.run_mode {
        return Err(CoreError::LineageMismatch(
            "LIVE/PAPER regime_output activation run_mode mismatch".into(),
        ));
    }
    Ok(())
}
