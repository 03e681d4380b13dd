//! Model activation contract enforcement by run mode.
//!
//! BACKTEST rows must not bind to an activation; LIVE/PAPER rows must
//! resolve to an APPROVED activation whose validation window has closed
//! at or before the execution hour.

use chrono::{DateTime, Utc};

use crate::domain::{ActivationStatus, RunMode};

/// Projection of model_activation_gate for deterministic checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRecord {
    pub activation_id: i64,
    pub model_version_id: i64,
    pub run_mode: RunMode,
    pub validation_window_end_utc: DateTime<Utc>,
    pub status: ActivationStatus,
    pub approval_hash: String,
}

/// Activation gate evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationGateResult {
    pub allowed: bool,
    pub reason_code: &'static str,
    pub detail: String,
}

impl ActivationGateResult {
    fn blocked(reason_code: &'static str, detail: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code,
            detail: detail.into(),
        }
    }

    fn allowed(detail: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason_code: "OK",
            detail: detail.into(),
        }
    }
}

/// Validate activation policy before runtime execution.
pub fn enforce_activation_gate(
    run_mode: RunMode,
    hour_ts_utc: DateTime<Utc>,
    model_version_id: i64,
    activation: Option<&ActivationRecord>,
) -> ActivationGateResult {
    if run_mode == RunMode::Backtest {
        if activation.is_some() {
            return ActivationGateResult::blocked(
                "BACKTEST_ACTIVATION_PRESENT",
                "BACKTEST rows must not bind to model_activation_gate.",
            );
        }
        return ActivationGateResult::allowed(
            "Backtest mode validated without activation dependency.",
        );
    }

    let activation = match activation {
        Some(record) => record,
        None => {
            return ActivationGateResult::blocked(
                "MISSING_ACTIVATION",
                "Live/Paper prediction missing activation binding.",
            )
        }
    };

    if activation.model_version_id != model_version_id {
        return ActivationGateResult::blocked(
            "ACTIVATION_MODEL_MISMATCH",
            "Activation model_version_id mismatch.",
        );
    }
    if activation.run_mode != run_mode {
        return ActivationGateResult::blocked(
            "ACTIVATION_MODE_MISMATCH",
            "Activation run_mode mismatch.",
        );
    }
    if activation.status != ActivationStatus::Approved {
        return ActivationGateResult::blocked(
            "ACTIVATION_NOT_APPROVED",
            "Activation record is not APPROVED.",
        );
    }
    if activation.validation_window_end_utc > hour_ts_utc {
        return ActivationGateResult::blocked(
            "ACTIVATION_WINDOW_NOT_REACHED",
            "Validation window ends after execution hour.",
        );
    }

    ActivationGateResult::allowed("Activation gate passed.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 4, 0, 0).unwrap()
    }

    fn approved(window_end: DateTime<Utc>) -> ActivationRecord {
        ActivationRecord {
            activation_id: 7,
            model_version_id: 3,
            run_mode: RunMode::Live,
            validation_window_end_utc: window_end,
            status: ActivationStatus::Approved,
            approval_hash: "a".repeat(64),
        }
    }

    #[test]
    fn backtest_rejects_activation_binding() {
        let record = approved(hour());
        let result =
            enforce_activation_gate(RunMode::Backtest, hour(), 3, Some(&record));
        assert!(!result.allowed);
        assert_eq!(result.reason_code, "BACKTEST_ACTIVATION_PRESENT");

        let clean = enforce_activation_gate(RunMode::Backtest, hour(), 3, None);
        assert!(clean.allowed);
    }

    #[test]
    fn live_requires_activation() {
        let result = enforce_activation_gate(RunMode::Live, hour(), 3, None);
        assert_eq!(result.reason_code, "MISSING_ACTIVATION");
    }

    #[test]
    fn live_rejects_revoked() {
        let mut record = approved(hour() - chrono::Duration::hours(1));
        record.status = ActivationStatus::Revoked;
        let result = enforce_activation_gate(RunMode::Live, hour(), 3, Some(&record));
        assert_eq!(result.reason_code, "ACTIVATION_NOT_APPROVED");
    }

    #[test]
    fn live_rejects_future_validation_window() {
        let record = approved(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap());
        let result = enforce_activation_gate(RunMode::Live, hour(), 3, Some(&record));
        assert_eq!(result.reason_code, "ACTIVATION_WINDOW_NOT_REACHED");
    }

    #[test]
    fn window_end_at_hour_is_allowed() {
        let record = approved(hour());
        let result = enforce_activation_gate(RunMode::Live, hour(), 3, Some(&record));
        assert!(result.allowed);
        assert_eq!(result.reason_code, "OK");
    }

    #[test]
    fn mismatched_model_or_mode_blocks() {
        let record = approved(hour() - chrono::Duration::hours(1));
        let model = enforce_activation_gate(RunMode::Live, hour(), 99, Some(&record));
        assert_eq!(model.reason_code, "ACTIVATION_MODEL_MISMATCH");

        let mode = enforce_activation_gate(RunMode::Paper, hour(), 3, Some(&record));
        assert_eq!(mode.reason_code, "ACTIVATION_MODE_MISMATCH");
    }
}
