//! Core error channel for the deterministic runtime.
//!
//! Every validation or invariant failure that must abort the hour maps to
//! one of these variants; business-policy outcomes (gates, caps, missing
//! inventory) are recorded as risk events instead and never surface here.

use thiserror::Error;

/// Discriminated error type for the execution/replay core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required input row or column is absent for the execution key.
    #[error("input missing: {0}")]
    InputMissing(String),

    /// A structural invariant of the deterministic lineage is broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Prediction/regime lineage does not match its training window or
    /// activation binding.
    #[error("lineage mismatch: {0}")]
    LineageMismatch(String),

    /// The ordered cash ledger failed the continuity aggregation.
    #[error("cash ledger continuity invariant violated (violations={violations})")]
    LedgerContinuityBroken { violations: i64 },

    /// Activation contract rejected the execution surface.
    #[error("activation rejected ({reason_code}): {detail}")]
    ActivationRejected { reason_code: String, detail: String },

    /// Substrate integrity failure (uniqueness, FK, append-only trigger)
    /// or any other storage-level error, propagated as-is.
    #[error("substrate error: {0}")]
    Substrate(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Substrate(err.to_string())
    }
}
