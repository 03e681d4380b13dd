//! Hourbot Backend Library
//!
//! Deterministic hourly execution and replay core: canonical hashing,
//! typed context construction, risk admission, simulated execution,
//! append-only persistence, and Merkle-style replay parity checks.

pub mod activation;
pub mod canonical;
pub mod context;
pub mod decision;
pub mod domain;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod harness;
pub mod risk;
pub mod store;
pub mod testkit;
pub mod writer;

pub use engine::{execute_hour, replay_hour, ReplayMismatch, ReplayReport};
pub use error::{CoreError, CoreResult};
pub use harness::{
    replay_manifest_parity, replay_manifest_window_parity, ReplayComparisonReport,
    ReplayWindowReport,
};
pub use writer::RuntimeWriteResult;
