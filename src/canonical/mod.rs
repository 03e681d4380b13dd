//! Canonical serialization primitives shared by every hashed surface.
//!
//! All row identities, row hashes, and the replay DAG derive from the
//! token serialization rules in this module. Nothing here may depend on
//! platform state; identical inputs must hash identically everywhere.

pub mod decimal;
pub mod hashing;
pub mod json;
pub mod time;

pub use decimal::{
    canonical_decimal_str, quantize, quantize_rate, quantize_size_fraction, SCALE_18, SCALE_6,
    SCALE_10,
};
pub use hashing::{stable_hash, stable_uuid, Token};
pub use json::canonical_serialize;
pub use time::{hour_floor, is_hour_aligned, normalize_timestamp, parse_timestamp};
