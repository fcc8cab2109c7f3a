//! # jobq
//!
//! Task dispatch for intermittently connected remote workers.
//!
//! Operators queue typed tasks per worker (or for the whole fleet). Workers
//! pick them up on checkin and return results, which are checked against
//! a ledger of issued tasks and single-use tokens before anything is
//! accepted.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fleet;
pub mod model;
pub mod notify;
pub mod telemetry;
