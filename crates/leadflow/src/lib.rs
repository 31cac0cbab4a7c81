//! Lead distribution and outcome aggregation engine.
//!
//! Partner channels submit loan-application leads; each lead is fanned out to
//! a configurable subset of lending counterparts, some immediately and some
//! after a delay, and the lenders' acceptance outcomes are aggregated into a
//! single success record that drives downstream notifications.

pub mod config;
pub mod distribution;
pub mod error;
pub mod telemetry;
