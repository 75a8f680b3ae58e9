//! Core gate machinery: typed trace records, the trace log, validation,
//! the gate evaluator and the resilience consistency check.
//!
//! Everything here is synchronous and reads a fixed snapshot of its inputs.

pub mod config;
pub mod consistency;
pub mod error;
pub mod gatekeeper;
pub mod output;
pub mod record;
pub mod time;
pub mod trace;
pub mod validate;
