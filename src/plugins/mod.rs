//! Governance surfaces built on the core: status regeneration,
//! health-threshold routing and the runtime policy gate.

pub mod route;
pub mod runtime_gate;
pub mod status;
