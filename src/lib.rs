//! Quorum engine library crate
//!
//! Sends one logical request to several independent model backends,
//! tolerates partial failure, and reduces disagreeing outputs into a
//! single actionable decision. Exposes the fallback dispatcher, the
//! parallel consensus engine, the decision gate, and the audit trail so
//! callers (and the `quorum` CLI) can wire them together once at startup.

pub mod agent;
pub mod audit;
pub mod backend;
pub mod config;
pub mod consensus;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod plan;

#[cfg(test)]
pub(crate) mod testutil;
