//! Boardroom Journal core: a local-first career-governance engine.
//!
//! This crate is the platform-independent core described in the
//! architecture's component table — domain invariants, the SQLite
//! repository, FSM-driven interview workflows, the Portfolio & Board
//! Manager, the AI adapter, and the sync coordinator. Platform shells
//! (desktop, mobile) own everything outside the `ports` seams: UI,
//! audio capture, OAuth, and push delivery.

pub mod ai;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod fsm;
pub mod portfolio;
pub mod ports;
pub mod sync;
pub mod testing;
pub mod types;
pub mod workflows;

pub use error::{CoreError, CoreResult};
