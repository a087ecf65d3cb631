//! Concrete state graphs and output contracts (spec §4.5).
//!
//! Each submodule is one `WorkflowSpec` (or, for the Weekly Brief and
//! Daily Extraction, a non-interactive pipeline) driven by the generic
//! `fsm` runtime.

pub mod brief;
pub mod extraction;
pub mod quarterly;
pub mod quick;
pub mod setup;
