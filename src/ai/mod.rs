//! Bridges the core to `LLMPort` and `TranscriptionPort` (spec §4.3).

pub mod adapter;
pub mod prompts;
pub mod schema;

pub use adapter::{AiAdapter, OperationKind, SoftCapKind};
