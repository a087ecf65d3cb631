//! Shared FSM vocabulary: prompts, transition results, and the
//! `WorkflowSpec` trait each workflow implements (spec §4.4).

use serde_json::Value;

/// What the runtime shows the user at the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub state: String,
    pub text: String,
}

/// Outcome of `FsmRuntime::submit` (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    AwaitingInput(Prompt),
    RequiresClarification(String),
    Completed(String),
    Aborted,
}

/// What a `WorkflowSpec::apply` call decides happened to a validated
/// answer.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Advance { next_state: String, session_data: Value },
    Complete { output_markdown: String, session_data: Value },
    Abort,
}

/// A concrete state graph and output contract (spec §4.5.x). The FSM
/// runtime is generic over this trait; it never inspects workflow
/// internals beyond what the trait exposes.
pub trait WorkflowSpec: Send + Sync {
    fn initial_state(&self) -> &'static str;

    /// Render the prompt for `state` given accumulated `session_data`.
    fn prompt_for(&self, state: &str, session_data: &Value) -> Prompt;

    /// Whether a free-text answer at `state` must pass the vagueness
    /// gate before the transition is allowed to apply (spec §4.4).
    fn requires_vagueness_gate(&self, state: &str) -> bool;

    /// Apply a validated answer at `state`, producing the next step.
    fn apply(&self, state: &str, session_data: &Value, answer: &str) -> StepOutcome;
}
