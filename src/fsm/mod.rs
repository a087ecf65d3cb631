//! Generic FSM driver: load session, apply event, persist transition,
//! render next prompt (spec §4.4).
//!
//! Each transition is one `Store` transaction; the runtime never holds
//! an in-memory control-flow stack across an `await`. Resume after a
//! crash is exact: the next `current_prompt` call against the
//! persisted `current_state` reproduces the same prompt.

pub mod session;

use serde_json::Value;
use tracing::info;

use crate::db::sessions::{GovernanceSession, QaPair};
use crate::db::Store;
use crate::domain::vagueness::{classify_vagueness, Vagueness};
use crate::error::CoreError;
use crate::ports::{Clock, RandomSource};
use crate::types::SessionType;

pub use session::{Prompt, StepOutcome, TransitionResult, WorkflowSpec};

/// The literal transcript entry recorded when a vague answer is
/// explicitly skipped (spec §4.4).
pub const SKIPPED_ANSWER_MARKER: &str = "[example refused]";

/// What the caller is asking the runtime to do with the current
/// prompt's answer.
#[derive(Debug, Clone)]
pub enum SubmitAction {
    /// A free-text (or otherwise validated) answer.
    Answer(String),
    /// First step of the two-step skip confirmation.
    RequestSkip,
    /// Second step: the user confirmed they want to skip.
    ConfirmSkip,
}

pub struct FsmRuntime<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    random: &'a dyn RandomSource,
}

impl<'a> FsmRuntime<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, random: &'a dyn RandomSource) -> Self {
        FsmRuntime { store, clock, random }
    }

    /// Start a new session. Fails if one is already in progress — the
    /// caller must `abandon` it first (spec §4.4).
    pub fn start(&self, session_type: SessionType, spec: &dyn WorkflowSpec) -> Result<GovernanceSession, CoreError> {
        let id = self.random.new_id().to_string();
        let now = self.clock.now_utc();
        let session = self.store.start_session(id, session_type, spec.initial_state(), now)?;
        info!(target: "fsm", session_id = %session.sync.id, ?session_type, "session started");
        Ok(session)
    }

    /// Resume the sole in-progress session after a crash, if any.
    pub fn resume(&self) -> Result<Option<GovernanceSession>, CoreError> {
        Ok(self.store.get_in_progress_session()?)
    }

    pub fn current_prompt(&self, session: &GovernanceSession, spec: &dyn WorkflowSpec) -> Prompt {
        spec.prompt_for(&session.current_state, &session.session_data)
    }

    /// Apply one submission. Committing a transition always goes
    /// through `Store::commit_transition`'s epoch check, so a replayed
    /// submission against a stale pre-submission state is rejected
    /// rather than double-applied (spec §8 idempotent submission).
    pub fn submit(
        &self,
        session: &GovernanceSession,
        spec: &dyn WorkflowSpec,
        action: SubmitAction,
    ) -> Result<TransitionResult, CoreError> {
        match action {
            SubmitAction::Answer(answer) => self.submit_answer(session, spec, answer),
            SubmitAction::RequestSkip => Ok(TransitionResult::RequiresClarification(
                "Confirm you want to skip providing a concrete example.".into(),
            )),
            SubmitAction::ConfirmSkip => self.submit_skip(session, spec),
        }
    }

    fn submit_answer(
        &self,
        session: &GovernanceSession,
        spec: &dyn WorkflowSpec,
        answer: String,
    ) -> Result<TransitionResult, CoreError> {
        if spec.requires_vagueness_gate(&session.current_state)
            && classify_vagueness(&answer) == Vagueness::Vague
        {
            return Ok(TransitionResult::RequiresClarification(
                "That answer is too vague. Give a concrete example (who/what/when/result), or request a skip.".into(),
            ));
        }

        let qa = QaPair {
            question: self.current_prompt(session, spec).text,
            answer: answer.clone(),
        };
        self.apply_step(session, spec, &answer, qa)
    }

    fn submit_skip(&self, session: &GovernanceSession, spec: &dyn WorkflowSpec) -> Result<TransitionResult, CoreError> {
        use crate::db::sessions::MAX_VAGUENESS_SKIPS;
        if session.vagueness_skip_count >= MAX_VAGUENESS_SKIPS {
            return Ok(TransitionResult::RequiresClarification(format!(
                "Skip budget of {MAX_VAGUENESS_SKIPS} exhausted for this session; a concrete example is required."
            )));
        }

        let qa = QaPair {
            question: self.current_prompt(session, spec).text,
            answer: SKIPPED_ANSWER_MARKER.to_string(),
        };
        let now = self.clock.now_utc();
        let outcome = spec.apply(&session.current_state, &session.session_data, SKIPPED_ANSWER_MARKER);
        let new_skip_count = session.vagueness_skip_count + 1;

        match outcome {
            StepOutcome::Advance { next_state, session_data } => {
                let updated = self.store.commit_transition(
                    &session.sync.id,
                    session.epoch,
                    &next_state,
                    Some(&qa),
                    &session_data,
                    Some(new_skip_count),
                    now,
                )?;
                Ok(TransitionResult::AwaitingInput(self.current_prompt(&updated, spec)))
            }
            StepOutcome::Complete { output_markdown, session_data } => {
                self.store.commit_transition(
                    &session.sync.id,
                    session.epoch,
                    &session.current_state,
                    Some(&qa),
                    &session_data,
                    Some(new_skip_count),
                    now,
                )?;
                self.store.complete_session(&session.sync.id, Some(&output_markdown), None, None, None, now)?;
                Ok(TransitionResult::Completed(output_markdown))
            }
            StepOutcome::Abort => {
                self.store.abandon_session(&session.sync.id, now)?;
                Ok(TransitionResult::Aborted)
            }
        }
    }

    fn apply_step(
        &self,
        session: &GovernanceSession,
        spec: &dyn WorkflowSpec,
        answer: &str,
        qa: QaPair,
    ) -> Result<TransitionResult, CoreError> {
        let now = self.clock.now_utc();
        let outcome = spec.apply(&session.current_state, &session.session_data, answer);

        match outcome {
            StepOutcome::Advance { next_state, session_data } => {
                let updated = self.store.commit_transition(
                    &session.sync.id,
                    session.epoch,
                    &next_state,
                    Some(&qa),
                    &session_data,
                    None,
                    now,
                )?;
                Ok(TransitionResult::AwaitingInput(self.current_prompt(&updated, spec)))
            }
            StepOutcome::Complete { output_markdown, session_data } => {
                self.store.commit_transition(
                    &session.sync.id,
                    session.epoch,
                    &session.current_state,
                    Some(&qa),
                    &session_data,
                    None,
                    now,
                )?;
                let completed = self.store.complete_session(
                    &session.sync.id,
                    Some(&output_markdown),
                    None,
                    None,
                    None,
                    now,
                )?;
                let _ = completed;
                Ok(TransitionResult::Completed(output_markdown))
            }
            StepOutcome::Abort => {
                self.store.abandon_session(&session.sync.id, now)?;
                Ok(TransitionResult::Aborted)
            }
        }
    }

    pub fn abandon(&self, session: &GovernanceSession) -> Result<(), CoreError> {
        let now = self.clock.now_utc();
        self.store.abandon_session(&session.sync.id, now)?;
        Ok(())
    }
}

/// Used by tests and simple linear workflows to read/write a flat
/// `Value::Object` session_data bag without re-deriving boilerplate.
pub fn session_data_get<'v>(data: &'v Value, key: &str) -> Option<&'v Value> {
    data.get(key)
}

pub fn session_data_set(mut data: Value, key: &str, value: Value) -> Value {
    if let Some(obj) = data.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{OsRandomSource, SystemClock};

    struct TwoStepSpec;

    impl WorkflowSpec for TwoStepSpec {
        fn initial_state(&self) -> &'static str {
            "Q1"
        }

        fn prompt_for(&self, state: &str, _session_data: &Value) -> Prompt {
            let text = match state {
                "Q1" => "What did you work on?",
                "Q2" => "What would you change?",
                other => other,
            };
            Prompt { state: state.to_string(), text: text.to_string() }
        }

        fn requires_vagueness_gate(&self, state: &str) -> bool {
            state == "Q1"
        }

        fn apply(&self, state: &str, session_data: &Value, answer: &str) -> StepOutcome {
            match state {
                "Q1" => StepOutcome::Advance {
                    next_state: "Q2".into(),
                    session_data: session_data_set(session_data.clone(), "q1_answer", Value::String(answer.to_string())),
                },
                _ => StepOutcome::Complete {
                    output_markdown: format!("Final: {answer}"),
                    session_data: session_data.clone(),
                },
            }
        }
    }

    #[test]
    fn vague_answer_is_gated_without_mutating_state() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let random = OsRandomSource;
        let runtime = FsmRuntime::new(&store, &clock, &random);
        let spec = TwoStepSpec;

        let session = runtime.start(SessionType::Quick, &spec).unwrap();
        let result = runtime
            .submit(&session, &spec, SubmitAction::Answer("I did some stuff and helped a lot".into()))
            .unwrap();
        assert!(matches!(result, TransitionResult::RequiresClarification(_)));

        let reloaded = store.get_session(&session.sync.id).unwrap();
        assert_eq!(reloaded.current_state, "Q1");
        assert_eq!(reloaded.epoch, session.epoch);
    }

    #[test]
    fn skip_flow_records_marker_and_enforces_budget() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let random = OsRandomSource;
        let runtime = FsmRuntime::new(&store, &clock, &random);
        let spec = TwoStepSpec;

        let mut session = runtime.start(SessionType::Quick, &spec).unwrap();

        for _ in 0..2 {
            let confirm = runtime.submit(&session, &spec, SubmitAction::RequestSkip).unwrap();
            assert!(matches!(confirm, TransitionResult::RequiresClarification(_)));
            session = store.get_session(&session.sync.id).unwrap();

            runtime.submit(&session, &spec, SubmitAction::ConfirmSkip).unwrap();
            session = store.get_session(&session.sync.id).unwrap();
        }

        assert_eq!(session.vagueness_skip_count, 2);
        assert_eq!(session.current_state, "Q2");
        assert_eq!(session.transcript_log.last().unwrap().answer, SKIPPED_ANSWER_MARKER);
    }

    #[test]
    fn concrete_answer_advances_and_completes() {
        let store = Store::open_in_memory().unwrap();
        let clock = SystemClock;
        let random = OsRandomSource;
        let runtime = FsmRuntime::new(&store, &clock, &random);
        let spec = TwoStepSpec;

        let session = runtime.start(SessionType::Quick, &spec).unwrap();
        let r1 = runtime
            .submit(&session, &spec, SubmitAction::Answer("I shipped the Atlas migration on Tuesday".into()))
            .unwrap();
        let TransitionResult::AwaitingInput(prompt) = r1 else { panic!("expected awaiting input") };
        assert_eq!(prompt.state, "Q2");

        let session = store.get_session(&session.sync.id).unwrap();
        let r2 = runtime.submit(&session, &spec, SubmitAction::Answer("Nothing".into())).unwrap();
        assert!(matches!(r2, TransitionResult::Completed(_)));

        let completed = store.get_session(&session.sync.id).unwrap();
        assert!(completed.is_completed);
    }
}
