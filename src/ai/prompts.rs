//! Prompt assembly: six layered sections in fixed order (spec §4.3).

use crate::db::board::Persona;
use crate::ports::{Message, MessageRole};

/// System policy layer: one-question-at-a-time, strict output schema,
/// quote-user-words directive. Static across every session type.
const SYSTEM_POLICY: &str = "\
You ask exactly one question at a time and wait for the user's answer \
before continuing. Every response you produce must conform exactly to \
the declared output schema — no additional keys, no prose outside it. \
When you make a claim about what the user did or said, quote their own \
words rather than paraphrasing.";

#[derive(Debug, Clone)]
pub struct BoardRoleContext {
    pub persona: Persona,
    pub anchored_problem: Option<String>,
    pub anchored_demand: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub active_portfolio_summary: Option<String>,
    pub active_board_summary: Option<String>,
    pub last_bet_summary: Option<String>,
    pub last_quarterly_output: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// (2) Workflow layer: the current FSM spec excerpt for this state.
    pub workflow_excerpt: String,
    /// (3) Board-role layer: present only during governance sessions.
    pub board_role: Option<BoardRoleContext>,
    /// (4) User context.
    pub user_context: UserContext,
    /// (5) Session input: only the user's latest answer.
    pub latest_answer: Option<String>,
    /// (6) Retrieval: optional, bounded to explicitly-relevant prior spans.
    pub retrieval: Vec<String>,
}

/// Assembles the six sections in fixed order. Sections with no content
/// (e.g. no board role outside governance, no retrieval) are omitted
/// rather than emitted empty.
pub fn assemble_prompt(ctx: &PromptContext) -> Vec<Message> {
    let mut messages = Vec::with_capacity(6);

    messages.push(Message {
        role: MessageRole::System,
        content: SYSTEM_POLICY.to_string(),
    });

    messages.push(Message {
        role: MessageRole::System,
        content: format!("Current workflow state:\n{}", ctx.workflow_excerpt),
    });

    if let Some(role) = &ctx.board_role {
        let mut section = format!(
            "You are {}, speaking in the style: {}.",
            role.persona.name, role.persona.communication_style
        );
        section.push_str(&format!("\nBackground: {}", role.persona.background));
        if !role.persona.signature_phrase.is_empty() {
            section.push_str(&format!("\nSignature phrase: \"{}\"", role.persona.signature_phrase));
        }
        if let Some(problem) = &role.anchored_problem {
            section.push_str(&format!("\nAnchored problem: {problem}"));
        }
        if let Some(demand) = &role.anchored_demand {
            section.push_str(&format!("\nAnchored demand: {demand}"));
        }
        messages.push(Message {
            role: MessageRole::System,
            content: section,
        });
    }

    let uc = &ctx.user_context;
    if uc.active_portfolio_summary.is_some()
        || uc.active_board_summary.is_some()
        || uc.last_bet_summary.is_some()
        || uc.last_quarterly_output.is_some()
    {
        let mut section = String::from("User context:");
        if let Some(p) = &uc.active_portfolio_summary {
            section.push_str(&format!("\nActive portfolio: {p}"));
        }
        if let Some(b) = &uc.active_board_summary {
            section.push_str(&format!("\nActive board: {b}"));
        }
        if let Some(bet) = &uc.last_bet_summary {
            section.push_str(&format!("\nLast bet: {bet}"));
        }
        if let Some(q) = &uc.last_quarterly_output {
            section.push_str(&format!("\nLast quarterly output: {q}"));
        }
        messages.push(Message {
            role: MessageRole::System,
            content: section,
        });
    }

    if let Some(answer) = &ctx.latest_answer {
        messages.push(Message {
            role: MessageRole::User,
            content: answer.clone(),
        });
    }

    if !ctx.retrieval.is_empty() {
        let section = format!("Relevant prior spans:\n{}", ctx.retrieval.join("\n---\n"));
        messages.push(Message {
            role: MessageRole::System,
            content: section,
        });
    }

    messages
}

/// The corrective prefix prepended on schema-validation-failure
/// regeneration (spec §4.3).
pub fn corrective_prefix(violations: &[String]) -> String {
    format!(
        "Your previous response did not match the required schema:\n{}\nRegenerate a response that fixes every listed violation and conforms exactly to the schema.",
        violations.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_appear_in_fixed_order_when_all_present() {
        let ctx = PromptContext {
            workflow_excerpt: "Q2_ThreeProblems".into(),
            board_role: Some(BoardRoleContext {
                persona: Persona {
                    name: "Dana".into(),
                    background: "Ex-CFO who has seen three recessions.".into(),
                    communication_style: "blunt, numbers-first".into(),
                    signature_phrase: "Show me the receipts.".into(),
                },
                anchored_problem: Some("on-call burden".into()),
                anchored_demand: Some("What did you ship last quarter?".into()),
            }),
            user_context: UserContext {
                active_portfolio_summary: Some("3 problems".into()),
                ..Default::default()
            },
            latest_answer: Some("I shipped the migration.".into()),
            retrieval: vec!["prior span".into()],
        };
        let messages = assemble_prompt(&ctx);
        assert_eq!(messages.len(), 6);
        assert!(messages[0].content.contains("one question at a time"));
        assert!(messages[1].content.contains("Q2_ThreeProblems"));
        assert!(messages[2].content.contains("Dana"));
        assert!(messages[3].content.contains("3 problems"));
        assert_eq!(messages[4].content, "I shipped the migration.");
        assert!(messages[5].content.contains("prior span"));
    }

    #[test]
    fn omits_absent_sections() {
        let ctx = PromptContext {
            workflow_excerpt: "Collect".into(),
            ..Default::default()
        };
        let messages = assemble_prompt(&ctx);
        assert_eq!(messages.len(), 2);
    }
}
