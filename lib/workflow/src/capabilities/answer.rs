//! Answer generation.

use super::ask;
use crate::capability::Capability;
use crate::error::NodeError;
use crate::state::{ConversationState, StatePatch, ToolResult, ToolSelection};
use crate::step::Step;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use waypoint_ai::{LlmBackend, PromptVariables, prompt::ANSWER_GENERATION};

/// Answer recorded when the model returns nothing but whitespace.
pub const EMPTY_ANSWER_FALLBACK: &str = "[No answer could be generated]";

/// Writes the user-facing reply from the conversation and the tool result.
///
/// Validation failures turn into a clarifying question naming the missing
/// fields; a run where no tool fit turns into an apology.
pub struct AnswerGenerator {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
}

impl AnswerGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

#[async_trait]
impl Capability for AnswerGenerator {
    fn step(&self) -> Step {
        Step::Generating
    }

    #[instrument(skip(self, state), fields(session_id = %state.session_id))]
    async fn process(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let variables = PromptVariables::from([
            ("user_conversation", state.transcript()),
            ("tool_result", tool_result_text(state)),
            ("guidance", guidance(state)),
        ]);
        let reply = ask(
            self.backend.as_ref(),
            self.step(),
            &ANSWER_GENERATION,
            &variables,
            self.timeout,
        )
        .await?;

        let answer = reply.trim();
        let answer = if answer.is_empty() {
            warn!("model returned an empty answer");
            EMPTY_ANSWER_FALLBACK.to_string()
        } else {
            answer.to_string()
        };
        debug!(answer_len = answer.len(), "answer generated");

        Ok(StatePatch {
            answer: Some(answer),
            ..StatePatch::default()
        })
    }
}

fn no_tool_selected(state: &ConversationState) -> bool {
    matches!(state.selected_tool, Some(ToolSelection::NoToolFound))
}

fn tool_result_text(state: &ConversationState) -> String {
    match &state.tool_result {
        Some(result) => result.to_record().to_string(),
        None if no_tool_selected(state) => {
            json!({ "ok": false, "error": "no_suitable_tool" }).to_string()
        }
        None => "none".to_string(),
    }
}

/// Case-specific instruction for the reply.
fn guidance(state: &ConversationState) -> String {
    if no_tool_selected(state) {
        return "None of the available tools can handle this request. Apologize and \
                explain that it is beyond your current capabilities."
            .to_string();
    }

    match &state.tool_result {
        Some(ToolResult::ValidationError { errors }) => {
            let missing: Vec<&str> = errors
                .iter()
                .filter(|e| e.is_missing_field())
                .map(|e| e.field.as_str())
                .collect();
            if missing.is_empty() {
                let invalid: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{} ({})", e.field, e.reason))
                    .collect();
                format!(
                    "Some details were invalid: {}. Ask the user to correct them.",
                    invalid.join(", ")
                )
            } else {
                format!(
                    "Information is missing: {}. Ask the user one short question for it.",
                    missing.join(", ")
                )
            }
        }
        Some(ToolResult::ToolNotFound { .. } | ToolResult::ExecutionError { .. }) => {
            "The tool could not be used. Apologize and explain the problem briefly.".to_string()
        }
        Some(ToolResult::Success { .. }) => {
            "Summarize the tool result for the user.".to_string()
        }
        None => "Reply to the user's last message.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::{ScriptedBackend, flight_tool};
    use waypoint_ai::LlmError;
    use waypoint_core::SessionId;
    use waypoint_tools::ValidationError;

    fn state() -> ConversationState {
        ConversationState::new(
            SessionId::new("ans").unwrap(),
            vec!["Human: Book a flight from Istanbul".to_string()],
            "Book a flight from Istanbul",
        )
    }

    fn generator(backend: ScriptedBackend) -> (AnswerGenerator, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let generator = AnswerGenerator::new(
            Arc::clone(&backend) as Arc<dyn LlmBackend>,
            Duration::from_secs(5),
        );
        (generator, backend)
    }

    #[tokio::test]
    async fn validation_error_asks_for_missing_fields() {
        let (generator, backend) = generator(ScriptedBackend::constant("Where to?\n"));
        let mut state = state();
        state.selected_tool = Some(ToolSelection::Selected(flight_tool()));
        state.tool_result = Some(ToolResult::ValidationError {
            errors: vec![ValidationError::missing("destination")],
        });

        let patch = generator.process(&state).await.unwrap();

        assert_eq!(patch.answer.as_deref(), Some("Where to?"));
        let prompt = backend.last_prompt();
        assert!(prompt.contains("Information is missing: destination."));
        assert!(prompt.contains("\"error\":\"validation_error\""));
    }

    #[tokio::test]
    async fn no_tool_asks_for_an_apology() {
        let (generator, backend) = generator(ScriptedBackend::constant("Sorry, I can't."));
        let mut state = state();
        state.selected_tool = Some(ToolSelection::NoToolFound);

        let patch = generator.process(&state).await.unwrap();

        assert_eq!(patch.answer.as_deref(), Some("Sorry, I can't."));
        let prompt = backend.last_prompt();
        assert!(prompt.contains("no_suitable_tool"));
        assert!(prompt.contains("beyond your current capabilities"));
    }

    #[tokio::test]
    async fn blank_reply_falls_back() {
        let (generator, _) = generator(ScriptedBackend::constant("  \n "));
        let patch = generator.process(&state()).await.unwrap();
        assert_eq!(patch.answer.as_deref(), Some(EMPTY_ANSWER_FALLBACK));
    }

    #[tokio::test]
    async fn backend_failure_is_a_node_error() {
        let (generator, _) = generator(ScriptedBackend::new(|_| {
            Err(LlmError::RequestFailed {
                reason: "HTTP 503".to_string(),
            })
        }));
        let err = generator.process(&state()).await.unwrap_err();
        assert_eq!(err.step(), Step::Generating);
    }

    #[test]
    fn invalid_values_are_named_with_reasons() {
        let mut state = state();
        state.tool_result = Some(ToolResult::ValidationError {
            errors: vec![ValidationError::new("origin", "value does not match pattern: [A-Z]{3}")],
        });
        assert_eq!(
            guidance(&state),
            "Some details were invalid: origin (value does not match pattern: [A-Z]{3}). \
             Ask the user to correct them."
        );
    }
}
