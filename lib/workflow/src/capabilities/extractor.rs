//! Argument extraction.

use super::ask;
use crate::capability::Capability;
use crate::error::NodeError;
use crate::state::{ConversationState, ParseFailure, StatePatch, ToolInputs};
use crate::step::Step;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use waypoint_ai::{LlmBackend, PromptVariables, extract_json_object, prompt::PARAMETER_EXTRACTION};

/// Fills the selected tool's input schema from the conversation so far.
///
/// Values the model could not find come back as `null`. Output that is not
/// a JSON object is recorded as a [`ParseFailure`] instead of failing the run.
pub struct ParameterExtractor {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
}

impl ParameterExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

#[async_trait]
impl Capability for ParameterExtractor {
    fn step(&self) -> Step {
        Step::ParameterExtracting
    }

    #[instrument(skip(self, state), fields(session_id = %state.session_id))]
    async fn process(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let tool = state
            .selected_descriptor()
            .ok_or(NodeError::MissingInput {
                step: self.step(),
                field: "selected_tool",
            })?;

        let schema = serde_json::to_string_pretty(&tool.input_schema)
            .unwrap_or_else(|_| tool.input_schema.to_string());
        let variables = PromptVariables::from([
            ("tool_schema", schema),
            ("user_conversation", state.transcript()),
        ]);
        let reply = ask(
            self.backend.as_ref(),
            self.step(),
            &PARAMETER_EXTRACTION,
            &variables,
            self.timeout,
        )
        .await?;

        let inputs = match extract_json_object(&reply) {
            Ok(arguments) => {
                debug!(tool = %tool.name, argument_count = arguments.len(), "extracted arguments");
                ToolInputs::Arguments(arguments)
            }
            Err(e) => {
                debug!(tool = %tool.name, error = %e, "model output is not a JSON object");
                ToolInputs::ParseFailed(ParseFailure::new(e.to_string()))
            }
        };

        Ok(StatePatch {
            tool_inputs: Some(inputs),
            ..StatePatch::default()
        })
    }
}
