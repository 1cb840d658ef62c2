//! The typed state threaded through one workflow run.
//!
//! Nodes never mutate [`ConversationState`] directly. Each returns a
//! [`StatePatch`] naming only the fields it produced, and the engine merges
//! it. A field left `None` in a patch keeps its current value.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value as JsonValue, json};
use waypoint_core::SessionId;
use waypoint_tools::{ToolArguments, ToolDescriptor, ToolOutcome, ValidationError};

/// Tool name the selector answers with when nothing in the catalog fits.
pub const NO_TOOL_FOUND: &str = "no_tool_found";

const PARSE_FAILURE_MARKER: &str = "failed_to_parse_json";

/// The selector's decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSelection {
    /// A catalog entry was chosen.
    Selected(ToolDescriptor),
    /// No catalog entry suits the request.
    NoToolFound,
}

impl ToolSelection {
    /// Returns the selected tool's name, or [`NO_TOOL_FOUND`].
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Selected(tool) => &tool.name,
            Self::NoToolFound => NO_TOOL_FOUND,
        }
    }

    /// Returns the selected tool, if any.
    #[must_use]
    pub fn tool(&self) -> Option<&ToolDescriptor> {
        match self {
            Self::Selected(tool) => Some(tool),
            Self::NoToolFound => None,
        }
    }
}

impl Serialize for ToolSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Selected(tool) => tool.serialize(serializer),
            Self::NoToolFound => json!({ "name": NO_TOOL_FOUND }).serialize(serializer),
        }
    }
}

/// Marker recorded when the model's argument output was not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFailure {
    /// Always `failed_to_parse_json`.
    pub error: String,
    /// Why parsing failed.
    pub details: String,
}

impl ParseFailure {
    /// Creates a parse-failure marker.
    #[must_use]
    pub fn new(details: impl Into<String>) -> Self {
        Self {
            error: PARSE_FAILURE_MARKER.to_string(),
            details: details.into(),
        }
    }
}

/// Arguments proposed for the selected tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolInputs {
    /// The model's output could not be parsed.
    ParseFailed(ParseFailure),
    /// Parameter name to value; `null` means "unknown".
    Arguments(ToolArguments),
}

impl ToolInputs {
    /// Returns the arguments to send, treating a parse failure as "nothing known".
    #[must_use]
    pub fn arguments(&self) -> ToolArguments {
        match self {
            Self::Arguments(args) => args.clone(),
            Self::ParseFailed(_) => ToolArguments::new(),
        }
    }
}

/// Normalized outcome of the tool step.
///
/// Serializes to a uniform record: `{"ok": true, "result": ...}` on success,
/// `{"ok": false, "error": <kind>, ...}` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    /// The tool ran and returned text.
    Success { result: String },
    /// The named tool is not in the catalog.
    ToolNotFound { tool: String },
    /// Arguments failed validation; the tool was not called.
    ValidationError { errors: Vec<ValidationError> },
    /// The call failed or the tool reported an error.
    ExecutionError { message: String },
}

impl ToolResult {
    /// Returns true for a successful call.
    #[must_use]
    pub fn ok(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Returns the error kind, or `None` on success.
    #[must_use]
    pub fn error_kind(&self) -> Option<&'static str> {
        match self {
            Self::Success { .. } => None,
            Self::ToolNotFound { .. } => Some("tool_not_found"),
            Self::ValidationError { .. } => Some("validation_error"),
            Self::ExecutionError { .. } => Some("execution_error"),
        }
    }

    /// Renders the uniform result record.
    #[must_use]
    pub fn to_record(&self) -> JsonValue {
        match self {
            Self::Success { result } => json!({ "ok": true, "result": result }),
            Self::ToolNotFound { tool } => {
                json!({ "ok": false, "error": "tool_not_found", "tool": tool })
            }
            Self::ValidationError { errors } => {
                json!({ "ok": false, "error": "validation_error", "errors": errors })
            }
            Self::ExecutionError { message } => {
                json!({ "ok": false, "error": "execution_error", "message": message })
            }
        }
    }
}

impl From<ToolOutcome> for ToolResult {
    fn from(outcome: ToolOutcome) -> Self {
        match outcome {
            ToolOutcome::Success { result } => Self::Success { result },
            ToolOutcome::NotFound { tool } => Self::ToolNotFound { tool },
            ToolOutcome::ValidationFailed { errors } => Self::ValidationError { errors },
            ToolOutcome::ExecutionFailed { message } => Self::ExecutionError { message },
        }
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

/// The record threaded through one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationState {
    /// Session this run belongs to.
    pub session_id: SessionId,
    /// Turn lines, oldest first; includes the current human line.
    pub conversation_history: Vec<String>,
    /// The new user utterance.
    pub current_query: String,
    /// The selector's decision.
    pub selected_tool: Option<ToolSelection>,
    /// Arguments proposed for the selected tool.
    pub tool_inputs: Option<ToolInputs>,
    /// Outcome of the tool step.
    pub tool_result: Option<ToolResult>,
    /// Tool catalog, fetched at most once per run.
    pub available_tools: Option<Vec<ToolDescriptor>>,
    /// Final user-facing text.
    pub answer: Option<String>,
}

impl ConversationState {
    /// Creates the initial state of a run.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        conversation_history: Vec<String>,
        current_query: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            conversation_history,
            current_query: current_query.into(),
            selected_tool: None,
            tool_inputs: None,
            tool_result: None,
            available_tools: None,
            answer: None,
        }
    }

    /// Returns the selected tool, if a real one was chosen.
    #[must_use]
    pub fn selected_descriptor(&self) -> Option<&ToolDescriptor> {
        self.selected_tool.as_ref().and_then(ToolSelection::tool)
    }

    /// Returns the history as one newline-separated transcript.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.conversation_history.join("\n")
    }

    /// Merges a node's patch.
    pub fn apply(&mut self, patch: StatePatch) {
        let StatePatch {
            selected_tool,
            tool_inputs,
            tool_result,
            available_tools,
            answer,
        } = patch;

        if let Some(value) = selected_tool {
            self.selected_tool = Some(value);
        }
        if let Some(value) = tool_inputs {
            self.tool_inputs = Some(value);
        }
        if let Some(value) = tool_result {
            self.tool_result = Some(value);
        }
        if let Some(value) = available_tools {
            self.available_tools = Some(value);
        }
        if let Some(value) = answer {
            self.answer = Some(value);
        }
    }
}

/// A sparse update produced by one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    /// New selector decision.
    pub selected_tool: Option<ToolSelection>,
    /// New tool arguments.
    pub tool_inputs: Option<ToolInputs>,
    /// New tool outcome.
    pub tool_result: Option<ToolResult>,
    /// Freshly fetched catalog.
    pub available_tools: Option<Vec<ToolDescriptor>>,
    /// Final answer.
    pub answer: Option<String>,
}

impl StatePatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConversationState {
        ConversationState::new(
            SessionId::new("s1").unwrap(),
            vec!["Human: hi".to_string()],
            "hi",
        )
    }

    #[test]
    fn patch_merges_only_present_fields() {
        let mut state = state();
        state.answer = Some("draft".to_string());

        state.apply(StatePatch {
            selected_tool: Some(ToolSelection::NoToolFound),
            ..StatePatch::default()
        });

        assert_eq!(state.selected_tool, Some(ToolSelection::NoToolFound));
        assert_eq!(state.answer.as_deref(), Some("draft"));
        assert!(state.tool_result.is_none());
    }

    #[test]
    fn empty_patch_is_noop() {
        let mut state = state();
        let before = state.clone();
        assert!(StatePatch::default().is_empty());
        state.apply(StatePatch::default());
        assert_eq!(state, before);
    }

    #[test]
    fn selection_name_and_sentinel_shape() {
        let tool = ToolDescriptor::new("weather", "Weather lookup");
        assert_eq!(ToolSelection::Selected(tool).name(), "weather");
        assert_eq!(ToolSelection::NoToolFound.name(), NO_TOOL_FOUND);
        assert_eq!(
            serde_json::to_value(ToolSelection::NoToolFound).unwrap(),
            json!({"name": "no_tool_found"})
        );
    }

    #[test]
    fn parse_failure_serializes_as_marker() {
        let inputs = ToolInputs::ParseFailed(ParseFailure::new("expected value at line 1"));
        assert_eq!(
            serde_json::to_value(&inputs).unwrap(),
            json!({"error": "failed_to_parse_json", "details": "expected value at line 1"})
        );
        assert!(inputs.arguments().is_empty());
    }

    #[test]
    fn tool_result_records() {
        let validation = ToolResult::from(ToolOutcome::ValidationFailed {
            errors: vec![ValidationError::missing("destination")],
        });
        assert!(!validation.ok());
        assert_eq!(
            validation.to_record(),
            json!({
                "ok": false,
                "error": "validation_error",
                "errors": [{"field": "destination", "reason": "missing required field"}]
            })
        );

        let success = ToolResult::from(ToolOutcome::Success {
            result: "TK2120".to_string(),
        });
        assert!(success.ok());
        assert_eq!(success.error_kind(), None);
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"ok": true, "result": "TK2120"})
        );
    }
}
