//! Workflow steps.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Choosing a tool for the current query.
    ToolSelecting,
    /// Filling the selected tool's arguments from the conversation.
    ParameterExtracting,
    /// Validating and calling the selected tool.
    ToolExecuting,
    /// Writing the user-facing answer.
    Generating,
    /// Terminal.
    End,
}

impl Step {
    /// Every step, in pipeline order.
    pub const ALL: [Step; 5] = [
        Step::ToolSelecting,
        Step::ParameterExtracting,
        Step::ToolExecuting,
        Step::Generating,
        Step::End,
    ];

    /// Returns the step's name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolSelecting => "tool_selecting",
            Self::ParameterExtracting => "parameter_extracting",
            Self::ToolExecuting => "tool_executing",
            Self::Generating => "generating",
            Self::End => "end",
        }
    }

    /// Returns true for the terminal step.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_end_is_terminal() {
        let terminal: Vec<_> = Step::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&Step::End]);
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Step::ParameterExtracting).unwrap(),
            "\"parameter_extracting\""
        );
    }
}
