//! Tool execution.

use crate::capability::Capability;
use crate::error::NodeError;
use crate::state::{
    ConversationState, NO_TOOL_FOUND, StatePatch, ToolInputs, ToolResult, ToolSelection,
};
use crate::step::Step;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};
use waypoint_tools::{ToolInvoker, ToolTransport};

/// Validates the proposed arguments and calls the selected tool.
///
/// Every outcome, failures included, ends up in `tool_result`; this stage
/// never returns an error. A parse failure upstream is sent as an empty
/// argument record so missing required fields surface as validation errors.
pub struct ToolExecutor {
    invoker: ToolInvoker,
    transport: Arc<dyn ToolTransport>,
}

impl ToolExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(invoker: ToolInvoker, transport: Arc<dyn ToolTransport>) -> Self {
        Self { invoker, transport }
    }
}

#[async_trait]
impl Capability for ToolExecutor {
    fn step(&self) -> Step {
        Step::ToolExecuting
    }

    #[instrument(skip(self, state), fields(session_id = %state.session_id))]
    async fn process(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let tool_name = state
            .selected_tool
            .as_ref()
            .map_or(NO_TOOL_FOUND, ToolSelection::name);
        let args = state
            .tool_inputs
            .as_ref()
            .map(ToolInputs::arguments)
            .unwrap_or_default();
        let catalog = state.available_tools.as_deref().unwrap_or_default();

        let outcome = self
            .invoker
            .invoke(tool_name, &args, catalog, self.transport.as_ref())
            .await;
        let result = ToolResult::from(outcome);
        debug!(tool = tool_name, ok = result.ok(), "tool step finished");

        Ok(StatePatch {
            tool_result: Some(result),
            ..StatePatch::default()
        })
    }
}
