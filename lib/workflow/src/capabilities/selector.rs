//! Tool selection.

use super::ask;
use crate::capability::Capability;
use crate::error::NodeError;
use crate::state::{ConversationState, NO_TOOL_FOUND, StatePatch, ToolSelection};
use crate::step::Step;
use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use waypoint_ai::{LlmBackend, PromptVariables, prompt::TOOL_SELECTION};
use waypoint_tools::{ToolDescriptor, ToolTransport, TransportError, find_tool};

/// Asks the model which catalog tool fits the current query.
///
/// The catalog is fetched from the transport the first time a run needs it
/// and carried in state afterwards. The fetch is bounded by the tool
/// deadline, the model call by the generation deadline.
pub struct ToolSelector {
    backend: Arc<dyn LlmBackend>,
    transport: Arc<dyn ToolTransport>,
    timeout: Duration,
    catalog_timeout: Duration,
}

impl ToolSelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        transport: Arc<dyn ToolTransport>,
        timeout: Duration,
        catalog_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            transport,
            timeout,
            catalog_timeout,
        }
    }
}

#[async_trait]
impl Capability for ToolSelector {
    fn step(&self) -> Step {
        Step::ToolSelecting
    }

    #[instrument(skip(self, state), fields(session_id = %state.session_id))]
    async fn process(&self, state: &ConversationState) -> Result<StatePatch, NodeError> {
        let mut patch = StatePatch::default();
        let catalog = match &state.available_tools {
            Some(tools) => tools.clone(),
            None => {
                let tools = tokio::time::timeout(self.catalog_timeout, self.transport.list_tools())
                    .await
                    .unwrap_or(Err(TransportError::TimedOut {
                        after: self.catalog_timeout,
                    }))
                    .map_err(|source| NodeError::Catalog { source })?;
                debug!(tool_count = tools.len(), "fetched tool catalog");
                patch.available_tools = Some(tools.clone());
                tools
            }
        };

        if catalog.is_empty() {
            debug!("empty tool catalog, nothing to select");
            patch.selected_tool = Some(ToolSelection::NoToolFound);
            return Ok(patch);
        }

        let variables = PromptVariables::from([
            ("user_question", state.current_query.clone()),
            ("available_tools", format_catalog(&catalog)),
        ]);
        let reply = ask(
            self.backend.as_ref(),
            self.step(),
            &TOOL_SELECTION,
            &variables,
            self.timeout,
        )
        .await?;

        let selection = resolve(&catalog, &parse_tool_name(&reply));
        debug!(tool = selection.name(), "tool selected");
        patch.selected_tool = Some(selection);
        Ok(patch)
    }
}

/// One `- name: description` line per tool.
fn format_catalog(catalog: &[ToolDescriptor]) -> String {
    let mut out = String::new();
    for tool in catalog {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
    }
    out.trim_end().to_string()
}

/// Takes the first non-empty line of the reply, without quotes or backticks.
fn parse_tool_name(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_string()
}

fn resolve(catalog: &[ToolDescriptor], name: &str) -> ToolSelection {
    if name.is_empty() || name.eq_ignore_ascii_case(NO_TOOL_FOUND) {
        return ToolSelection::NoToolFound;
    }
    match find_tool(catalog, name) {
        Some(tool) => ToolSelection::Selected(tool.clone()),
        None => {
            warn!(tool = name, "selected tool is not in the catalog, treating as no tool found");
            ToolSelection::NoToolFound
        }
    }
}
