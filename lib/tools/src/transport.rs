//! The remote tool transport seam.
//!
//! The workflow only ever needs two operations from the remote tool server:
//! list what is available and call one tool. Implementations decide how the
//! bytes travel; [`McpConnection`](crate::mcp::McpConnection) speaks MCP over
//! HTTP, and tests substitute in-memory fakes.

use crate::descriptor::{ToolArguments, ToolDescriptor};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One content block of a tool response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Text payload, if the block carries text.
    pub text: Option<String>,
}

impl ContentBlock {
    /// Creates a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// Raw response to a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallToolResponse {
    /// Content blocks in server order.
    pub content: Vec<ContentBlock>,
    /// Set when the tool itself reported failure.
    pub error: Option<String>,
}

impl CallToolResponse {
    /// A successful response with a single text block.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::text(text)],
            error: None,
        }
    }

    /// A response where the tool reported failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            error: Some(message.into()),
        }
    }

    /// Joins every text block with newlines, skipping non-text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Connection to a remote tool server.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Fetches the current tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Calls one tool with already-validated arguments.
    async fn call_tool(
        &self,
        name: &str,
        arguments: &ToolArguments,
    ) -> Result<CallToolResponse, TransportError>;
}
